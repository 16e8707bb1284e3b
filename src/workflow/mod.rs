//! Branching workflows: ordered step lists with branch, modify and merge.

mod branch;
mod merge;
mod resolver;
mod step;

pub use branch::{Branch, BranchId, BranchManager, BranchStatus, MainLine, MergeOutcome, WorkflowId};
pub use merge::{Conflict, MergeResult, ThreeWayMerge};
pub use resolver::{
    ConflictResolution, ConflictResolver, PreferOurs, PreferTheirs, ResolutionStrategy,
    ScoreResolver,
};
pub use step::{replay, Step, StepDiff, StepId};
