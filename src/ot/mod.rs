//! Operational Transform
//!
//! Text operations, the pairwise transform rules, and the engine that
//! rebases an incoming operation over the concurrent history window.

mod engine;
mod operation;
mod transform;

pub use engine::OtEngine;
pub use operation::{char_len, DocumentId, OpId, OpKind, Operation, ParticipantId, RawOperation, Version};
pub use transform::{transform, transform_pair};
