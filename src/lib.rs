// Concord - Collaborative Editing Sync Core

pub mod collab;
pub mod config;
pub mod document;
pub mod error;
pub mod logging;
pub mod ot;
pub mod protocol;
pub mod session;
pub mod workflow;

pub use collab::{Broadcaster, ChannelBroadcaster, DocumentStorage, MemoryStorage, NullBroadcaster};
pub use config::{ConfigError, SyncConfig};
pub use document::{DocumentSnapshot, DocumentStore};
pub use error::{Result, SyncError};
pub use ot::{DocumentId, OpKind, Operation, OtEngine, ParticipantId, RawOperation, Version};
pub use session::{Participant, ParticipantKind, SessionCoordinator, SessionId, SessionState};
pub use workflow::{BranchManager, MergeOutcome, ResolutionStrategy, Step, StepDiff};
