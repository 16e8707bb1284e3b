//! Collaborator interfaces
//!
//! Storage and broadcast are owned by other layers. The core only calls
//! them through these traits; the in-memory implementations back the
//! tests and the replay binary.

mod broadcast;
mod storage;

pub use broadcast::{Broadcaster, ChannelBroadcaster, NullBroadcaster, Published};
#[cfg(any(test, feature = "test-util"))]
pub use broadcast::FailingBroadcaster;
pub use storage::{DocumentStorage, MemoryStorage};
