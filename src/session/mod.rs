//! Session Coordinator
//!
//! Maps participants to documents and serializes operation intake for each
//! document through a dedicated actor task.

mod actor;
mod coordinator;
mod state;

pub use coordinator::SessionCoordinator;
pub use state::{
    JoinResponse, Participant, ParticipantKind, Session, SessionId, SessionInfo, SessionState,
    SubmitReceipt,
};
