//! Error types shared by every layer of the sync core

use thiserror::Error;

use crate::ot::{DocumentId, ParticipantId, Version};
use crate::session::{SessionId, SessionState};
use crate::workflow::{BranchId, WorkflowId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// The base version predates the retained history; the client must resync.
    #[error("Stale operation: base version {base_version} predates retained history (oldest usable base: {oldest_retained})")]
    StaleOperation {
        base_version: Version,
        oldest_retained: Version,
    },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("Document already exists: {0}")]
    DocumentAlreadyExists(DocumentId),

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Session {session_id} is {state:?}, not active")]
    SessionNotActive {
        session_id: SessionId,
        state: SessionState,
    },

    #[error("Participant {participant_id} has not joined session {session_id}")]
    NotAParticipant {
        session_id: SessionId,
        participant_id: ParticipantId,
    },

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("Branch not found: {0}")]
    BranchNotFound(BranchId),

    #[error("Branch {0} is closed")]
    BranchClosed(BranchId),

    #[error("Invalid modification: {0}")]
    InvalidModification(String),

    #[error("Merge of branch {0} lost the race for the main line too many times")]
    MergeContention(BranchId),

    /// The append-only history invariant no longer holds. Fatal for the document.
    #[error("History corrupted for {document_id}: expected version {expected}, found {found}")]
    HistoryCorrupted {
        document_id: DocumentId,
        expected: Version,
        found: Version,
    },

    #[error("Document {0} is halted pending operator intervention")]
    DocumentHalted(DocumentId),

    #[error("Document actor for {0} is unavailable")]
    ActorUnavailable(DocumentId),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Broadcast error: {0}")]
    Broadcast(String),
}

impl SyncError {
    /// Errors a client can recover from by resyncing or retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SyncError::StaleOperation { .. }
                | SyncError::MergeContention(_)
                | SyncError::ActorUnavailable(_)
                | SyncError::SessionNotActive { .. }
        )
    }

    /// Errors that stop the affected document until an operator steps in.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::HistoryCorrupted { .. } | SyncError::DocumentHalted(_)
        )
    }

    /// Short machine-readable reason used in wire responses.
    pub fn reason(&self) -> &'static str {
        match self {
            SyncError::StaleOperation { .. } => "stale",
            SyncError::InvalidOperation(_) => "invalid",
            SyncError::DocumentNotFound(_) => "document_not_found",
            SyncError::DocumentAlreadyExists(_) => "document_exists",
            SyncError::SessionNotFound(_) => "session_not_found",
            SyncError::SessionNotActive { .. } => "session_not_active",
            SyncError::NotAParticipant { .. } => "not_a_participant",
            SyncError::WorkflowNotFound(_) => "workflow_not_found",
            SyncError::BranchNotFound(_) => "branch_not_found",
            SyncError::BranchClosed(_) => "branch_closed",
            SyncError::InvalidModification(_) => "invalid_modification",
            SyncError::MergeContention(_) => "merge_contention",
            SyncError::HistoryCorrupted { .. } => "history_corrupted",
            SyncError::DocumentHalted(_) => "document_halted",
            SyncError::ActorUnavailable(_) => "unavailable",
            SyncError::Storage(_) => "storage",
            SyncError::Broadcast(_) => "broadcast",
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
