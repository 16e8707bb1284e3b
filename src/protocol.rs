//! Wire types exchanged with the transport layer
//!
//! These are plain serde structs. Converting a core `Result` into a
//! response never loses the error: rejected requests carry the short
//! reason from [`SyncError::reason`] plus the full message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::ot::{DocumentId, Operation, ParticipantId, RawOperation, Version};
use crate::session::{Participant, ParticipantKind, SessionId, SubmitReceipt};
use crate::workflow::{Conflict, MergeOutcome, Step, StepId};

pub use crate::session::JoinResponse;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub op: RawOperation,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformed_op: Option<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SubmitResponse {
    pub fn rejected(err: &SyncError) -> Self {
        Self {
            accepted: false,
            new_version: None,
            transformed_op: None,
            reason: Some(err.reason().to_string()),
            message: Some(err.to_string()),
        }
    }
}

impl From<Result<SubmitReceipt>> for SubmitResponse {
    fn from(result: Result<SubmitReceipt>) -> Self {
        match result {
            Ok(receipt) => Self {
                accepted: true,
                new_version: Some(receipt.new_version),
                transformed_op: Some(receipt.transformed_op),
                reason: None,
                message: None,
            },
            Err(e) => Self::rejected(&e),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub document_id: DocumentId,
    pub author_id: ParticipantId,
    #[serde(default)]
    pub kind: ParticipantKind,
}

impl JoinRequest {
    pub fn participant(&self) -> Participant {
        Participant {
            id: self.author_id.clone(),
            kind: self.kind,
        }
    }
}

/// A conflict as shown to the workflow UI: step contents only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictView {
    pub step_id: StepId,
    pub ours: Option<Value>,
    pub theirs: Option<Value>,
    pub base: Option<Value>,
    pub position: usize,
}

impl From<Conflict> for ConflictView {
    fn from(conflict: Conflict) -> Self {
        let content = |step: Option<Step>| step.map(|s| s.content);
        Self {
            step_id: conflict.step_id,
            ours: content(conflict.ours),
            theirs: content(conflict.theirs),
            base: content(conflict.base),
            position: conflict.position,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum MergeResponse {
    Merged {
        new_version: Version,
        steps: Vec<Step>,
    },
    Conflict {
        conflicts: Vec<ConflictView>,
    },
    Rejected {
        reason: String,
        message: String,
    },
}

impl From<Result<MergeOutcome>> for MergeResponse {
    fn from(result: Result<MergeOutcome>) -> Self {
        match result {
            Ok(MergeOutcome::Merged { new_version, steps }) => {
                MergeResponse::Merged { new_version, steps }
            }
            Ok(MergeOutcome::Conflict { conflicts }) => MergeResponse::Conflict {
                conflicts: conflicts.into_iter().map(ConflictView::from).collect(),
            },
            Err(e) => MergeResponse::Rejected {
                reason: e.reason().to_string(),
                message: e.to_string(),
            },
        }
    }
}
