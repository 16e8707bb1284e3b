//! Per-document collaborative session state
//!
//! A session tracks who is connected to a document and the last version
//! each of them acknowledged. It lives inside the document's actor, so it
//! is only ever touched from that actor's task.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::ot::{DocumentId, Operation, ParticipantId, Version};

/// Unique identifier for a session
pub type SessionId = Uuid;

/// Lifecycle: `Joining → Active → Closing → Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Document is being validated and loaded
    Joining,
    /// Accepting operations
    Active,
    /// Rejecting new work while in-flight work drains
    Closing,
    Closed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    #[default]
    Human,
    /// Bots and assistants editing alongside humans
    Automated,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub kind: ParticipantKind,
}

impl Participant {
    pub fn human(id: impl Into<ParticipantId>) -> Self {
        Self {
            id: id.into(),
            kind: ParticipantKind::Human,
        }
    }

    pub fn automated(id: impl Into<ParticipantId>) -> Self {
        Self {
            id: id.into(),
            kind: ParticipantKind::Automated,
        }
    }
}

/// What a participant receives on joining.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub session_id: SessionId,
    pub document_id: DocumentId,
    pub current_content: String,
    pub current_version: Version,
    pub digest: String,
}

/// An accepted submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub new_version: Version,
    pub transformed_op: Operation,
}

/// Read-only view of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub document_id: DocumentId,
    pub state: SessionState,
    pub participants: Vec<Participant>,
    pub per_participant_version: BTreeMap<ParticipantId, Version>,
    pub created_at: DateTime<Utc>,
}

pub struct Session {
    session_id: SessionId,
    document_id: DocumentId,
    state: SessionState,
    participants: HashMap<ParticipantId, Participant>,
    per_participant_version: HashMap<ParticipantId, Version>,
    created_at: DateTime<Utc>,
    last_activity: Instant,
}

impl Session {
    /// A new session starts in `Joining`.
    pub fn new(document_id: impl Into<DocumentId>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            document_id: document_id.into(),
            state: SessionState::Joining,
            participants: HashMap::new(),
            per_participant_version: HashMap::new(),
            created_at: Utc::now(),
            last_activity: Instant::now(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// `Joining → Active`, once the document has been loaded.
    pub fn activate(&mut self) -> Result<()> {
        if self.state != SessionState::Joining {
            return Err(self.not_active());
        }
        self.transition(SessionState::Active);
        self.touch();
        Ok(())
    }

    /// Start closing. Returns false if the session was already closing.
    pub fn begin_close(&mut self) -> bool {
        match self.state {
            SessionState::Joining | SessionState::Active => {
                self.transition(SessionState::Closing);
                true
            }
            SessionState::Closing | SessionState::Closed => false,
        }
    }

    /// `Closing → Closed`.
    pub fn finish_close(&mut self) {
        if self.state == SessionState::Closing {
            self.transition(SessionState::Closed);
        }
    }

    fn transition(&mut self, to: SessionState) {
        info!(
            "Session {} for {}: {:?} -> {:?}",
            self.session_id, self.document_id, self.state, to
        );
        self.state = to;
    }

    pub fn ensure_active(&self) -> Result<()> {
        if self.state == SessionState::Active {
            Ok(())
        } else {
            Err(self.not_active())
        }
    }

    pub(crate) fn not_active(&self) -> SyncError {
        SyncError::SessionNotActive {
            session_id: self.session_id,
            state: self.state,
        }
    }

    pub fn ensure_participant(&self, participant_id: &str) -> Result<()> {
        if self.participants.contains_key(participant_id) {
            Ok(())
        } else {
            Err(SyncError::NotAParticipant {
                session_id: self.session_id,
                participant_id: participant_id.to_string(),
            })
        }
    }

    pub fn is_participant(&self, participant_id: &str) -> bool {
        self.participants.contains_key(participant_id)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Add (or re-add) a participant, who has now seen `version`.
    pub fn add_participant(&mut self, participant: Participant, version: Version) {
        self.per_participant_version
            .insert(participant.id.clone(), version);
        self.participants.insert(participant.id.clone(), participant);
    }

    /// Remove a participant. Returns true if nobody is left.
    pub fn remove_participant(&mut self, participant_id: &str) -> Result<bool> {
        self.ensure_participant(participant_id)?;
        self.participants.remove(participant_id);
        self.per_participant_version.remove(participant_id);
        Ok(self.participants.is_empty())
    }

    /// Record that a participant has seen `version`. Never moves backwards.
    pub fn acknowledge(&mut self, participant_id: &str, version: Version) -> Result<()> {
        self.ensure_participant(participant_id)?;
        let acked = self
            .per_participant_version
            .entry(participant_id.to_string())
            .or_insert(0);
        *acked = (*acked).max(version);
        Ok(())
    }

    pub fn acknowledged(&self, participant_id: &str) -> Option<Version> {
        self.per_participant_version.get(participant_id).copied()
    }

    pub fn info(&self) -> SessionInfo {
        let mut participants: Vec<Participant> = self.participants.values().cloned().collect();
        participants.sort_by(|a, b| a.id.cmp(&b.id));
        SessionInfo {
            session_id: self.session_id,
            document_id: self.document_id.clone(),
            state: self.state,
            participants,
            per_participant_version: self
                .per_participant_version
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let mut session = Session::new("doc");
        assert_eq!(session.state(), SessionState::Joining);
        assert!(session.ensure_active().is_err());

        session.activate().unwrap();
        assert!(session.ensure_active().is_ok());
        assert!(session.activate().is_err());

        assert!(session.begin_close());
        assert!(!session.begin_close());
        assert_eq!(session.state(), SessionState::Closing);
        assert!(matches!(
            session.ensure_active(),
            Err(SyncError::SessionNotActive {
                state: SessionState::Closing,
                ..
            })
        ));

        session.finish_close();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_participants_and_acks() {
        let mut session = Session::new("doc");
        session.activate().unwrap();
        session.add_participant(Participant::human("alice"), 3);
        session.add_participant(Participant::automated("assistant"), 3);

        session.acknowledge("alice", 5).unwrap();
        session.acknowledge("alice", 4).unwrap();
        assert_eq!(session.acknowledged("alice"), Some(5));
        assert!(session.acknowledge("mallory", 1).is_err());

        assert!(!session.remove_participant("alice").unwrap());
        assert!(session.remove_participant("assistant").unwrap());
        assert!(session.remove_participant("assistant").is_err());
    }

    #[test]
    fn test_info_is_sorted() {
        let mut session = Session::new("doc");
        session.add_participant(Participant::human("zoe"), 0);
        session.add_participant(Participant::human("adam"), 0);

        let info = session.info();
        let ids: Vec<_> = info.participants.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["adam", "zoe"]);
        assert_eq!(info.per_participant_version.len(), 2);
    }
}
