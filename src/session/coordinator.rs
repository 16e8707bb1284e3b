use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::info;
use tokio::sync::RwLock;

use super::actor::{DocumentActor, DocumentHandle, Registry};
use super::state::{JoinResponse, Participant, Session, SessionId, SessionInfo, SubmitReceipt};
use crate::collab::{Broadcaster, DocumentStorage};
use crate::config::SyncConfig;
use crate::document::{DocumentSnapshot, DocumentStore};
use crate::error::{Result, SyncError};
use crate::ot::{DocumentId, Operation, ParticipantId, RawOperation, Version};

/// Entry point for everything that happens to a document.
///
/// The coordinator itself holds no document state. It routes each request
/// to the document's actor, opening one on first join. Requests for
/// different documents never wait on each other.
pub struct SessionCoordinator {
    config: SyncConfig,
    storage: Arc<dyn DocumentStorage>,
    broadcaster: Arc<dyn Broadcaster>,
    registry: Arc<RwLock<Registry>>,
    /// Serializes actor start-up per document
    opening: Mutex<HashMap<DocumentId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionCoordinator {
    pub fn new(
        config: SyncConfig,
        storage: Arc<dyn DocumentStorage>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            config,
            storage,
            broadcaster,
            registry: Arc::new(RwLock::new(Registry::default())),
            opening: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn create_document(&self, document_id: impl Into<DocumentId>) -> Result<()> {
        let document_id = document_id.into();
        self.storage.create_document(&document_id).await?;
        info!("Created document {}", document_id);
        Ok(())
    }

    /// Join a document, opening a session for it if none is active.
    pub async fn join(&self, document_id: &str, participant: Participant) -> Result<JoinResponse> {
        let gate = self.gate(document_id);
        let joined = {
            let _opening = gate.lock().await;
            self.join_gated(document_id, participant).await
        };
        self.release_gate(document_id, gate);
        joined
    }

    async fn join_gated(&self, document_id: &str, participant: Participant) -> Result<JoinResponse> {
        let existing = self.registry.read().await.for_document(document_id);
        if let Some(handle) = existing {
            match handle.join(participant.clone()).await {
                Err(SyncError::SessionNotFound(_)) | Err(SyncError::SessionNotActive { .. }) => {
                    // The old session is on its way out; start a fresh one.
                    self.registry
                        .write()
                        .await
                        .remove(handle.session_id, document_id);
                }
                other => return other,
            }
        }

        let handle = self.open(document_id).await?;
        handle.join(participant).await
    }

    async fn open(&self, document_id: &str) -> Result<DocumentHandle> {
        let document_id = document_id.to_string();
        if !self.storage.document_exists(&document_id).await? {
            return Err(SyncError::DocumentNotFound(document_id));
        }

        let history = self.storage.load_history(&document_id, 0).await?;
        let store = DocumentStore::replay(
            document_id.clone(),
            history,
            self.config.history_retention,
        )?;

        let mut session = Session::new(document_id.clone());
        session.activate()?;
        info!(
            "Opened session {} for {} at v{}",
            session.session_id(),
            document_id,
            store.version()
        );

        let handle = DocumentActor::spawn(
            store,
            session,
            self.storage.clone(),
            self.broadcaster.clone(),
            self.registry.clone(),
            self.config.idle_timeout(),
            self.config.mailbox_capacity,
        );
        self.registry.write().await.insert(handle.clone());
        Ok(handle)
    }

    fn gate(&self, document_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut opening = self.opening.lock().unwrap_or_else(|e| e.into_inner());
        opening
            .entry(document_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the gate for `document_id` once nobody else is waiting on it.
    fn release_gate(&self, document_id: &str, gate: Arc<tokio::sync::Mutex<()>>) {
        let mut opening = self.opening.lock().unwrap_or_else(|e| e.into_inner());
        let idle = opening
            .get(document_id)
            .map_or(false, |entry| Arc::ptr_eq(entry, &gate) && Arc::strong_count(&gate) == 2);
        if idle {
            opening.remove(document_id);
        }
    }

    async fn handle(&self, session_id: SessionId) -> Result<DocumentHandle> {
        self.registry
            .read()
            .await
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or(SyncError::SessionNotFound(session_id))
    }

    pub async fn leave(&self, session_id: SessionId, participant_id: impl Into<ParticipantId>) -> Result<()> {
        self.handle(session_id)
            .await?
            .leave(participant_id.into())
            .await
    }

    /// Submit an operation on behalf of `author_id`.
    pub async fn submit(
        &self,
        session_id: SessionId,
        author_id: impl Into<ParticipantId>,
        raw: RawOperation,
    ) -> Result<SubmitReceipt> {
        self.handle(session_id)
            .await?
            .submit(author_id.into(), raw)
            .await
    }

    /// Record the latest version a participant has applied locally.
    pub async fn acknowledge(
        &self,
        session_id: SessionId,
        participant_id: impl Into<ParticipantId>,
        version: Version,
    ) -> Result<()> {
        self.handle(session_id)
            .await?
            .acknowledge(participant_id.into(), version)
            .await
    }

    pub async fn snapshot(&self, session_id: SessionId) -> Result<DocumentSnapshot> {
        self.handle(session_id).await?.snapshot().await
    }

    /// Accepted operations after `version`, for clients catching up.
    pub async fn history_since(&self, session_id: SessionId, version: Version) -> Result<Vec<Operation>> {
        self.handle(session_id).await?.history_since(version).await
    }

    pub async fn session_info(&self, session_id: SessionId) -> Result<SessionInfo> {
        self.handle(session_id).await?.info().await
    }

    pub async fn session_for_document(&self, document_id: &str) -> Option<SessionId> {
        self.registry
            .read()
            .await
            .for_document(document_id)
            .map(|handle| handle.session_id)
    }

    /// Close a session once in-flight work has drained.
    pub async fn close_session(&self, session_id: SessionId) -> Result<()> {
        self.handle(session_id).await?.close().await
    }

    pub async fn active_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.registry.read().await.sessions.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Close every open session.
    pub async fn shutdown(&self) {
        let handles: Vec<DocumentHandle> = self
            .registry
            .read()
            .await
            .sessions
            .values()
            .cloned()
            .collect();
        for handle in handles {
            if let Err(e) = handle.close().await {
                info!("Session {} already gone: {}", handle.session_id, e);
            }
        }
    }
}
