//! The per-document actor.
//!
//! Every open document is owned by exactly one task. Commands arrive on a
//! bounded mailbox and are handled one at a time, so transform and apply
//! never race. Accepted operations are handed to a separate pump task that
//! talks to the broadcaster.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep_until;

use super::state::{JoinResponse, Participant, Session, SessionId, SessionInfo, SubmitReceipt};
use crate::collab::{Broadcaster, DocumentStorage};
use crate::document::{DocumentSnapshot, DocumentStore};
use crate::error::{Result, SyncError};
use crate::ot::{DocumentId, Operation, OtEngine, ParticipantId, RawOperation, Version};

type Reply<T> = oneshot::Sender<Result<T>>;

pub(crate) enum Command {
    Join {
        participant: Participant,
        reply: Reply<JoinResponse>,
    },
    Leave {
        participant_id: ParticipantId,
        reply: Reply<()>,
    },
    Submit {
        author_id: ParticipantId,
        raw: RawOperation,
        reply: Reply<SubmitReceipt>,
    },
    Acknowledge {
        participant_id: ParticipantId,
        version: Version,
        reply: Reply<()>,
    },
    Snapshot {
        reply: Reply<DocumentSnapshot>,
    },
    HistorySince {
        version: Version,
        reply: Reply<Vec<Operation>>,
    },
    Info {
        reply: Reply<SessionInfo>,
    },
    Close {
        reply: Reply<()>,
    },
}

impl Command {
    /// Answer a command that arrived after the session stopped accepting work.
    fn reject(self, err: SyncError) {
        match self {
            Command::Join { reply, .. } => drop(reply.send(Err(err))),
            Command::Leave { reply, .. } => drop(reply.send(Err(err))),
            Command::Submit { reply, .. } => drop(reply.send(Err(err))),
            Command::Acknowledge { reply, .. } => drop(reply.send(Err(err))),
            Command::Snapshot { reply } => drop(reply.send(Err(err))),
            Command::HistorySince { reply, .. } => drop(reply.send(Err(err))),
            Command::Info { reply } => drop(reply.send(Err(err))),
            // Closing an already closing session is fine.
            Command::Close { reply } => drop(reply.send(Ok(()))),
        }
    }
}

/// Address of a running document actor.
#[derive(Clone)]
pub(crate) struct DocumentHandle {
    pub session_id: SessionId,
    pub document_id: DocumentId,
    tx: mpsc::Sender<Command>,
}

impl DocumentHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SyncError::SessionNotFound(self.session_id))?;
        rx.await
            .map_err(|_| SyncError::ActorUnavailable(self.document_id.clone()))?
    }

    pub async fn join(&self, participant: Participant) -> Result<JoinResponse> {
        self.request(|reply| Command::Join { participant, reply })
            .await
    }

    pub async fn leave(&self, participant_id: ParticipantId) -> Result<()> {
        self.request(|reply| Command::Leave {
            participant_id,
            reply,
        })
        .await
    }

    pub async fn submit(&self, author_id: ParticipantId, raw: RawOperation) -> Result<SubmitReceipt> {
        self.request(|reply| Command::Submit {
            author_id,
            raw,
            reply,
        })
        .await
    }

    pub async fn acknowledge(&self, participant_id: ParticipantId, version: Version) -> Result<()> {
        self.request(|reply| Command::Acknowledge {
            participant_id,
            version,
            reply,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<DocumentSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn history_since(&self, version: Version) -> Result<Vec<Operation>> {
        self.request(|reply| Command::HistorySince { version, reply })
            .await
    }

    pub async fn info(&self) -> Result<SessionInfo> {
        self.request(|reply| Command::Info { reply }).await
    }

    pub async fn close(&self) -> Result<()> {
        self.request(|reply| Command::Close { reply }).await
    }
}

/// Which sessions are open, by id and by document.
#[derive(Default)]
pub(crate) struct Registry {
    pub sessions: HashMap<SessionId, DocumentHandle>,
    pub documents: HashMap<DocumentId, SessionId>,
}

impl Registry {
    pub fn insert(&mut self, handle: DocumentHandle) {
        self.documents
            .insert(handle.document_id.clone(), handle.session_id);
        self.sessions.insert(handle.session_id, handle);
    }

    pub fn for_document(&self, document_id: &str) -> Option<DocumentHandle> {
        self.documents
            .get(document_id)
            .and_then(|id| self.sessions.get(id))
            .cloned()
    }

    /// Remove a session. The document entry is only cleared if it still
    /// points at this session.
    pub fn remove(&mut self, session_id: SessionId, document_id: &str) {
        self.sessions.remove(&session_id);
        if self.documents.get(document_id) == Some(&session_id) {
            self.documents.remove(document_id);
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

pub(crate) struct DocumentActor {
    store: DocumentStore,
    session: Session,
    engine: OtEngine,
    storage: Arc<dyn DocumentStorage>,
    outbox: Option<mpsc::UnboundedSender<Operation>>,
    pump: Option<JoinHandle<()>>,
    registry: Arc<RwLock<Registry>>,
    idle_timeout: Duration,
    halted: bool,
    close_waiters: Vec<Reply<()>>,
}

impl DocumentActor {
    /// Spawn the actor and its broadcast pump. The session must already be
    /// active.
    pub fn spawn(
        store: DocumentStore,
        session: Session,
        storage: Arc<dyn DocumentStorage>,
        broadcaster: Arc<dyn Broadcaster>,
        registry: Arc<RwLock<Registry>>,
        idle_timeout: Duration,
        mailbox_capacity: usize,
    ) -> DocumentHandle {
        let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
        let (outbox, pending) = mpsc::unbounded_channel();

        let handle = DocumentHandle {
            session_id: session.session_id(),
            document_id: store.document_id().to_string(),
            tx,
        };

        let pump = tokio::spawn(pump(
            handle.document_id.clone(),
            broadcaster,
            pending,
            store.version(),
        ));

        let actor = DocumentActor {
            store,
            session,
            engine: OtEngine::new(),
            storage,
            outbox: Some(outbox),
            pump: Some(pump),
            registry,
            idle_timeout,
            halted: false,
            close_waiters: Vec::new(),
        };
        tokio::spawn(actor.run(rx));

        handle
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        loop {
            let deadline = self.session.last_activity() + self.idle_timeout;
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => {
                        if let Flow::Stop = self.handle(command).await {
                            break;
                        }
                    }
                    None => break,
                },
                _ = sleep_until(deadline) => {
                    info!(
                        "Session {} for {} idle for {:?}, closing",
                        self.session.session_id(),
                        self.store.document_id(),
                        self.idle_timeout
                    );
                    break;
                }
            }
        }
        self.shutdown(rx).await;
    }

    async fn handle(&mut self, command: Command) -> Flow {
        match command {
            Command::Join { participant, reply } => {
                let _ = reply.send(self.join(participant));
            }
            Command::Leave {
                participant_id,
                reply,
            } => match self.session.remove_participant(&participant_id) {
                Ok(true) => {
                    info!(
                        "Last participant {} left {}",
                        participant_id,
                        self.store.document_id()
                    );
                    self.close_waiters.push(reply);
                    return Flow::Stop;
                }
                Ok(false) => {
                    let _ = reply.send(Ok(()));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Submit {
                author_id,
                raw,
                reply,
            } => {
                let result = self.submit(author_id, raw).await;
                let _ = reply.send(result);
            }
            Command::Acknowledge {
                participant_id,
                version,
                reply,
            } => {
                let result = if version > self.store.version() {
                    Err(SyncError::InvalidOperation(format!(
                        "acknowledged version {} is ahead of {}",
                        version,
                        self.store.version()
                    )))
                } else {
                    self.session.acknowledge(&participant_id, version)
                };
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(Ok(self.store.snapshot()));
            }
            Command::HistorySince { version, reply } => {
                let _ = reply.send(self.store.history_since(version));
            }
            Command::Info { reply } => {
                let _ = reply.send(Ok(self.session.info()));
            }
            Command::Close { reply } => {
                self.close_waiters.push(reply);
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn join(&mut self, participant: Participant) -> Result<JoinResponse> {
        self.session.ensure_active()?;
        info!(
            "{:?} participant {} joined {} at v{}",
            participant.kind,
            participant.id,
            self.store.document_id(),
            self.store.version()
        );
        self.session
            .add_participant(participant, self.store.version());
        self.session.touch();
        Ok(JoinResponse {
            session_id: self.session.session_id(),
            document_id: self.store.document_id().to_string(),
            current_content: self.store.content().to_string(),
            current_version: self.store.version(),
            digest: self.store.digest(),
        })
    }

    async fn submit(&mut self, author_id: ParticipantId, raw: RawOperation) -> Result<SubmitReceipt> {
        if self.halted {
            return Err(SyncError::DocumentHalted(self.store.document_id().to_string()));
        }
        self.session.ensure_active()?;
        self.session.ensure_participant(&author_id)?;
        if raw.author_id != author_id {
            return Err(SyncError::InvalidOperation(format!(
                "operation authored by {} submitted by {}",
                raw.author_id, author_id
            )));
        }
        self.session.touch();

        let op = Operation::from_raw(raw);
        let rebased = match self.engine.rebase(&self.store, &op) {
            Ok(rebased) => rebased,
            Err(e) => {
                if let SyncError::InvalidOperation(_) = e {
                    warn!("Rejecting {} from {}: {}", op.op_id, author_id, e);
                }
                return Err(self.escalate(e));
            }
        };
        let accepted = rebased.accepted(self.store.version() + 1);

        self.storage
            .append_operation(&op.document_id, &accepted)
            .await?;

        let applied = self
            .engine
            .apply(&mut self.store, accepted)
            .map_err(|e| self.escalate(e))?;
        let new_version = self.store.version();
        self.session.acknowledge(&author_id, new_version)?;

        debug!(
            "Accepted {} from {} on {} as v{} (based on v{})",
            applied.op_id,
            author_id,
            self.store.document_id(),
            new_version,
            applied.base_version
        );

        if let Some(outbox) = &self.outbox {
            let _ = outbox.send(applied.clone());
        }

        Ok(SubmitReceipt {
            new_version,
            transformed_op: applied,
        })
    }

    /// Halt the document on errors that mean its history can no longer be
    /// trusted.
    fn escalate(&mut self, e: SyncError) -> SyncError {
        if e.is_fatal() && !self.halted {
            error!(
                "Halting {}: {}",
                self.store.document_id(),
                e
            );
            self.halted = true;
        }
        e
    }

    async fn shutdown(mut self, mut rx: mpsc::Receiver<Command>) {
        self.session.begin_close();
        rx.close();
        while let Some(command) = rx.recv().await {
            match command {
                Command::Close { reply } => self.close_waiters.push(reply),
                other => other.reject(self.session.not_active()),
            }
        }

        // Dropping the outbox lets the pump drain and exit.
        self.outbox.take();
        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                warn!(
                    "Broadcast pump for {} ended abnormally: {}",
                    self.store.document_id(),
                    e
                );
            }
        }

        self.session.finish_close();
        self.registry
            .write()
            .await
            .remove(self.session.session_id(), self.store.document_id());

        for waiter in self.close_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }
}

/// Publish accepted operations in acceptance order, each version once.
async fn pump(
    document_id: DocumentId,
    broadcaster: Arc<dyn Broadcaster>,
    mut pending: mpsc::UnboundedReceiver<Operation>,
    mut last_published: Version,
) {
    while let Some(op) = pending.recv().await {
        let Some(version) = op.version else {
            continue;
        };
        if version <= last_published {
            continue;
        }
        last_published = version;
        if let Err(e) = broadcaster.publish(&document_id, &op).await {
            warn!("Failed to publish v{} of {}: {}", version, document_id, e);
        }
    }
}
