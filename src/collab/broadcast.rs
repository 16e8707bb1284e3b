use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;
#[cfg(any(test, feature = "test-util"))]
use crate::error::SyncError;
use crate::ot::{DocumentId, Operation};

/// Fan-out of accepted operations to the other participants of a document.
///
/// Called once per accepted operation, after it has been applied and
/// persisted, in acceptance order.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, document_id: &DocumentId, op: &Operation) -> Result<()>;
}

/// A published operation as seen by subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Published {
    pub document_id: DocumentId,
    pub op: Operation,
}

/// In-process broadcaster backed by a `tokio::sync::broadcast` channel.
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<Published>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to every published operation.
    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl Broadcaster for ChannelBroadcaster {
    async fn publish(&self, document_id: &DocumentId, op: &Operation) -> Result<()> {
        // No subscribers is not an error: nobody else is listening yet.
        let _ = self.tx.send(Published {
            document_id: document_id.clone(),
            op: op.clone(),
        });
        Ok(())
    }
}

/// Broadcaster that drops everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullBroadcaster;

#[async_trait]
impl Broadcaster for NullBroadcaster {
    async fn publish(&self, _document_id: &DocumentId, _op: &Operation) -> Result<()> {
        Ok(())
    }
}

/// Broadcaster that always fails, for exercising the pump's error path.
#[cfg(any(test, feature = "test-util"))]
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingBroadcaster;

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl Broadcaster for FailingBroadcaster {
    async fn publish(&self, document_id: &DocumentId, _op: &Operation) -> Result<()> {
        Err(SyncError::Broadcast(format!("no route for {}", document_id)))
    }
}
