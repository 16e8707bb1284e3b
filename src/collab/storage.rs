use std::collections::HashMap;
#[cfg(any(test, feature = "test-util"))]
use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Result, SyncError};
use crate::ot::{DocumentId, Operation, Version};
use crate::workflow::{BranchId, StepDiff};

/// Durable storage for document logs and branch modifications.
///
/// The core never touches storage directly; every read and write of the
/// operation log goes through this trait.
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    /// Register a new, empty document
    async fn create_document(&self, document_id: &DocumentId) -> Result<()>;

    /// Check whether a document has been created
    async fn document_exists(&self, document_id: &DocumentId) -> Result<bool>;

    /// Append an accepted operation to the document's log
    async fn append_operation(&self, document_id: &DocumentId, op: &Operation) -> Result<()>;

    /// Load accepted operations with `version > since_version`, in order
    async fn load_history(
        &self,
        document_id: &DocumentId,
        since_version: Version,
    ) -> Result<Vec<Operation>>;

    /// Append a structural diff to a branch's modification log
    async fn append_modification(&self, branch_id: BranchId, diff: &StepDiff) -> Result<()>;
}

/// In-process storage, suitable for tests and single-node deployments.
#[derive(Default)]
pub struct MemoryStorage {
    documents: RwLock<HashMap<DocumentId, Vec<Operation>>>,
    modifications: RwLock<HashMap<BranchId, Vec<StepDiff>>>,
    /// Documents whose appends fail, for exercising error paths
    #[cfg(any(test, feature = "test-util"))]
    failing: RwLock<HashSet<DocumentId>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// All modifications recorded for a branch.
    pub async fn modifications(&self, branch_id: BranchId) -> Vec<StepDiff> {
        self.modifications
            .read()
            .await
            .get(&branch_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Make appends for `document_id` fail until cleared.
    #[cfg(any(test, feature = "test-util"))]
    pub async fn fail_appends(&self, document_id: &DocumentId, failing: bool) {
        let mut set = self.failing.write().await;
        if failing {
            set.insert(document_id.clone());
        } else {
            set.remove(document_id);
        }
    }

    /// Overwrite a document's log, bypassing the append path.
    #[cfg(any(test, feature = "test-util"))]
    pub async fn import_log(&self, document_id: &DocumentId, ops: Vec<Operation>) {
        self.documents.write().await.insert(document_id.clone(), ops);
    }
}

#[async_trait]
impl DocumentStorage for MemoryStorage {
    async fn create_document(&self, document_id: &DocumentId) -> Result<()> {
        let mut docs = self.documents.write().await;
        if docs.contains_key(document_id) {
            return Err(SyncError::DocumentAlreadyExists(document_id.clone()));
        }
        docs.insert(document_id.clone(), Vec::new());
        Ok(())
    }

    async fn document_exists(&self, document_id: &DocumentId) -> Result<bool> {
        Ok(self.documents.read().await.contains_key(document_id))
    }

    async fn append_operation(&self, document_id: &DocumentId, op: &Operation) -> Result<()> {
        #[cfg(any(test, feature = "test-util"))]
        if self.failing.read().await.contains(document_id) {
            return Err(SyncError::Storage(format!(
                "append to {} refused",
                document_id
            )));
        }
        let mut docs = self.documents.write().await;
        let log = docs
            .get_mut(document_id)
            .ok_or_else(|| SyncError::DocumentNotFound(document_id.clone()))?;
        log.push(op.clone());
        Ok(())
    }

    async fn load_history(
        &self,
        document_id: &DocumentId,
        since_version: Version,
    ) -> Result<Vec<Operation>> {
        let docs = self.documents.read().await;
        let log = docs
            .get(document_id)
            .ok_or_else(|| SyncError::DocumentNotFound(document_id.clone()))?;
        Ok(log
            .iter()
            .filter(|op| op.version.map_or(false, |v| v > since_version))
            .cloned()
            .collect())
    }

    async fn append_modification(&self, branch_id: BranchId, diff: &StepDiff) -> Result<()> {
        self.modifications
            .write()
            .await
            .entry(branch_id)
            .or_default()
            .push(diff.clone());
        Ok(())
    }
}
