//! The DocumentStore: materialized content plus bounded operation history
//!
//! A store owns exactly one document. Content only changes through
//! [`DocumentStore::apply`], called by the OT engine after a rebase and by
//! [`DocumentStore::replay`] when a document is reopened.

use std::collections::VecDeque;

use log::error;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, SyncError};
use crate::ot::{char_len, DocumentId, Operation, Version};

/// Point-in-time copy of a document, used for joins and resync.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub document_id: DocumentId,
    pub content: String,
    pub version: Version,
    /// Hex SHA-256 of `content`
    pub digest: String,
}

#[derive(Debug)]
pub struct DocumentStore {
    document_id: DocumentId,
    content: String,
    /// Cached char count of `content`
    len: usize,
    version: Version,
    /// Accepted operations, oldest first; `history[i].version == floor + i + 1`
    history: VecDeque<Operation>,
    retention: usize,
}

impl DocumentStore {
    /// Create an empty document at version 0.
    pub fn new(document_id: impl Into<DocumentId>, retention: usize) -> Self {
        Self {
            document_id: document_id.into(),
            content: String::new(),
            len: 0,
            version: 0,
            history: VecDeque::new(),
            retention: retention.max(1),
        }
    }

    /// Rebuild a document from its persisted log.
    ///
    /// The log must start at version 1 and be gap-free; anything else
    /// means the append-only history was corrupted.
    pub fn replay(
        document_id: impl Into<DocumentId>,
        ops: impl IntoIterator<Item = Operation>,
        retention: usize,
    ) -> Result<Self> {
        let mut store = Self::new(document_id, retention);
        for op in ops {
            let expected = store.version + 1;
            match op.version {
                Some(found) if found == expected => {}
                found => {
                    let found = found.unwrap_or(0);
                    error!(
                        "History for {} is corrupted: expected v{}, found v{}",
                        store.document_id, expected, found
                    );
                    return Err(SyncError::HistoryCorrupted {
                        document_id: store.document_id.clone(),
                        expected,
                        found,
                    });
                }
            }
            store.apply(op)?;
        }
        Ok(store)
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Content length in chars.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Oldest base version that can still be transformed.
    pub fn oldest_retained_base(&self) -> Version {
        self.version - self.history.len() as Version
    }

    /// Number of operations currently retained.
    pub fn retained(&self) -> usize {
        self.history.len()
    }

    /// Accepted operations with `version > since`, in version order.
    pub fn history_since(&self, since: Version) -> Result<Vec<Operation>> {
        Ok(self
            .concurrent_with(since)?
            .into_iter()
            .cloned()
            .collect())
    }

    /// Borrowing form of [`history_since`](Self::history_since).
    pub(crate) fn concurrent_with(&self, since: Version) -> Result<Vec<&Operation>> {
        if since > self.version {
            return Err(SyncError::InvalidOperation(format!(
                "base version {} is ahead of current version {}",
                since, self.version
            )));
        }
        let floor = self.oldest_retained_base();
        if since < floor {
            return Err(SyncError::StaleOperation {
                base_version: since,
                oldest_retained: floor,
            });
        }
        let skip = (since - floor) as usize;
        Ok(self.history.iter().skip(skip).collect())
    }

    /// Append a transformed operation and return it stamped with its version.
    ///
    /// Operations already carrying a version (replay) must carry the next one.
    pub(crate) fn apply(&mut self, op: Operation) -> Result<Operation> {
        if op.document_id != self.document_id {
            return Err(SyncError::InvalidOperation(format!(
                "operation for {} applied to {}",
                op.document_id, self.document_id
            )));
        }
        let next = self.version + 1;
        if let Some(found) = op.version {
            if found != next {
                return Err(SyncError::HistoryCorrupted {
                    document_id: self.document_id.clone(),
                    expected: next,
                    found,
                });
            }
        }

        let content = op.apply_to(&self.content)?;
        let op = op.accepted(next);

        self.len = char_len(&content);
        self.content = content;
        self.version = next;
        self.history.push_back(op.clone());
        while self.history.len() > self.retention {
            self.history.pop_front();
        }

        Ok(op)
    }

    /// Hex SHA-256 of the current content.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.content.as_bytes()))
    }

    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            document_id: self.document_id.clone(),
            content: self.content.clone(),
            version: self.version,
            digest: self.digest(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ot::RawOperation;

    fn insert(position: usize, text: &str) -> Operation {
        Operation::from_raw(RawOperation::insert("doc", "alice", 0, position, text))
    }

    #[test]
    fn test_apply_and_history() {
        let mut store = DocumentStore::new("doc", 10);
        store.apply(insert(0, "ab")).unwrap();
        store.apply(insert(2, "cd")).unwrap();

        assert_eq!(store.content(), "abcd");
        assert_eq!(store.version(), 2);
        assert_eq!(store.len(), 4);

        let since = store.history_since(1).unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].version, Some(2));
        assert!(store.history_since(2).unwrap().is_empty());
    }

    #[test]
    fn test_retention_makes_old_bases_stale() {
        let mut store = DocumentStore::new("doc", 2);
        for i in 0..5 {
            store.apply(insert(i, "x")).unwrap();
        }

        assert_eq!(store.retained(), 2);
        assert_eq!(store.oldest_retained_base(), 3);
        assert!(store.history_since(3).is_ok());
        assert_eq!(
            store.history_since(2),
            Err(SyncError::StaleOperation {
                base_version: 2,
                oldest_retained: 3
            })
        );
    }

    #[test]
    fn test_replay_rebuilds_content() {
        let mut original = DocumentStore::new("doc", 10);
        let log: Vec<Operation> = ["a", "b", "c"]
            .iter()
            .enumerate()
            .map(|(i, text)| original.apply(insert(i, text)).unwrap())
            .collect();

        let replayed = DocumentStore::replay("doc", log, 10).unwrap();
        assert_eq!(replayed.snapshot(), original.snapshot());
    }

    #[test]
    fn test_replay_detects_gap() {
        let mut original = DocumentStore::new("doc", 10);
        let first = original.apply(insert(0, "a")).unwrap();
        let _second = original.apply(insert(1, "b")).unwrap();
        let third = original.apply(insert(2, "c")).unwrap();

        let err = DocumentStore::replay("doc", vec![first, third], 10).unwrap_err();
        assert_eq!(
            err,
            SyncError::HistoryCorrupted {
                document_id: "doc".into(),
                expected: 2,
                found: 3
            }
        );
    }

    #[test]
    fn test_digest_tracks_content() {
        let mut a = DocumentStore::new("doc", 4);
        let mut b = DocumentStore::new("doc", 4);
        assert_eq!(a.digest(), b.digest());

        a.apply(insert(0, "x")).unwrap();
        assert_ne!(a.digest(), b.digest());

        b.apply(insert(0, "x")).unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }
}
