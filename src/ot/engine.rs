//! The OT engine: validates an incoming operation against a document and
//! rebases it over the history its author had not seen.

use log::warn;

use super::operation::{char_slice, OpKind, Operation};
use super::transform::transform;
use crate::document::DocumentStore;
use crate::error::{Result, SyncError};

#[derive(Clone, Copy, Debug, Default)]
pub struct OtEngine;

impl OtEngine {
    pub fn new() -> Self {
        Self
    }

    /// Rebase `op` so it applies cleanly to the store's current state.
    ///
    /// The concurrent window is `history_since(op.base_version)`. Fails
    /// with `StaleOperation` if that window was pruned and with
    /// `InvalidOperation` if the op does not fit the content its author saw.
    pub fn rebase(&self, store: &DocumentStore, op: &Operation) -> Result<Operation> {
        if op.document_id != store.document_id() {
            return Err(SyncError::InvalidOperation(format!(
                "operation targets {} but was routed to {}",
                op.document_id,
                store.document_id()
            )));
        }
        if op.payload.is_empty() {
            return Err(SyncError::InvalidOperation(format!(
                "{:?} with an empty payload",
                op.kind
            )));
        }

        let concurrent = store.concurrent_with(op.base_version).map_err(|e| {
            warn!(
                "Rejecting {} from {} on {}: {}",
                op.op_id, op.author_id, op.document_id, e
            );
            e
        })?;

        let net: i64 = concurrent.iter().map(|seen| seen.net_change()).sum();
        let base_len = store.len() as i64 - net;
        if base_len < 0 {
            return Err(SyncError::HistoryCorrupted {
                document_id: store.document_id().to_string(),
                expected: store.version(),
                found: op.base_version,
            });
        }
        op.check_bounds(base_len as usize)?;

        let rebased = transform(op, concurrent);
        rebased.check_bounds(store.len())?;

        if rebased.kind == OpKind::Delete {
            let removed = char_slice(store.content(), rebased.position, rebased.end());
            if removed != rebased.payload {
                warn!(
                    "Delete {} from {} does not match document text",
                    op.op_id, op.author_id
                );
                return Err(SyncError::InvalidOperation(format!(
                    "delete payload {:?} does not match document text {:?}",
                    rebased.payload, removed
                )));
            }
        }

        Ok(rebased)
    }

    /// Append a rebased operation to the store. This is the single write
    /// path into a document.
    pub(crate) fn apply(&self, store: &mut DocumentStore, rebased: Operation) -> Result<Operation> {
        store.apply(rebased)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ot::RawOperation;

    fn store() -> DocumentStore {
        DocumentStore::new("doc", 8)
    }

    fn op(raw: RawOperation) -> Operation {
        Operation::from_raw(raw)
    }

    trait Integrate {
        fn integrate(&self, store: &mut DocumentStore, op: &Operation) -> Result<Operation>;
    }

    impl Integrate for OtEngine {
        fn integrate(&self, store: &mut DocumentStore, op: &Operation) -> Result<Operation> {
            let rebased = self.rebase(store, op)?;
            self.apply(store, rebased)
        }
    }

    #[test]
    fn test_sequential_ops_need_no_transform() {
        let engine = OtEngine::new();
        let mut store = store();

        let first = op(RawOperation::insert("doc", "alice", 0, 0, "hello"));
        engine.integrate(&mut store, &first).unwrap();

        let second = op(RawOperation::insert("doc", "alice", 1, 5, " world"));
        let accepted = engine.integrate(&mut store, &second).unwrap();

        assert_eq!(accepted.position, 5);
        assert_eq!(accepted.version, Some(2));
        assert_eq!(store.content(), "hello world");
    }

    #[test]
    fn test_concurrent_inserts_converge() {
        let engine = OtEngine::new();
        let mut store = store();

        let bob = op(RawOperation::insert("doc", "bob", 0, 0, "Y"));
        let alice = op(RawOperation::insert("doc", "alice", 0, 0, "X"));
        engine.integrate(&mut store, &bob).unwrap();
        engine.integrate(&mut store, &alice).unwrap();

        assert_eq!(store.content(), "XY");
    }

    #[test]
    fn test_out_of_bounds_at_base_rejected() {
        let engine = OtEngine::new();
        let mut store = store();
        engine
            .integrate(&mut store, &op(RawOperation::insert("doc", "a", 0, 0, "abc")))
            .unwrap();

        let bad = op(RawOperation::insert("doc", "b", 0, 1, "x"));
        assert!(matches!(
            engine.integrate(&mut store, &bad),
            Err(SyncError::InvalidOperation(_))
        ));
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn test_delete_payload_must_match() {
        let engine = OtEngine::new();
        let mut store = store();
        engine
            .integrate(&mut store, &op(RawOperation::insert("doc", "a", 0, 0, "hello")))
            .unwrap();

        let wrong = op(RawOperation::delete("doc", "a", 1, 0, "xx"));
        assert!(engine.integrate(&mut store, &wrong).is_err());
        assert_eq!(store.content(), "hello");
    }

    #[test]
    fn test_future_base_version_rejected() {
        let engine = OtEngine::new();
        let store = store();
        let ahead = op(RawOperation::insert("doc", "a", 3, 0, "x"));
        assert!(matches!(
            engine.rebase(&store, &ahead),
            Err(SyncError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_wrong_document_rejected() {
        let engine = OtEngine::new();
        let store = store();
        let elsewhere = op(RawOperation::insert("other", "a", 0, 0, "x"));
        assert!(engine.rebase(&store, &elsewhere).is_err());
    }
}
