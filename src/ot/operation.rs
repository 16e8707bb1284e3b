//! Text operations exchanged between collaborators
//!
//! Positions and lengths count chars, never bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// Unique identifier for an operation
pub type OpId = Uuid;

/// Identifier of a shared document (assigned by the storage collaborator)
pub type DocumentId = String;

/// Human or automated participant identity (supplied by the auth layer)
pub type ParticipantId = String;

/// Document version; one increment per accepted operation
pub type Version = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Insert,
    Delete,
    Replace,
}

/// An edit as submitted by a client, before the core has seen it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOperation {
    pub document_id: DocumentId,
    pub author_id: ParticipantId,
    pub base_version: Version,
    pub kind: OpKind,
    pub position: usize,
    pub payload: String,
}

impl RawOperation {
    pub fn insert(
        document_id: impl Into<DocumentId>,
        author_id: impl Into<ParticipantId>,
        base_version: Version,
        position: usize,
        text: impl Into<String>,
    ) -> Self {
        Self::new(document_id, author_id, base_version, OpKind::Insert, position, text)
    }

    /// `deleted` is the text being removed; its length is the deleted span.
    pub fn delete(
        document_id: impl Into<DocumentId>,
        author_id: impl Into<ParticipantId>,
        base_version: Version,
        position: usize,
        deleted: impl Into<String>,
    ) -> Self {
        Self::new(document_id, author_id, base_version, OpKind::Delete, position, deleted)
    }

    /// Overwrites `text.len()` chars at `position` with `text`.
    pub fn replace(
        document_id: impl Into<DocumentId>,
        author_id: impl Into<ParticipantId>,
        base_version: Version,
        position: usize,
        text: impl Into<String>,
    ) -> Self {
        Self::new(document_id, author_id, base_version, OpKind::Replace, position, text)
    }

    fn new(
        document_id: impl Into<DocumentId>,
        author_id: impl Into<ParticipantId>,
        base_version: Version,
        kind: OpKind,
        position: usize,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            author_id: author_id.into(),
            base_version,
            kind,
            position,
            payload: payload.into(),
        }
    }
}

/// An operation carried through transformation, storage and broadcast.
///
/// The edit removes `span` chars at `position`, then inserts the inserted
/// text (the payload, except for deletes) at `position`. Transformation
/// produces a new `Operation` with the same `op_id`; instances are never
/// mutated once accepted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub op_id: OpId,
    pub document_id: DocumentId,
    pub author_id: ParticipantId,
    pub kind: OpKind,
    pub position: usize,
    /// Chars removed at `position`
    pub span: usize,
    /// Inserted text for Insert/Replace, removed text for Delete
    pub payload: String,
    /// Version the author observed when creating the operation
    pub base_version: Version,
    /// Version this operation produced, once accepted
    pub version: Option<Version>,
    pub timestamp: DateTime<Utc>,
}

impl Operation {
    pub fn from_raw(raw: RawOperation) -> Self {
        let span = match raw.kind {
            OpKind::Insert => 0,
            OpKind::Delete | OpKind::Replace => char_len(&raw.payload),
        };
        Self {
            op_id: Uuid::new_v4(),
            document_id: raw.document_id,
            author_id: raw.author_id,
            kind: raw.kind,
            position: raw.position,
            span,
            payload: raw.payload,
            base_version: raw.base_version,
            version: None,
            timestamp: Utc::now(),
        }
    }

    /// Replace a range whose length differs from the replacement text.
    pub fn with_span(mut self, span: usize) -> Self {
        if self.kind == OpKind::Replace {
            self.span = span;
        }
        self
    }

    /// Text this operation inserts when applied.
    pub fn inserted_text(&self) -> &str {
        match self.kind {
            OpKind::Delete => "",
            OpKind::Insert | OpKind::Replace => &self.payload,
        }
    }

    pub fn inserted_len(&self) -> usize {
        char_len(self.inserted_text())
    }

    /// End (exclusive) of the removed range.
    pub fn end(&self) -> usize {
        self.position + self.span
    }

    /// Content length change caused by applying this operation.
    pub fn net_change(&self) -> i64 {
        self.inserted_len() as i64 - self.span as i64
    }

    /// True when transformation left nothing to apply.
    pub fn is_noop(&self) -> bool {
        self.span == 0 && self.inserted_text().is_empty()
    }

    pub fn is_accepted(&self) -> bool {
        self.version.is_some()
    }

    pub(crate) fn accepted(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Check the operation against a content length it will be applied to.
    pub fn check_bounds(&self, content_len: usize) -> Result<()> {
        if self.position > content_len || self.end() > content_len {
            return Err(SyncError::InvalidOperation(format!(
                "range {}..{} outside content of length {}",
                self.position,
                self.end(),
                content_len
            )));
        }
        Ok(())
    }

    /// Apply to `content`, returning the edited text.
    pub fn apply_to(&self, content: &str) -> Result<String> {
        self.check_bounds(char_len(content))?;
        let start = byte_offset(content, self.position);
        let end = byte_offset(content, self.end());

        let mut edited = String::with_capacity(content.len() + self.inserted_text().len());
        edited.push_str(&content[..start]);
        edited.push_str(self.inserted_text());
        edited.push_str(&content[end..]);
        Ok(edited)
    }
}

/// Number of chars in `s`.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of char index `index`, clamped to the end of `s`.
pub(crate) fn byte_offset(s: &str, index: usize) -> usize {
    s.char_indices()
        .nth(index)
        .map(|(offset, _)| offset)
        .unwrap_or(s.len())
}

/// Chars `start..end` of `s`, clamped to its length.
pub(crate) fn char_slice(s: &str, start: usize, end: usize) -> &str {
    let from = byte_offset(s, start);
    let to = byte_offset(s, end.max(start));
    &s[from..to]
}
