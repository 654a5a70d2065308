//! Append-only operation log with server-assigned revisions.
//!
//! The log length is the session's authoritative revision counter: an
//! appended operation always receives `revision == len()` and entries are
//! never reordered, rewritten or removed.
//!
//! Conflict policy is detect-and-flag only. A submission conflicts with
//! every earlier operation that touched the same `data.target`, was written
//! by someone else, and sits at or after the submitter's declared base
//! revision. Conflicting operations are still appended (last write wins by
//! append order); the caller reports the conflict set to the submitter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Operation kinds understood by the document layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Delete,
    Modify,
    Move,
    Transform,
}

/// An accepted, revisioned change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Opaque to the coordinator apart from `target`.
    pub data: Value,
    pub revision: u64,
}

impl Operation {
    /// Target identifier (`data.target`), if the payload names it by string.
    pub fn target(&self) -> Option<&str> {
        target_of(&self.data).and_then(Value::as_str)
    }
}

/// The `data.target` of an operation payload. Any JSON value except null
/// names a target; targets match by value equality.
pub fn target_of(data: &Value) -> Option<&Value> {
    data.get("target").filter(|target| !target.is_null())
}

/// The per-session operation log.
#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    entries: Vec<Operation>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Revision the next appended operation will receive.
    pub fn next_revision(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Earlier operations that the submission conflicts with.
    ///
    /// Returns nothing when the submission names no target or declares no
    /// base revision.
    pub fn conflicts(
        &self,
        target: Option<&Value>,
        declared_revision: Option<u64>,
        author: Uuid,
    ) -> Vec<Operation> {
        let (Some(target), Some(declared)) = (target, declared_revision) else {
            return Vec::new();
        };

        // Entries below `declared` were already seen by the submitter.
        let start = usize::try_from(declared).unwrap_or(usize::MAX).min(self.entries.len());
        self.entries[start..]
            .iter()
            .filter(|op| op.user_id != author && target_of(&op.data) == Some(target))
            .cloned()
            .collect()
    }

    /// Append a new operation, assigning its revision and timestamp.
    pub fn append(&mut self, id: Uuid, kind: OperationKind, user_id: Uuid, data: Value) -> &Operation {
        let revision = self.next_revision();
        self.entries.push(Operation {
            id,
            kind,
            user_id,
            timestamp: Utc::now(),
            data,
            revision,
        });
        &self.entries[self.entries.len() - 1]
    }

    /// The most recent `limit` operations, oldest first.
    pub fn backlog(&self, limit: usize) -> &[Operation] {
        let start = self.entries.len().saturating_sub(limit);
        &self.entries[start..]
    }

    /// The complete log, oldest first.
    pub fn entries(&self) -> &[Operation] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
