//! Seam to the external document layer.
//!
//! The coordinator stores the document snapshot but never interprets it.
//! Accepted operations are dispatched by kind to a [`DocumentLayer`], which
//! owns the actual mutation rules.

use serde_json::Value;

use crate::oplog::{Operation, OperationKind};

/// Applies accepted operations to a session's document snapshot.
///
/// Every hook defaults to a no-op.
pub trait DocumentLayer: Send + Sync {
    fn insert(&self, _document: &mut Value, _operation: &Operation) {}
    fn delete(&self, _document: &mut Value, _operation: &Operation) {}
    fn modify(&self, _document: &mut Value, _operation: &Operation) {}
    fn move_to(&self, _document: &mut Value, _operation: &Operation) {}
    fn transform(&self, _document: &mut Value, _operation: &Operation) {}
}

/// Stores the snapshot untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughDocument;

impl DocumentLayer for PassthroughDocument {}

/// Route an operation to the hook for its kind.
pub fn apply(layer: &dyn DocumentLayer, document: &mut Value, operation: &Operation) {
    match operation.kind {
        OperationKind::Insert => layer.insert(document, operation),
        OperationKind::Delete => layer.delete(document, operation),
        OperationKind::Modify => layer.modify(document, operation),
        OperationKind::Move => layer.move_to(document, operation),
        OperationKind::Transform => layer.transform(document, operation),
    }
}
