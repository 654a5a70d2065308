//! Non-blocking fan-out.
//!
//! Every connection owns an [`Outbox`]: a bounded mpsc channel drained by
//! that connection's socket task. Sessions deliver with `try_send`, so a
//! stalled member only loses its own messages and never holds up the
//! session lock or the other members.
//!
//! [`OperationFeed`] republishes every accepted operation on a tokio
//! broadcast channel for external subscribers (e.g. a document store).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::oplog::Operation;

/// A pre-encoded JSON text frame, shared between all recipients.
pub type Frame = Arc<str>;

/// Statistics for monitoring delivery health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
}

/// Lock-free delivery counters, shared by all outboxes of a server.
#[derive(Debug, Default)]
pub struct DeliveryCounters {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl DeliveryCounters {
    pub fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Sending half of one connection's outbound queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    peer_id: Uuid,
    tx: mpsc::Sender<Frame>,
    counters: Arc<DeliveryCounters>,
}

impl Outbox {
    /// Create an outbox and the receiver its socket task drains.
    ///
    /// `capacity` is how many frames may queue before new ones are dropped.
    pub fn channel(
        peer_id: Uuid,
        capacity: usize,
        counters: Arc<DeliveryCounters>,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { peer_id, tx, counters }, rx)
    }

    pub fn peer_id(&self) -> Uuid {
        self.peer_id
    }

    /// Queue a frame without waiting. Returns `false` if it was dropped.
    pub fn deliver(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.counters.messages_dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("Outbox for {} is full, dropping message", self.peer_id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.messages_dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("Outbox for {} is closed, dropping message", self.peer_id);
                false
            }
        }
    }
}

/// An operation accepted into some session's log.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedOperation {
    pub session_id: String,
    pub document_id: String,
    pub operation: Operation,
}

/// Fan-out of accepted operations to external subscribers.
pub struct OperationFeed {
    sender: broadcast::Sender<Arc<AcceptedOperation>>,
}

impl OperationFeed {
    /// `capacity` entries are buffered per subscriber; slower subscribers lag.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an accepted operation. Returns the number of subscribers reached.
    pub fn publish(&self, accepted: AcceptedOperation) -> usize {
        // No subscribers is not an error.
        self.sender.send(Arc::new(accepted)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AcceptedOperation>> {
        self.sender.subscribe()
    }
}
