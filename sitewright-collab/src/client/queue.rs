use std::collections::VecDeque;
use std::time::Instant;

use crate::protocol::OperationRequest;

/// Offline queue for operations submitted while disconnected.
///
/// Queued operations are replayed oldest first on the next successful
/// connect. Presence is never queued.
#[derive(Debug)]
pub struct OfflineQueue {
    queue: VecDeque<QueuedOperation>,
    max_size: usize,
}

#[derive(Debug, Clone)]
struct QueuedOperation {
    request: OperationRequest,
    queued_at: Instant,
}

impl OfflineQueue {
    /// Create a new offline queue with max capacity.
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Queue an operation for later replay. `false` when full.
    pub fn enqueue(&mut self, request: OperationRequest) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(QueuedOperation {
            request,
            queued_at: Instant::now(),
        });
        true
    }

    /// Oldest queued operation, left in place until it has been sent.
    pub fn front(&self) -> Option<&OperationRequest> {
        self.queue.front().map(|q| &q.request)
    }

    pub fn pop_front(&mut self) -> Option<OperationRequest> {
        self.queue.pop_front().map(|q| q.request)
    }

    /// How long the oldest entry has been waiting.
    pub fn oldest_age(&self) -> Option<std::time::Duration> {
        self.queue.front().map(|q| q.queued_at.elapsed())
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oplog::OperationKind;
    use serde_json::json;
    use uuid::Uuid;

    fn request(target: &str) -> OperationRequest {
        OperationRequest {
            id: Some(Uuid::new_v4()),
            kind: OperationKind::Modify,
            data: json!({ "target": target }),
            revision: Some(0),
        }
    }

    #[test]
    fn test_offline_queue_keeps_order() {
        let mut queue = OfflineQueue::new(100);
        assert!(queue.is_empty());

        let first = request("a");
        let second = request("b");
        queue.enqueue(first.clone());
        queue.enqueue(second.clone());
        assert_eq!(queue.len(), 2);
        assert!(queue.oldest_age().is_some());

        // Peeking does not consume
        assert_eq!(queue.front(), Some(&first));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop_front(), Some(first));
        assert_eq!(queue.front(), Some(&second));
        assert_eq!(queue.pop_front(), Some(second));
        assert!(queue.is_empty());
        assert!(queue.oldest_age().is_none());
        assert_eq!(queue.pop_front(), None);
    }

    #[test]
    fn test_offline_queue_capacity() {
        let mut queue = OfflineQueue::new(2);
        assert!(queue.enqueue(request("a")));
        assert!(queue.enqueue(request("b")));
        assert!(!queue.enqueue(request("c")));
        assert_eq!(queue.len(), 2);

        // Room again once the head is sent
        queue.pop_front();
        assert!(queue.enqueue(request("c")));
    }
}
