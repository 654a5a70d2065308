//! Session registry: owns every live [`CollaborationSession`].
//!
//! ```text
//! SessionRegistry
//!   └── RwLock<HashMap<session_id, Arc<SessionSlot>>>
//!         └── SessionSlot { closed, Mutex<CollaborationSession> }
//! ```
//!
//! All mutation of one session happens under that session's mutex, so
//! concurrent messages for the same session apply one at a time while
//! different sessions proceed independently. The map lock is never taken
//! while a session lock is held.
//!
//! A slot is marked `closed` (under its session lock) before it is removed
//! from the map. A join that raced with the removal sees the flag and
//! retries, landing on a fresh session instead of an orphaned one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock};
use uuid::Uuid;

use crate::broadcast::{AcceptedOperation, OperationFeed, Outbox};
use crate::document::{self, DocumentLayer, PassthroughDocument};
use crate::oplog::{target_of, Operation};
use crate::protocol::{
    ConflictNotice, JoinRequest, OperationRequest, ServerMessage, SessionJoined, SyncResponse,
    UserJoined, UserLeft,
};
use crate::session::{CollaborationSession, User, DEFAULT_PALETTE};

/// Per-session behaviour.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Member colors, assigned by join order.
    pub palette: Vec<String>,
    /// Operations replayed to a joiner in `session-joined`.
    pub backlog_limit: usize,
    /// Entries buffered per accepted-operation subscriber.
    pub feed_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            palette: DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect(),
            backlog_limit: 100,
            feed_capacity: 1024,
        }
    }
}

/// Why a member went away; selects `user-left` vs `user-disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    Left,
    Disconnected,
}

struct SessionSlot {
    closed: AtomicBool,
    session: Mutex<CollaborationSession>,
}

impl SessionSlot {
    fn new(session: CollaborationSession) -> Self {
        Self {
            closed: AtomicBool::new(false),
            session: Mutex::new(session),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Process-scoped owner of all sessions.
pub struct SessionRegistry {
    config: SessionConfig,
    sessions: RwLock<HashMap<String, Arc<SessionSlot>>>,
    document_layer: Arc<dyn DocumentLayer>,
    feed: OperationFeed,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_document_layer(config, Arc::new(PassthroughDocument))
    }

    pub fn with_document_layer(config: SessionConfig, document_layer: Arc<dyn DocumentLayer>) -> Self {
        let feed = OperationFeed::new(config.feed_capacity);
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            document_layer,
            feed,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Subscribe to every operation accepted from now on, across sessions.
    pub fn subscribe_operations(&self) -> broadcast::Receiver<Arc<AcceptedOperation>> {
        self.feed.subscribe()
    }

    async fn slot(&self, session_id: &str) -> Option<Arc<SessionSlot>> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).filter(|s| !s.is_closed()).cloned()
    }

    async fn get_or_create(&self, session_id: &str, request: &JoinRequest) -> Arc<SessionSlot> {
        // Fast path: read lock
        if let Some(slot) = self.slot(session_id).await {
            return slot;
        }

        // Slow path: write lock, replacing a slot that closed meanwhile
        let mut sessions = self.sessions.write().await;
        if let Some(slot) = sessions.get(session_id).filter(|s| !s.is_closed()) {
            return slot.clone();
        }

        let document = request
            .document
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()));
        let slot = Arc::new(SessionSlot::new(CollaborationSession::new(
            session_id,
            request.document_id.clone(),
            document,
        )));
        sessions.insert(session_id.to_string(), slot.clone());
        log::info!("Session {session_id} created for document {}", request.document_id);
        slot
    }

    /// Create a session ahead of its first join, e.g. from a stored snapshot.
    ///
    /// Returns `false` if the session already exists. A session opened this
    /// way and never joined is removed by the next reaper sweep.
    pub async fn open(&self, session_id: &str, document_id: &str, document: Value) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.get(session_id).is_some_and(|s| !s.is_closed()) {
            return false;
        }
        let session = CollaborationSession::new(session_id, document_id, document);
        sessions.insert(session_id.to_string(), Arc::new(SessionSlot::new(session)));
        log::info!("Session {session_id} opened for document {document_id}");
        true
    }

    /// Drop `slot` from the map unless it was already replaced.
    async fn retire(&self, session_id: &str, slot: &Arc<SessionSlot>) {
        let mut sessions = self.sessions.write().await;
        if sessions.get(session_id).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            sessions.remove(session_id);
            log::info!("Session {session_id} removed (empty)");
        }
    }

    /// Add the outbox owner to a session, creating the session on first join.
    ///
    /// The joiner receives `session-joined` with the member list, the
    /// document and the backlog; everyone else receives `user-joined`.
    /// Joining a session one is already a member of refreshes the profile
    /// and resends `session-joined` without announcing anything.
    pub async fn join(&self, session_id: &str, outbox: &Outbox, request: JoinRequest) -> User {
        let user_id = outbox.peer_id();
        loop {
            let slot = self.get_or_create(session_id, &request).await;
            let mut session = slot.session.lock().await;
            if slot.is_closed() {
                drop(session);
                tokio::task::yield_now().await;
                continue;
            }

            let rejoined = session.contains(&user_id);
            if rejoined {
                session.replace_outbox(&user_id, outbox.clone());
                session.update_member(&user_id, |user| {
                    user.name = request.name.clone();
                    user.email = request.email.clone();
                    user.avatar = request.avatar.clone();
                    user.is_active = true;
                });
            } else {
                let color = session.next_color(&self.config.palette);
                session.add_member(User::new(user_id, &request, color), outbox.clone());
            }

            let Some(user) = session.user(&user_id).cloned() else {
                continue;
            };

            let reply = SessionJoined {
                user_id,
                users: session.users(),
                document: session.document().clone(),
                operations: session.log().backlog(self.config.backlog_limit).to_vec(),
            };
            session.send_to(&user_id, ServerMessage::SessionJoined(reply));

            if !rejoined {
                session.broadcast(
                    ServerMessage::UserJoined(UserJoined { user: user.clone() }),
                    Some(user_id),
                );
            }
            session.touch();

            log::info!(
                "User {} ({user_id}) joined session {session_id} with {} member(s)",
                user.name,
                session.member_count()
            );
            return user;
        }
    }

    /// Remove a member and tell the rest. Deletes the session once empty.
    ///
    /// Returns `false` if the user was not a member.
    pub async fn leave(&self, session_id: &str, user_id: Uuid, reason: LeaveReason) -> bool {
        let Some(slot) = self.slot(session_id).await else {
            log::debug!("Leave from {user_id} for unknown session {session_id} ignored");
            return false;
        };

        let emptied = {
            let mut session = slot.session.lock().await;
            let Some(user) = session.remove_member(&user_id) else {
                log::debug!("Leave from non-member {user_id} in session {session_id} ignored");
                return false;
            };

            let payload = UserLeft { user_id, name: user.name.clone() };
            let message = match reason {
                LeaveReason::Left => ServerMessage::UserLeft(payload),
                LeaveReason::Disconnected => ServerMessage::UserDisconnected(payload),
            };
            session.broadcast(message, None);
            session.touch();
            log::info!("User {} ({user_id}) {reason:?} session {session_id}", user.name);

            if session.is_empty() {
                slot.close();
                true
            } else {
                false
            }
        };

        if emptied {
            self.retire(session_id, &slot).await;
        }
        true
    }

    /// Socket closed: leave every session the user is a member of.
    ///
    /// Returns the number of sessions left.
    pub async fn disconnect(&self, user_id: Uuid) -> usize {
        let candidates: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions.keys().cloned().collect()
        };

        let mut left = 0;
        for session_id in candidates {
            if self.leave(&session_id, user_id, LeaveReason::Disconnected).await {
                left += 1;
            }
        }
        left
    }

    /// Reply to a member with the full document, log and member list.
    pub async fn sync(&self, session_id: &str, user_id: Uuid) -> bool {
        self.with_member(session_id, user_id, |session| {
            let response = SyncResponse {
                document: session.document().clone(),
                operations: session.log().entries().to_vec(),
                users: session.users(),
            };
            session.send_to(&user_id, ServerMessage::SyncResponse(response))
        })
        .await
        .unwrap_or(false)
    }

    /// Accept an operation into the session's log.
    ///
    /// The revision is always `log length`; a stale declared revision only
    /// produces a `conflict-detected` notice to the submitter. The accepted
    /// operation goes to every member, the submitter included.
    pub async fn submit_operation(
        &self,
        session_id: &str,
        user_id: Uuid,
        request: OperationRequest,
    ) -> Option<Operation> {
        let Some(slot) = self.slot(session_id).await else {
            log::debug!("Operation from {user_id} for unknown session {session_id} dropped");
            return None;
        };
        let mut session = slot.session.lock().await;
        if !session.contains(&user_id) {
            log::debug!("Operation from non-member {user_id} in session {session_id} dropped");
            return None;
        }

        let conflicts = session.log().conflicts(target_of(&request.data), request.revision, user_id);
        let operation = session
            .log_mut()
            .append(request.id.unwrap_or_else(Uuid::new_v4), request.kind, user_id, request.data)
            .clone();

        if !conflicts.is_empty() {
            log::info!(
                "Operation r{} from {user_id} in session {session_id} conflicts with {} earlier operation(s)",
                operation.revision,
                conflicts.len()
            );
            session.send_to(
                &user_id,
                ServerMessage::ConflictDetected(ConflictNotice {
                    operation: operation.clone(),
                    conflicts,
                }),
            );
        }

        document::apply(self.document_layer.as_ref(), session.document_mut(), &operation);
        session.broadcast(ServerMessage::Operation(operation.clone()), None);
        session.update_member(&user_id, |_| {});
        session.touch();

        self.feed.publish(AcceptedOperation {
            session_id: session_id.to_string(),
            document_id: session.document_id().to_string(),
            operation: operation.clone(),
        });

        log::debug!(
            "Accepted {:?} r{} from {user_id} in session {session_id}",
            operation.kind,
            operation.revision
        );
        Some(operation)
    }

    /// Run `f` against a session the user belongs to.
    ///
    /// `None` when the session does not exist or the user is not a member.
    pub(crate) async fn with_member<F, R>(&self, session_id: &str, user_id: Uuid, f: F) -> Option<R>
    where
        F: FnOnce(&mut CollaborationSession) -> R,
    {
        let slot = self.slot(session_id).await?;
        let mut session = slot.session.lock().await;
        if !session.contains(&user_id) {
            log::debug!("Message from non-member {user_id} for session {session_id} dropped");
            return None;
        }
        Some(f(&mut session))
    }

    /// Delete every session without members. Returns how many were removed.
    pub async fn remove_empty(&self) -> usize {
        let slots: Vec<(String, Arc<SessionSlot>)> = {
            let sessions = self.sessions.read().await;
            sessions.iter().map(|(id, s)| (id.clone(), s.clone())).collect()
        };

        let mut removed = 0;
        for (session_id, slot) in slots {
            let empty = {
                let session = slot.session.lock().await;
                if session.is_empty() {
                    slot.close();
                    true
                } else {
                    false
                }
            };
            if empty {
                self.retire(&session_id, &slot).await;
                removed += 1;
            }
        }
        removed
    }

    /// Sessions whose members have all been silent for longer than `threshold`.
    pub async fn idle_sessions(&self, threshold: Duration) -> Vec<String> {
        let slots: Vec<(String, Arc<SessionSlot>)> = {
            let sessions = self.sessions.read().await;
            sessions.iter().map(|(id, s)| (id.clone(), s.clone())).collect()
        };

        let mut idle = Vec::new();
        for (session_id, slot) in slots {
            if slot.session.lock().await.all_idle(threshold) {
                idle.push(session_id);
            }
        }
        idle
    }

    /// Close and drop every session (process shutdown).
    pub async fn clear(&self) {
        let mut sessions = self.sessions.write().await;
        for slot in sessions.values() {
            slot.close();
        }
        let count = sessions.len();
        sessions.clear();
        if count > 0 {
            log::info!("Dropped {count} session(s) on shutdown");
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.slot(session_id).await.is_some()
    }

    pub async fn session_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Current member list of a session.
    pub async fn users(&self, session_id: &str) -> Option<Vec<User>> {
        let slot = self.slot(session_id).await?;
        let session = slot.session.lock().await;
        Some(session.users())
    }

    /// Complete operation log of a session.
    pub async fn operations(&self, session_id: &str) -> Option<Vec<Operation>> {
        let slot = self.slot(session_id).await?;
        let session = slot.session.lock().await;
        Some(session.log().entries().to_vec())
    }

    /// Current document snapshot of a session.
    pub async fn document(&self, session_id: &str) -> Option<Value> {
        let slot = self.slot(session_id).await?;
        let session = slot.session.lock().await;
        Some(session.document().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{DeliveryCounters, Frame};
    use crate::oplog::OperationKind;
    use crate::protocol::{Envelope, MessageType};
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Peer {
        id: Uuid,
        outbox: Outbox,
        rx: mpsc::Receiver<Frame>,
    }

    impl Peer {
        fn new() -> Self {
            let id = Uuid::new_v4();
            let (outbox, rx) = Outbox::channel(id, 64, Arc::new(DeliveryCounters::default()));
            Self { id, outbox, rx }
        }

        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut out = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                out.push(Envelope::decode(&frame).unwrap().server_message().unwrap());
            }
            out
        }

        fn types(&mut self) -> Vec<MessageType> {
            self.drain().iter().map(ServerMessage::message_type).collect()
        }
    }

    fn modify(target: &str, revision: Option<u64>) -> OperationRequest {
        OperationRequest {
            id: None,
            kind: OperationKind::Modify,
            data: json!({ "target": target }),
            revision,
        }
    }

    #[tokio::test]
    async fn test_first_join_creates_session() {
        let registry = SessionRegistry::new(SessionConfig::default());
        let mut alice = Peer::new();

        let mut request = JoinRequest::new("plan-7", "Alice");
        request.document = Some(json!({"zones": ["north"]}));
        let user = registry.join("doc1", &alice.outbox, request).await;

        assert_eq!(user.id, alice.id);
        assert_eq!(user.color, DEFAULT_PALETTE[0]);
        assert!(user.is_active);
        assert!(registry.contains("doc1").await);

        match alice.drain().as_slice() {
            [ServerMessage::SessionJoined(joined)] => {
                assert_eq!(joined.user_id, alice.id);
                assert_eq!(joined.users.len(), 1);
                assert_eq!(joined.document, json!({"zones": ["north"]}));
                assert!(joined.operations.is_empty());
            }
            other => panic!("unexpected messages {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_document_defaults_to_empty_object() {
        let registry = SessionRegistry::new(SessionConfig::default());
        let alice = Peer::new();
        registry.join("doc1", &alice.outbox, JoinRequest::new("d", "Alice")).await;
        assert_eq!(registry.document("doc1").await, Some(json!({})));
    }

    #[tokio::test]
    async fn test_second_join_announced_to_others_only() {
        let registry = SessionRegistry::new(SessionConfig::default());
        let mut alice = Peer::new();
        let mut bob = Peer::new();

        registry.join("doc1", &alice.outbox, JoinRequest::new("d", "Alice")).await;
        alice.drain();
        let bob_user = registry.join("doc1", &bob.outbox, JoinRequest::new("d", "Bob")).await;

        assert_eq!(bob_user.color, DEFAULT_PALETTE[1]);
        match alice.drain().as_slice() {
            [ServerMessage::UserJoined(joined)] => assert_eq!(joined.user.id, bob.id),
            other => panic!("unexpected messages {other:?}"),
        }
        match bob.drain().as_slice() {
            [ServerMessage::SessionJoined(joined)] => assert_eq!(joined.users.len(), 2),
            other => panic!("unexpected messages {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_kth_joiner_gets_palette_entry() {
        let registry = SessionRegistry::new(SessionConfig::default());
        let palette = &registry.config().palette;
        let mut peers = Vec::new();

        for k in 0..13 {
            let peer = Peer::new();
            let user = registry.join("doc1", &peer.outbox, JoinRequest::new("d", "u")).await;
            assert_eq!(user.color, palette[k % palette.len()]);
            peers.push(peer);
        }
    }

    #[tokio::test]
    async fn test_rejoin_does_not_duplicate_member() {
        let registry = SessionRegistry::new(SessionConfig::default());
        let mut alice = Peer::new();
        let mut bob = Peer::new();

        registry.join("doc1", &alice.outbox, JoinRequest::new("d", "Alice")).await;
        registry.join("doc1", &bob.outbox, JoinRequest::new("d", "Bob")).await;
        alice.drain();
        bob.drain();

        let again = registry.join("doc1", &bob.outbox, JoinRequest::new("d", "Robert")).await;
        assert_eq!(again.color, DEFAULT_PALETTE[1]);
        assert_eq!(again.name, "Robert");
        assert_eq!(registry.users("doc1").await.unwrap().len(), 2);
        assert!(alice.drain().is_empty());
        assert_eq!(bob.types(), vec![MessageType::SessionJoined]);
    }

    #[tokio::test]
    async fn test_leave_notifies_and_last_leave_deletes() {
        let registry = SessionRegistry::new(SessionConfig::default());
        let mut alice = Peer::new();
        let mut bob = Peer::new();

        registry.join("doc1", &alice.outbox, JoinRequest::new("d", "Alice")).await;
        registry.join("doc1", &bob.outbox, JoinRequest::new("d", "Bob")).await;
        alice.drain();

        assert!(registry.leave("doc1", bob.id, LeaveReason::Left).await);
        match alice.drain().as_slice() {
            [ServerMessage::UserLeft(left)] => assert_eq!(left.user_id, bob.id),
            other => panic!("unexpected messages {other:?}"),
        }
        assert!(!registry.leave("doc1", bob.id, LeaveReason::Left).await);

        assert!(registry.leave("doc1", alice.id, LeaveReason::Left).await);
        assert!(!registry.contains("doc1").await);
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_leaves_every_session() {
        let registry = SessionRegistry::new(SessionConfig::default());
        let alice = Peer::new();
        let mut bob = Peer::new();

        registry.join("doc1", &alice.outbox, JoinRequest::new("d", "Alice")).await;
        registry.join("doc2", &alice.outbox, JoinRequest::new("d", "Alice")).await;
        registry.join("doc2", &bob.outbox, JoinRequest::new("d", "Bob")).await;
        bob.drain();

        assert_eq!(registry.disconnect(alice.id).await, 2);
        assert!(!registry.contains("doc1").await);
        assert_eq!(bob.types(), vec![MessageType::UserDisconnected]);

        // Later joins never list the departed user.
        let carol = Peer::new();
        registry.join("doc2", &carol.outbox, JoinRequest::new("d", "Carol")).await;
        let users = registry.users("doc2").await.unwrap();
        assert!(users.iter().all(|u| u.id != alice.id));
    }

    #[tokio::test]
    async fn test_revisions_are_server_assigned() {
        let registry = SessionRegistry::new(SessionConfig::default());
        let alice = Peer::new();
        registry.join("doc1", &alice.outbox, JoinRequest::new("d", "Alice")).await;

        for i in 0..5u64 {
            // Client hints are ignored for numbering.
            let op = registry
                .submit_operation("doc1", alice.id, modify(&format!("s{i}"), Some(99)))
                .await
                .unwrap();
            assert_eq!(op.revision, i);
            assert_eq!(op.user_id, alice.id);
        }

        let revisions: Vec<u64> = registry
            .operations("doc1")
            .await
            .unwrap()
            .iter()
            .map(|op| op.revision)
            .collect();
        assert_eq!(revisions, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_concurrent_edit_is_ordered_and_flagged() {
        let registry = SessionRegistry::new(SessionConfig::default());
        let mut alice = Peer::new();
        let mut bob = Peer::new();
        registry.join("doc1", &alice.outbox, JoinRequest::new("d", "Alice")).await;
        registry.join("doc1", &bob.outbox, JoinRequest::new("d", "Bob")).await;
        alice.drain();
        bob.drain();

        let a = registry.submit_operation("doc1", alice.id, modify("shape-1", Some(0))).await.unwrap();
        assert_eq!(a.revision, 0);
        match bob.drain().as_slice() {
            [ServerMessage::Operation(op)] => assert_eq!(op.id, a.id),
            other => panic!("unexpected messages {other:?}"),
        }

        let b = registry.submit_operation("doc1", bob.id, modify("shape-1", Some(0))).await.unwrap();
        assert_eq!(b.revision, 1);

        match bob.drain().as_slice() {
            [ServerMessage::ConflictDetected(notice), ServerMessage::Operation(echo)] => {
                assert_eq!(notice.operation.revision, 1);
                assert_eq!(notice.conflicts.len(), 1);
                assert_eq!(notice.conflicts[0].id, a.id);
                assert_eq!(echo.id, b.id);
            }
            other => panic!("unexpected messages {other:?}"),
        }
        // Alice sees her own echo and Bob's operation, no conflict notice.
        assert_eq!(
            alice.types(),
            vec![MessageType::Operation, MessageType::Operation]
        );
    }

    #[tokio::test]
    async fn test_client_operation_id_is_kept() {
        let registry = SessionRegistry::new(SessionConfig::default());
        let alice = Peer::new();
        registry.join("doc1", &alice.outbox, JoinRequest::new("d", "Alice")).await;

        let id = Uuid::new_v4();
        let mut request = modify("t", None);
        request.id = Some(id);
        let op = registry.submit_operation("doc1", alice.id, request).await.unwrap();
        assert_eq!(op.id, id);
    }

    #[tokio::test]
    async fn test_non_member_operation_is_dropped() {
        let registry = SessionRegistry::new(SessionConfig::default());
        let mut alice = Peer::new();
        let mallory = Peer::new();
        registry.join("doc1", &alice.outbox, JoinRequest::new("d", "Alice")).await;
        alice.drain();

        assert!(registry.submit_operation("doc1", mallory.id, modify("t", None)).await.is_none());
        assert!(registry.submit_operation("nope", alice.id, modify("t", None)).await.is_none());
        assert!(alice.drain().is_empty());
        assert!(registry.operations("doc1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backlog_is_bounded_but_sync_is_complete() {
        let config = SessionConfig { backlog_limit: 3, ..SessionConfig::default() };
        let registry = SessionRegistry::new(config);
        let mut alice = Peer::new();
        registry.join("doc1", &alice.outbox, JoinRequest::new("d", "Alice")).await;
        for i in 0..5 {
            registry.submit_operation("doc1", alice.id, modify(&format!("s{i}"), None)).await;
        }
        alice.drain();

        let mut bob = Peer::new();
        registry.join("doc1", &bob.outbox, JoinRequest::new("d", "Bob")).await;
        match bob.drain().as_slice() {
            [ServerMessage::SessionJoined(joined)] => {
                let revisions: Vec<u64> = joined.operations.iter().map(|o| o.revision).collect();
                assert_eq!(revisions, vec![2, 3, 4]);
            }
            other => panic!("unexpected messages {other:?}"),
        }

        assert!(registry.sync("doc1", bob.id).await);
        match bob.drain().as_slice() {
            [ServerMessage::SyncResponse(sync)] => {
                assert_eq!(sync.operations.len(), 5);
                assert_eq!(sync.users.len(), 2);
            }
            other => panic!("unexpected messages {other:?}"),
        }
        assert!(!registry.sync("doc1", Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn test_operation_feed_publishes_accepted() {
        let registry = SessionRegistry::new(SessionConfig::default());
        let mut feed = registry.subscribe_operations();
        let alice = Peer::new();
        registry.join("doc1", &alice.outbox, JoinRequest::new("plan-7", "Alice")).await;

        let op = registry.submit_operation("doc1", alice.id, modify("t", None)).await.unwrap();
        let accepted = feed.recv().await.unwrap();
        assert_eq!(accepted.session_id, "doc1");
        assert_eq!(accepted.document_id, "plan-7");
        assert_eq!(accepted.operation, op);
    }

    #[tokio::test]
    async fn test_opened_session_keeps_its_snapshot() {
        let registry = SessionRegistry::new(SessionConfig::default());
        assert!(registry.open("doc1", "plan-7", json!({"walls": 4})).await);
        assert!(!registry.open("doc1", "plan-7", json!({})).await);

        let mut alice = Peer::new();
        let mut request = JoinRequest::new("plan-7", "Alice");
        request.document = Some(json!({"ignored": true}));
        registry.join("doc1", &alice.outbox, request).await;

        match alice.drain().as_slice() {
            [ServerMessage::SessionJoined(joined)] => assert_eq!(joined.document, json!({"walls": 4})),
            other => panic!("unexpected messages {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remove_empty_and_clear() {
        let registry = SessionRegistry::new(SessionConfig::default());
        let alice = Peer::new();
        registry.join("doc1", &alice.outbox, JoinRequest::new("d", "Alice")).await;
        registry.open("doc2", "d", json!({})).await;

        assert_eq!(registry.remove_empty().await, 1);
        assert_eq!(registry.session_count().await, 1);
        assert!(registry.contains("doc1").await);

        registry.clear().await;
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_stay_dense() {
        let registry = Arc::new(SessionRegistry::new(SessionConfig::default()));
        let mut peers = Vec::new();
        for _ in 0..4 {
            let peer = Peer::new();
            registry.join("doc1", &peer.outbox, JoinRequest::new("d", "u")).await;
            peers.push(peer);
        }

        let mut tasks = Vec::new();
        for peer in &peers {
            let registry = registry.clone();
            let id = peer.id;
            tasks.push(tokio::spawn(async move {
                for i in 0..10 {
                    registry.submit_operation("doc1", id, modify(&format!("{id}-{i}"), None)).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let revisions: Vec<u64> = registry
            .operations("doc1")
            .await
            .unwrap()
            .iter()
            .map(|op| op.revision)
            .collect();
        assert_eq!(revisions, (0..40).collect::<Vec<u64>>());
    }
}
