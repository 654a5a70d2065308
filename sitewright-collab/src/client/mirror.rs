//! Client-side mirror of the session and translation of server messages
//! into [`ClientEvent`]s.

use std::collections::HashMap;

use serde_json::Value;
use uuid::Uuid;

use super::ClientEvent;
use crate::oplog::{Operation, OperationKind};
use crate::protocol::{OperationRequest, ServerMessage};
use crate::session::User;

/// An operation applied optimistically and not yet echoed by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub target: String,
    pub data: Value,
    /// Local numbering, `version + 1` at submission time.
    pub local_revision: u64,
}

/// What the client currently believes the session looks like.
#[derive(Debug, Clone, Default)]
pub struct LocalState {
    pub user_id: Option<Uuid>,
    pub session_id: String,
    pub users: HashMap<Uuid, User>,
    pub document: Value,
    /// Authoritative operations, in server order.
    pub operations: Vec<Operation>,
    pub pending: Vec<PendingOperation>,
    /// Bumped for every operation applied locally, optimistic or remote.
    pub version: u64,
    /// Authoritative operations seen so far; sent as the base revision.
    pub confirmed: u64,
}

impl LocalState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// A fresh connection was assigned `user_id`.
    pub fn begin(&mut self, user_id: Uuid) {
        self.user_id = Some(user_id);
    }

    /// Record an optimistic operation and build its wire request.
    pub fn record_pending(
        &mut self,
        id: Uuid,
        kind: OperationKind,
        target: String,
        data: Value,
    ) -> OperationRequest {
        self.version += 1;
        self.pending.push(PendingOperation {
            id,
            kind,
            target,
            data: data.clone(),
            local_revision: self.version,
        });
        OperationRequest {
            id: Some(id),
            kind,
            data,
            revision: Some(self.confirmed),
        }
    }

    /// Undo an optimistic operation that could not be sent or queued.
    pub fn discard_pending(&mut self, id: Uuid) {
        if let Some(pos) = self.pending.iter().position(|p| p.id == id) {
            self.pending.remove(pos);
            self.version = self.version.saturating_sub(1);
        }
    }

    fn replace_snapshot(&mut self, users: Vec<User>, document: Value, operations: Vec<Operation>) {
        self.users = users.into_iter().map(|u| (u.id, u)).collect();
        self.document = document;
        self.confirmed = operations.last().map_or(0, |op| op.revision + 1);
        self.operations = operations;
        self.version = self.confirmed + self.pending.len() as u64;
    }

    fn accept(&mut self, operation: &Operation) {
        self.confirmed = self.confirmed.max(operation.revision + 1);
        self.operations.push(operation.clone());
    }

    fn snapshot_event(&self) -> ClientEvent {
        ClientEvent::StateUpdate {
            users: self.users.values().cloned().collect(),
            document: self.document.clone(),
            operations: self.operations.clone(),
        }
    }

    /// Fold one server message into the mirror and name the event it raises.
    pub fn apply(&mut self, message: ServerMessage) -> Option<ClientEvent> {
        match message {
            ServerMessage::SessionJoined(joined) => {
                self.user_id = Some(joined.user_id);
                self.replace_snapshot(joined.users, joined.document, joined.operations);
                Some(self.snapshot_event())
            }
            ServerMessage::SyncResponse(sync) => {
                self.replace_snapshot(sync.users, sync.document, sync.operations);
                Some(self.snapshot_event())
            }
            ServerMessage::UserJoined(joined) => {
                self.users.insert(joined.user.id, joined.user.clone());
                Some(ClientEvent::UserJoined(joined.user))
            }
            ServerMessage::UserLeft(left) | ServerMessage::UserDisconnected(left) => {
                self.users.remove(&left.user_id);
                Some(ClientEvent::UserLeft {
                    user_id: left.user_id,
                    name: left.name,
                })
            }
            ServerMessage::CursorUpdate(update) => {
                if let Some(user) = self.users.get_mut(&update.user_id) {
                    user.cursor = Some(update.cursor);
                }
                Some(ClientEvent::CursorUpdate(update))
            }
            ServerMessage::SelectionUpdate(update) => {
                if let Some(user) = self.users.get_mut(&update.user_id) {
                    user.selection = Some(update.selection.clone());
                }
                Some(ClientEvent::SelectionUpdate(update))
            }
            ServerMessage::ViewportUpdate(update) => {
                if let Some(user) = self.users.get_mut(&update.user_id) {
                    user.viewport = Some(update.viewport);
                }
                Some(ClientEvent::ViewportUpdate(update))
            }
            ServerMessage::PresenceUpdate(update) => {
                if let Some(user) = self.users.get_mut(&update.user_id) {
                    user.is_active = update.is_active;
                }
                Some(ClientEvent::Presence(update))
            }
            ServerMessage::Operation(operation) => {
                let ours = self.pending.iter().position(|p| p.id == operation.id);
                self.accept(&operation);
                match ours {
                    Some(pos) => {
                        self.pending.remove(pos);
                        self.version = self.version.max(self.confirmed);
                        Some(ClientEvent::OperationAck(operation))
                    }
                    None => {
                        self.version += 1;
                        Some(ClientEvent::RemoteOperation(operation))
                    }
                }
            }
            ServerMessage::Chat(chat) => Some(ClientEvent::Comment(chat)),
            ServerMessage::ConflictDetected(notice) => Some(ClientEvent::Conflict(notice)),
            ServerMessage::Connected(_) | ServerMessage::Pong => None,
        }
    }
}
