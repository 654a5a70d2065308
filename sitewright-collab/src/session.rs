//! Session state: members, operation log and the opaque document snapshot.
//!
//! A [`CollaborationSession`] is always accessed through the registry's
//! per-session lock; nothing here is synchronized on its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::broadcast::{Frame, Outbox};
use crate::oplog::OperationLog;
use crate::protocol::{CursorPosition, JoinRequest, Selection, ServerMessage, Viewport};

/// Colors handed out round-robin by join order.
pub const DEFAULT_PALETTE: [&str; 10] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7",
    "#DDA0DD", "#98D8C8", "#F7DC6F", "#BB8FCE", "#85C1E9",
];

/// A session member as seen by other members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
    pub is_active: bool,
    pub last_activity: DateTime<Utc>,
}

impl User {
    pub fn new(id: Uuid, request: &JoinRequest, color: impl Into<String>) -> Self {
        Self {
            id,
            name: request.name.clone(),
            email: request.email.clone(),
            avatar: request.avatar.clone(),
            color: color.into(),
            cursor: None,
            selection: None,
            viewport: None,
            is_active: true,
            last_activity: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Whether the user has been silent for longer than `threshold`.
    pub fn is_idle(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(threshold) {
            Ok(threshold) => now - self.last_activity > threshold,
            Err(_) => false,
        }
    }
}

/// Display identity attached to presence broadcasts.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub name: String,
    pub color: String,
}

struct Member {
    user: User,
    outbox: Outbox,
}

/// A live collaborative context.
pub struct CollaborationSession {
    id: String,
    document_id: String,
    members: HashMap<Uuid, Member>,
    log: OperationLog,
    document: Value,
    created_at: DateTime<Utc>,
    last_modified: DateTime<Utc>,
}

impl CollaborationSession {
    pub fn new(id: impl Into<String>, document_id: impl Into<String>, document: Value) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            document_id: document_id.into(),
            members: HashMap::new(),
            log: OperationLog::new(),
            document,
            created_at: now,
            last_modified: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Value {
        &mut self.document
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut OperationLog {
        &mut self.log
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    pub fn touch(&mut self) {
        self.last_modified = Utc::now();
    }

    /// Color for the next joiner: `palette[members mod palette length]`.
    pub fn next_color(&self, palette: &[String]) -> String {
        if palette.is_empty() {
            return DEFAULT_PALETTE[self.members.len() % DEFAULT_PALETTE.len()].to_string();
        }
        palette[self.members.len() % palette.len()].clone()
    }

    pub fn add_member(&mut self, user: User, outbox: Outbox) {
        self.members.insert(user.id, Member { user, outbox });
    }

    pub fn remove_member(&mut self, user_id: &Uuid) -> Option<User> {
        self.members.remove(user_id).map(|m| m.user)
    }

    pub fn contains(&self, user_id: &Uuid) -> bool {
        self.members.contains_key(user_id)
    }

    pub fn user(&self, user_id: &Uuid) -> Option<&User> {
        self.members.get(user_id).map(|m| &m.user)
    }

    /// Mutate one member's record and refresh its `last_activity`.
    ///
    /// Returns the member's display identity, or `None` for non-members.
    pub fn update_member<F>(&mut self, user_id: &Uuid, mutate: F) -> Option<Identity>
    where
        F: FnOnce(&mut User),
    {
        let member = self.members.get_mut(user_id)?;
        mutate(&mut member.user);
        member.user.touch();
        Some(Identity {
            name: member.user.name.clone(),
            color: member.user.color.clone(),
        })
    }

    /// Replace a rejoining member's outbox (same identity, new socket state).
    pub fn replace_outbox(&mut self, user_id: &Uuid, outbox: Outbox) {
        if let Some(member) = self.members.get_mut(user_id) {
            member.outbox = outbox;
        }
    }

    pub fn users(&self) -> Vec<User> {
        self.members.values().map(|m| m.user.clone()).collect()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// True when the session has members and all of them are idle.
    pub fn all_idle(&self, threshold: Duration) -> bool {
        let now = Utc::now();
        !self.members.is_empty() && self.members.values().all(|m| m.user.is_idle(threshold, now))
    }

    fn frame(&self, message: ServerMessage) -> Option<Frame> {
        let msg_type = message.message_type();
        match message.encode(&self.id) {
            Ok(text) => Some(Arc::from(text)),
            Err(e) => {
                log::error!("Failed to encode {msg_type} for session {}: {e}", self.id);
                None
            }
        }
    }

    /// Send to every member except `exclude`. Returns how many accepted it.
    pub fn broadcast(&self, message: ServerMessage, exclude: Option<Uuid>) -> usize {
        let Some(frame) = self.frame(message) else {
            return 0;
        };
        self.members
            .values()
            .filter(|m| Some(m.user.id) != exclude)
            .filter(|m| m.outbox.deliver(frame.clone()))
            .count()
    }

    /// Send to one member only.
    pub fn send_to(&self, user_id: &Uuid, message: ServerMessage) -> bool {
        let Some(member) = self.members.get(user_id) else {
            return false;
        };
        match self.frame(message) {
            Some(frame) => member.outbox.deliver(frame),
            None => false,
        }
    }
}
