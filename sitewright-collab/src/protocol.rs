//! JSON envelope protocol shared by the coordinator and its clients.
//!
//! Every frame on the wire is one envelope, sent as a WebSocket text frame:
//! ```text
//! {
//!   "type":      "cursor",                  closed tag set (MessageType)
//!   "userId":    "5d0c0f8e-…",              subject of the message
//!   "sessionId": "doc1",                    target session
//!   "data":      { "x": 10.0, "y": 4.5 },   payload, shape depends on type
//!   "timestamp": "2026-01-01T00:00:00Z"     RFC 3339, UTC
//! }
//! ```
//!
//! Decoding is two-staged: [`Envelope::decode`] parses the frame, then
//! [`Envelope::client_message`] or [`Envelope::server_message`] match the tag
//! exhaustively and parse `data` into a typed message. The `userId` of an
//! inbound client envelope is never trusted; the server keys everything off
//! the socket identity it assigned.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::oplog::{Operation, OperationKind};
use crate::session::User;

/// Closed set of envelope tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    // Client → server
    Join,
    Leave,
    Cursor,
    Selection,
    /// Bidirectional: submission from a client, accepted copy from the server.
    Operation,
    /// Bidirectional: message from a client, attributed copy from the server.
    Chat,
    Viewport,
    Sync,
    Presence,
    Ping,

    // Server → client
    Connected,
    SessionJoined,
    UserJoined,
    UserLeft,
    UserDisconnected,
    CursorUpdate,
    SelectionUpdate,
    ViewportUpdate,
    SyncResponse,
    PresenceUpdate,
    ConflictDetected,
    Pong,
}

impl MessageType {
    /// Wire name of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Cursor => "cursor",
            Self::Selection => "selection",
            Self::Operation => "operation",
            Self::Chat => "chat",
            Self::Viewport => "viewport",
            Self::Sync => "sync",
            Self::Presence => "presence",
            Self::Ping => "ping",
            Self::Connected => "connected",
            Self::SessionJoined => "session-joined",
            Self::UserJoined => "user-joined",
            Self::UserLeft => "user-left",
            Self::UserDisconnected => "user-disconnected",
            Self::CursorUpdate => "cursor-update",
            Self::SelectionUpdate => "selection-update",
            Self::ViewportUpdate => "viewport-update",
            Self::SyncResponse => "sync-response",
            Self::PresenceUpdate => "presence-update",
            Self::ConflictDetected => "conflict-detected",
            Self::Pong => "pong",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ───────────────────────────────────────────────────────────────────
// Client → server payloads
// ───────────────────────────────────────────────────────────────────

fn anonymous() -> String {
    "Anonymous".to_string()
}

/// `join` payload: the joiner's display identity and, for the first joiner,
/// the initial document snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(default)]
    pub document_id: String,
    #[serde(default = "anonymous")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Value>,
}

impl JoinRequest {
    pub fn new(document_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            name: name.into(),
            email: None,
            avatar: None,
            document: None,
        }
    }
}

/// Cursor position in document coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

/// Selected element identifiers (empty = nothing selected).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Selection {
    #[serde(default)]
    pub ids: Vec<String>,
}

/// Visible region of the document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, zoom: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceState {
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// `operation` payload as submitted by a client.
///
/// `revision` is the submitter's base revision (how many authoritative
/// operations it had applied). It is only a hint for conflict detection;
/// the accepted revision is always assigned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

// ───────────────────────────────────────────────────────────────────
// Server → client payloads
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub user_id: Uuid,
}

/// Reply to the joiner only. `operations` is the bounded backlog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionJoined {
    pub user_id: Uuid,
    pub users: Vec<User>,
    pub document: Value,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserJoined {
    pub user: User,
}

/// Payload of both `user-left` and `user-disconnected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLeft {
    pub user_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdate {
    pub user_id: Uuid,
    pub name: String,
    pub color: String,
    pub cursor: CursorPosition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionUpdate {
    pub user_id: Uuid,
    pub name: String,
    pub color: String,
    pub selection: Selection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportUpdate {
    pub user_id: Uuid,
    pub name: String,
    pub color: String,
    pub viewport: Viewport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub user_id: Uuid,
    pub name: String,
    pub color: String,
    pub is_active: bool,
}

/// Chat message with the author's display identity attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub user_id: Uuid,
    pub name: String,
    pub color: String,
    pub message: String,
}

/// Full resynchronization reply: complete log, not the backlog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub document: Value,
    pub operations: Vec<Operation>,
    pub users: Vec<User>,
}

/// Sent to a submitter whose operation touched a target that another user
/// changed at or after the submitter's declared base revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictNotice {
    pub operation: Operation,
    pub conflicts: Vec<Operation>,
}

// ───────────────────────────────────────────────────────────────────
// Typed messages
// ───────────────────────────────────────────────────────────────────

/// Everything a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Join(JoinRequest),
    Leave,
    Cursor(CursorPosition),
    Selection(Selection),
    Operation(OperationRequest),
    Chat(ChatRequest),
    Viewport(Viewport),
    Sync,
    Presence(PresenceState),
    Ping,
}

impl ClientMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Join(_) => MessageType::Join,
            Self::Leave => MessageType::Leave,
            Self::Cursor(_) => MessageType::Cursor,
            Self::Selection(_) => MessageType::Selection,
            Self::Operation(_) => MessageType::Operation,
            Self::Chat(_) => MessageType::Chat,
            Self::Viewport(_) => MessageType::Viewport,
            Self::Sync => MessageType::Sync,
            Self::Presence(_) => MessageType::Presence,
            Self::Ping => MessageType::Ping,
        }
    }

    /// Wrap into an envelope addressed to `session_id`.
    ///
    /// `user_id` is informational only; servers ignore it.
    pub fn into_envelope(
        self,
        session_id: impl Into<String>,
        user_id: Option<Uuid>,
    ) -> Result<Envelope, ProtocolError> {
        let msg_type = self.message_type();
        let data = match self {
            Self::Join(p) => to_value(&p)?,
            Self::Cursor(p) => to_value(&p)?,
            Self::Selection(p) => to_value(&p)?,
            Self::Operation(p) => to_value(&p)?,
            Self::Chat(p) => to_value(&p)?,
            Self::Viewport(p) => to_value(&p)?,
            Self::Presence(p) => to_value(&p)?,
            Self::Leave | Self::Sync | Self::Ping => Value::Null,
        };
        Ok(Envelope::new(msg_type, session_id, user_id, data))
    }
}

/// Everything a server may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Connected(Connected),
    SessionJoined(SessionJoined),
    UserJoined(UserJoined),
    UserLeft(UserLeft),
    UserDisconnected(UserLeft),
    CursorUpdate(CursorUpdate),
    SelectionUpdate(SelectionUpdate),
    ViewportUpdate(ViewportUpdate),
    Operation(Operation),
    Chat(ChatMessage),
    SyncResponse(SyncResponse),
    PresenceUpdate(PresenceUpdate),
    ConflictDetected(ConflictNotice),
    Pong,
}

impl ServerMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Connected(_) => MessageType::Connected,
            Self::SessionJoined(_) => MessageType::SessionJoined,
            Self::UserJoined(_) => MessageType::UserJoined,
            Self::UserLeft(_) => MessageType::UserLeft,
            Self::UserDisconnected(_) => MessageType::UserDisconnected,
            Self::CursorUpdate(_) => MessageType::CursorUpdate,
            Self::SelectionUpdate(_) => MessageType::SelectionUpdate,
            Self::ViewportUpdate(_) => MessageType::ViewportUpdate,
            Self::Operation(_) => MessageType::Operation,
            Self::Chat(_) => MessageType::Chat,
            Self::SyncResponse(_) => MessageType::SyncResponse,
            Self::PresenceUpdate(_) => MessageType::PresenceUpdate,
            Self::ConflictDetected(_) => MessageType::ConflictDetected,
            Self::Pong => MessageType::Pong,
        }
    }

    /// The user this message is about, placed in the envelope's `userId`.
    pub fn subject(&self) -> Option<Uuid> {
        match self {
            Self::Connected(p) => Some(p.user_id),
            Self::SessionJoined(p) => Some(p.user_id),
            Self::UserJoined(p) => Some(p.user.id),
            Self::UserLeft(p) | Self::UserDisconnected(p) => Some(p.user_id),
            Self::CursorUpdate(p) => Some(p.user_id),
            Self::SelectionUpdate(p) => Some(p.user_id),
            Self::ViewportUpdate(p) => Some(p.user_id),
            Self::Operation(op) => Some(op.user_id),
            Self::Chat(p) => Some(p.user_id),
            Self::PresenceUpdate(p) => Some(p.user_id),
            Self::ConflictDetected(p) => Some(p.operation.user_id),
            Self::SyncResponse(_) | Self::Pong => None,
        }
    }

    pub fn into_envelope(self, session_id: impl Into<String>) -> Result<Envelope, ProtocolError> {
        let msg_type = self.message_type();
        let user_id = self.subject();
        let data = match self {
            Self::Connected(p) => to_value(&p)?,
            Self::SessionJoined(p) => to_value(&p)?,
            Self::UserJoined(p) => to_value(&p)?,
            Self::UserLeft(p) | Self::UserDisconnected(p) => to_value(&p)?,
            Self::CursorUpdate(p) => to_value(&p)?,
            Self::SelectionUpdate(p) => to_value(&p)?,
            Self::ViewportUpdate(p) => to_value(&p)?,
            Self::Operation(p) => to_value(&p)?,
            Self::Chat(p) => to_value(&p)?,
            Self::SyncResponse(p) => to_value(&p)?,
            Self::PresenceUpdate(p) => to_value(&p)?,
            Self::ConflictDetected(p) => to_value(&p)?,
            Self::Pong => Value::Null,
        };
        Ok(Envelope::new(msg_type, session_id, user_id, data))
    }

    /// Encode straight to a JSON text frame.
    pub fn encode(self, session_id: &str) -> Result<String, ProtocolError> {
        self.into_envelope(session_id)?.encode()
    }
}

fn to_value<T: Serialize>(payload: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(payload).map_err(|e| ProtocolError::Serialization(e.to_string()))
}

// ───────────────────────────────────────────────────────────────────
// Envelope
// ───────────────────────────────────────────────────────────────────

/// The only shape ever placed on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn new(
        msg_type: MessageType,
        session_id: impl Into<String>,
        user_id: Option<Uuid>,
        data: Value,
    ) -> Self {
        Self {
            msg_type,
            user_id: user_id.map(|id| id.to_string()).unwrap_or_default(),
            session_id: session_id.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parse a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    fn payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        T::deserialize(&self.data)
            .map_err(|e| ProtocolError::Deserialization(format!("{} payload: {e}", self.msg_type)))
    }

    /// Interpret as a client → server message.
    pub fn client_message(&self) -> Result<ClientMessage, ProtocolError> {
        Ok(match self.msg_type {
            MessageType::Join => ClientMessage::Join(self.payload()?),
            MessageType::Leave => ClientMessage::Leave,
            MessageType::Cursor => ClientMessage::Cursor(self.payload()?),
            MessageType::Selection => ClientMessage::Selection(self.payload()?),
            MessageType::Operation => ClientMessage::Operation(self.payload()?),
            MessageType::Chat => ClientMessage::Chat(self.payload()?),
            MessageType::Viewport => ClientMessage::Viewport(self.payload()?),
            MessageType::Sync => ClientMessage::Sync,
            MessageType::Presence => ClientMessage::Presence(self.payload()?),
            MessageType::Ping => ClientMessage::Ping,
            MessageType::Connected
            | MessageType::SessionJoined
            | MessageType::UserJoined
            | MessageType::UserLeft
            | MessageType::UserDisconnected
            | MessageType::CursorUpdate
            | MessageType::SelectionUpdate
            | MessageType::ViewportUpdate
            | MessageType::SyncResponse
            | MessageType::PresenceUpdate
            | MessageType::ConflictDetected
            | MessageType::Pong => return Err(ProtocolError::UnexpectedType(self.msg_type)),
        })
    }

    /// Interpret as a server → client message.
    pub fn server_message(&self) -> Result<ServerMessage, ProtocolError> {
        Ok(match self.msg_type {
            MessageType::Connected => ServerMessage::Connected(self.payload()?),
            MessageType::SessionJoined => ServerMessage::SessionJoined(self.payload()?),
            MessageType::UserJoined => ServerMessage::UserJoined(self.payload()?),
            MessageType::UserLeft => ServerMessage::UserLeft(self.payload()?),
            MessageType::UserDisconnected => ServerMessage::UserDisconnected(self.payload()?),
            MessageType::CursorUpdate => ServerMessage::CursorUpdate(self.payload()?),
            MessageType::SelectionUpdate => ServerMessage::SelectionUpdate(self.payload()?),
            MessageType::ViewportUpdate => ServerMessage::ViewportUpdate(self.payload()?),
            MessageType::Operation => ServerMessage::Operation(self.payload()?),
            MessageType::Chat => ServerMessage::Chat(self.payload()?),
            MessageType::SyncResponse => ServerMessage::SyncResponse(self.payload()?),
            MessageType::PresenceUpdate => ServerMessage::PresenceUpdate(self.payload()?),
            MessageType::ConflictDetected => ServerMessage::ConflictDetected(self.payload()?),
            MessageType::Pong => ServerMessage::Pong,
            MessageType::Join
            | MessageType::Leave
            | MessageType::Cursor
            | MessageType::Selection
            | MessageType::Viewport
            | MessageType::Sync
            | MessageType::Presence
            | MessageType::Ping => return Err(ProtocolError::UnexpectedType(self.msg_type)),
        })
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Unexpected message type: {0}")]
    UnexpectedType(MessageType),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Connection timeout")]
    Timeout,
}
