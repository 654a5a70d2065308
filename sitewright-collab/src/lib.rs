//! # sitewright-collab — Real-time collaboration coordinator for Sitewright
//!
//! Lets several users edit one facility document at the same time over
//! WebSocket: shared cursors, selections and viewports, chat, and an
//! append-only operation log with server-assigned revisions and conflict
//! flagging.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     WebSocket      ┌───────────────┐
//! │ SessionClient │ ◄────────────────► │  SyncServer   │
//! │  (per user)   │   JSON envelopes   │   (central)   │
//! └───────┬───────┘                    └───────┬───────┘
//!         │                                    │
//!         ▼                                    ▼
//! ┌───────────────┐                    ┌───────────────┐
//! │  LocalState   │                    │SessionRegistry│
//! │   (mirror)    │                    │  (authority)  │
//! └───────────────┘                    └───────┬───────┘
//!                                              │
//!                                      ┌───────┴───────┐
//!                                      │  Outbox per   │
//!                                      │  connection   │
//!                                      └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON envelope and typed client/server messages
//! - [`oplog`] — Operations, append-only log, conflict scan
//! - [`session`] — Collaboration session and its members
//! - [`document`] — Seam to the external document layer
//! - [`broadcast`] — Non-blocking per-connection delivery, accepted-operation feed
//! - [`registry`] — Session lifecycle and operation submission
//! - [`presence`] — Cursor, selection, viewport, activity and chat fan-out
//! - [`reaper`] — Periodic removal of empty sessions
//! - [`server`] — WebSocket connection manager
//! - [`client`] — Session client with reconnect and offline queue

pub mod protocol;
pub mod oplog;
pub mod session;
pub mod document;
pub mod broadcast;
pub mod registry;
pub mod presence;
pub mod reaper;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use protocol::{ClientMessage, Envelope, MessageType, ProtocolError, ServerMessage};
pub use oplog::{Operation, OperationKind, OperationLog};
pub use session::{CollaborationSession, User, DEFAULT_PALETTE};
pub use document::{DocumentLayer, PassthroughDocument};
pub use broadcast::{AcceptedOperation, DeliveryStats, OperationFeed, Outbox};
pub use registry::{LeaveReason, SessionConfig, SessionRegistry};
pub use reaper::{Reaper, SweepReport};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use client::{
    ClientConfig, ClientError, ClientEvent, ConnectionState, LocalState, OfflineQueue,
    SessionClient,
};
