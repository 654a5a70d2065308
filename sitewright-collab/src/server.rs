//! WebSocket connection manager.
//!
//! Architecture:
//! ```text
//! Client A ──┐                          ┌── Session "doc1" ── OperationLog
//!            ├── connection task ──────►│        │
//! Client B ──┘   (one per socket)       │        └── member outboxes ──► A, B
//!                                       │
//!                                       └── Session "doc2" …
//!                     Reaper ── sweeps SessionRegistry every reap_interval
//! ```
//!
//! Each connection task:
//! - assigns a fresh user id and sends `connected`
//! - reads frames sequentially and routes them through the registry
//! - drains its outbox onto the socket
//! - on close or error, leaves every session the user joined
//!
//! Malformed frames are logged and dropped; the connection stays open.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{DeliveryCounters, DeliveryStats, Outbox};
use crate::document::DocumentLayer;
use crate::protocol::{ClientMessage, Connected, Envelope, ServerMessage};
use crate::reaper::Reaper;
use crate::registry::{LeaveReason, SessionConfig, SessionRegistry};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames buffered per connection before new ones are dropped
    pub outbox_capacity: usize,
    /// How often the reaper sweeps for empty sessions
    pub reap_interval: Duration,
    /// Silence after which a member counts as idle
    pub idle_threshold: Duration,
    /// Per-session behaviour
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            outbox_capacity: 256,
            reap_interval: Duration::from_secs(60),
            idle_threshold: Duration::from_secs(300),
            session: SessionConfig::default(),
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub malformed_messages: u64,
    pub active_sessions: usize,
}

#[derive(Debug, Default)]
struct ServerCounters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    total_messages: AtomicU64,
    malformed_messages: AtomicU64,
}

/// The collaboration server.
pub struct SyncServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    counters: Arc<ServerCounters>,
    delivery: Arc<DeliveryCounters>,
}

impl SyncServer {
    /// Create a new server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.session.clone()));
        Self::with_registry(config, registry)
    }

    /// Create with a custom document layer.
    pub fn with_document_layer(config: ServerConfig, layer: Arc<dyn DocumentLayer>) -> Self {
        let registry = Arc::new(SessionRegistry::with_document_layer(config.session.clone(), layer));
        Self::with_registry(config, registry)
    }

    fn with_registry(config: ServerConfig, registry: Arc<SessionRegistry>) -> Self {
        Self {
            config,
            registry,
            counters: Arc::new(ServerCounters::default()),
            delivery: Arc::new(DeliveryCounters::default()),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind and serve forever.
    pub async fn run(&self) -> std::io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Bind and serve until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve an already bound listener until `shutdown` completes.
    ///
    /// On shutdown all connection tasks are aborted, the reaper is stopped
    /// and every session is dropped.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()>,
    {
        log::info!("Collaboration server listening on {}", listener.local_addr()?);
        let reaper = Reaper::spawn(
            self.registry.clone(),
            self.config.reap_interval,
            self.config.idle_threshold,
        );
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            log::error!("Failed to accept connection: {e}");
                            continue;
                        }
                    };
                    log::debug!("New TCP connection from {addr}");

                    let registry = self.registry.clone();
                    let counters = self.counters.clone();
                    let delivery = self.delivery.clone();
                    let capacity = self.config.outbox_capacity;
                    connections.spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, addr, registry, counters, delivery, capacity).await
                        {
                            log::error!("Connection error from {addr}: {e}");
                        }
                    });
                }

                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        log::info!("Shutting down, closing {} connection(s)", connections.len());
        connections.shutdown().await;
        reaper.stop();
        self.registry.clear().await;
        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.counters.total_connections.load(Ordering::Relaxed),
            active_connections: self.counters.active_connections.load(Ordering::Relaxed),
            total_messages: self.counters.total_messages.load(Ordering::Relaxed),
            malformed_messages: self.counters.malformed_messages.load(Ordering::Relaxed),
            active_sessions: self.registry.session_count().await,
        }
    }

    /// Outbound delivery statistics across all connections.
    pub fn delivery_stats(&self) -> DeliveryStats {
        self.delivery.snapshot()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Shared session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    counters: Arc<ServerCounters>,
    delivery: Arc<DeliveryCounters>,
    outbox_capacity: usize,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let user_id = Uuid::new_v4();
    let (outbox, mut outbox_rx) = Outbox::channel(user_id, outbox_capacity, delivery);
    counters.total_connections.fetch_add(1, Ordering::Relaxed);
    counters.active_connections.fetch_add(1, Ordering::Relaxed);
    log::info!("WebSocket connection from {addr} assigned user {user_id}");

    let greeting = ServerMessage::Connected(Connected { user_id }).encode("");
    let result = match greeting {
        Ok(text) => ws_sender.send(Message::text(text)).await,
        Err(e) => {
            log::error!("Failed to encode greeting for {user_id}: {e}");
            Ok(())
        }
    };

    let result = match result {
        Err(e) => Err(e),
        Ok(()) => loop {
            tokio::select! {
                msg = ws_receiver.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        counters.total_messages.fetch_add(1, Ordering::Relaxed);
                        route(&registry, &outbox, &counters, text.as_str()).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        counters.total_messages.fetch_add(1, Ordering::Relaxed);
                        match std::str::from_utf8(&data) {
                            Ok(text) => route(&registry, &outbox, &counters, text).await,
                            Err(_) => {
                                counters.malformed_messages.fetch_add(1, Ordering::Relaxed);
                                log::warn!("Dropping non-UTF-8 frame from {user_id}");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                            break Err(e);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Connection closed from {addr} ({user_id})");
                        break Ok(());
                    }
                    Some(Err(e)) => {
                        log::error!("WebSocket error from {addr} ({user_id}): {e}");
                        break Ok(());
                    }
                    Some(Ok(_)) => {}
                },

                Some(frame) = outbox_rx.recv() => {
                    if let Err(e) = ws_sender.send(Message::text(frame.to_string())).await {
                        break Err(e);
                    }
                }
            }
        },
    };

    // Cleanup: the socket is gone, so is every membership
    let left = registry.disconnect(user_id).await;
    counters.active_connections.fetch_sub(1, Ordering::Relaxed);
    log::debug!("User {user_id} removed from {left} session(s)");
    result
}

/// Parse one frame and dispatch it. Never fails the connection.
async fn route(registry: &SessionRegistry, outbox: &Outbox, counters: &ServerCounters, text: &str) {
    let user_id = outbox.peer_id();
    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            counters.malformed_messages.fetch_add(1, Ordering::Relaxed);
            log::warn!("Dropping malformed envelope from {user_id}: {e}");
            return;
        }
    };
    let message = match envelope.client_message() {
        Ok(message) => message,
        Err(e) => {
            counters.malformed_messages.fetch_add(1, Ordering::Relaxed);
            log::warn!("Dropping {} from {user_id}: {e}", envelope.msg_type);
            return;
        }
    };

    let session_id = envelope.session_id.as_str();
    match message {
        ClientMessage::Join(request) => {
            registry.join(session_id, outbox, request).await;
        }
        ClientMessage::Leave => {
            registry.leave(session_id, user_id, LeaveReason::Left).await;
        }
        ClientMessage::Cursor(cursor) => {
            registry.update_cursor(session_id, user_id, cursor).await;
        }
        ClientMessage::Selection(selection) => {
            registry.update_selection(session_id, user_id, selection).await;
        }
        ClientMessage::Viewport(viewport) => {
            registry.update_viewport(session_id, user_id, viewport).await;
        }
        ClientMessage::Presence(state) => {
            registry.update_presence(session_id, user_id, state.is_active).await;
        }
        ClientMessage::Chat(chat) => {
            registry.chat(session_id, user_id, chat.message).await;
        }
        ClientMessage::Operation(request) => {
            registry.submit_operation(session_id, user_id, request).await;
        }
        ClientMessage::Sync => {
            registry.sync(session_id, user_id).await;
        }
        ClientMessage::Ping => {
            registry.touch(session_id, user_id).await;
            match ServerMessage::Pong.encode(session_id) {
                Ok(text) => {
                    outbox.deliver(Arc::from(text));
                }
                Err(e) => log::error!("Failed to encode pong: {e}"),
            }
        }
    }
}
