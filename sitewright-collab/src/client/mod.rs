//! WebSocket session client for connecting to the collaboration server.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect, automatic reconnect with
//!   capped exponential backoff)
//! - Optimistic operations with an offline queue replayed on reconnect
//! - Presence updates (cursor, selection, viewport, active flag) and chat
//! - A typed event stream mirroring the session for the host application
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──handshake──► Connected
//!       ▲                                                   │ socket closed
//!       │ attempts exhausted                                ▼
//!       └──────────────── Reconnecting ◄── backoff retry ───┘
//! ```

mod backoff;
mod mirror;
mod queue;

pub use backoff::Backoff;
pub use mirror::{LocalState, PendingOperation};
pub use queue::OfflineQueue;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::oplog::{Operation, OperationKind};
use crate::protocol::{
    ChatMessage, ChatRequest, ClientMessage, ConflictNotice, CursorPosition, CursorUpdate,
    Envelope, JoinRequest, PresenceState, PresenceUpdate, ProtocolError, Selection,
    SelectionUpdate, ServerMessage, Viewport, ViewportUpdate,
};
use crate::session::User;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted by the session client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Socket open and identity assigned
    Connected { user_id: Uuid },
    /// Full snapshot received (join reply or sync response)
    StateUpdate {
        users: Vec<User>,
        document: Value,
        operations: Vec<Operation>,
    },
    UserJoined(User),
    UserLeft { user_id: Uuid, name: String },
    CursorUpdate(CursorUpdate),
    SelectionUpdate(SelectionUpdate),
    ViewportUpdate(ViewportUpdate),
    /// Operation authored by another member
    RemoteOperation(Operation),
    /// Authoritative copy of one of our own operations
    OperationAck(Operation),
    Comment(ChatMessage),
    Presence(PresenceUpdate),
    Conflict(ConflictNotice),
    /// Connection lost or closed
    Disconnected,
    /// A retry is scheduled after `delay`
    Reconnecting { attempt: u32, delay: Duration },
    /// Automatic reconnection gave up; call `connect()` to try again
    ReconnectFailed { attempts: u32 },
}

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("Offline queue is full")]
    QueueFull,
    #[error("Not connected")]
    NotConnected,
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server URL, e.g. `ws://127.0.0.1:9090`
    pub url: String,
    pub session_id: String,
    pub document_id: String,
    pub name: String,
    pub email: Option<String>,
    pub avatar: Option<String>,
    pub heartbeat_interval: Duration,
    pub handshake_timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub event_capacity: usize,
    pub queue_capacity: usize,
}

impl ClientConfig {
    /// Config for joining `session_id` as `name`; the document id defaults
    /// to the session id.
    pub fn new(url: impl Into<String>, session_id: impl Into<String>, name: impl Into<String>) -> Self {
        let session_id = session_id.into();
        Self {
            url: url.into(),
            document_id: session_id.clone(),
            session_id,
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9090".to_string(),
            session_id: String::new(),
            document_id: String::new(),
            name: "Anonymous".to_string(),
            email: None,
            avatar: None,
            heartbeat_interval: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_reconnect_attempts: 5,
            event_capacity: 256,
            queue_capacity: 10_000,
        }
    }
}

#[derive(Default)]
struct Tasks {
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl Tasks {
    fn abort_all(&mut self) {
        for handle in [
            self.reader.take(),
            self.writer.take(),
            self.heartbeat.take(),
            self.reconnect.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

struct Inner {
    config: ClientConfig,
    state: RwLock<ConnectionState>,
    local: RwLock<LocalState>,
    /// Lock order: queue, then state or outgoing.
    queue: Mutex<OfflineQueue>,
    outgoing: Mutex<Option<mpsc::Sender<String>>>,
    tasks: std::sync::Mutex<Tasks>,
    backoff: std::sync::Mutex<Backoff>,
    /// Set by `disconnect()`; suppresses automatic reconnection.
    closing: AtomicBool,
    event_tx: mpsc::Sender<ClientEvent>,
}

fn guard<T>(mutex: &std::sync::Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn emit(&self, event: ClientEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::warn!("Client event channel full, dropping event"),
            Err(TrySendError::Closed(_)) => {}
        }
    }

    async fn set_state(&self, state: ConnectionState) -> ConnectionState {
        std::mem::replace(&mut *self.state.write().await, state)
    }

    async fn encode(&self, message: ClientMessage) -> Result<String, ClientError> {
        let user_id = self.local.read().await.user_id;
        Ok(message
            .into_envelope(self.config.session_id.clone(), user_id)?
            .encode()?)
    }

    /// Encode and hand a message to the writer task.
    async fn transmit(&self, message: ClientMessage) -> Result<(), ClientError> {
        let text = self.encode(message).await?;
        let tx = self.outgoing.lock().await.clone().ok_or(ClientError::NotConnected)?;
        tx.send(text).await.map_err(|_| ClientError::NotConnected)
    }

    /// Open the socket and wait for the server's `connected` greeting.
    async fn handshake(&self) -> Result<(SplitSink<WsStream, Message>, SplitStream<WsStream>, Uuid), ClientError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.config.url.as_str()).await?;
        let (sink, mut stream) = ws_stream.split();

        while let Some(msg) = stream.next().await {
            let text = match msg? {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            match Envelope::decode(text.as_str()).and_then(|e| e.server_message()) {
                Ok(ServerMessage::Connected(connected)) => {
                    return Ok((sink, stream, connected.user_id));
                }
                Ok(other) => log::debug!("Ignoring {} before greeting", other.message_type()),
                Err(e) => log::warn!("Malformed greeting: {e}"),
            }
        }
        Err(ProtocolError::ConnectionClosed.into())
    }

    /// Connect, join, replay the offline queue and start the background
    /// tasks. State is left untouched on failure.
    async fn establish(inner: &Arc<Inner>, phase: ConnectionState) -> Result<(), ClientError> {
        inner.set_state(phase).await;

        let timeout = inner.config.handshake_timeout;
        let (mut sink, mut stream, user_id) = match tokio::time::timeout(timeout, inner.handshake()).await {
            Ok(result) => result?,
            Err(_) => return Err(ClientError::HandshakeTimeout(timeout)),
        };
        inner.local.write().await.begin(user_id);

        let join = JoinRequest {
            document_id: inner.config.document_id.clone(),
            name: inner.config.name.clone(),
            email: inner.config.email.clone(),
            avatar: inner.config.avatar.clone(),
            document: None,
        };
        let join = inner.encode(ClientMessage::Join(join)).await?;
        sink.send(Message::text(join)).await?;

        // Join and replay go straight to the socket. Holding the queue lock
        // until Connected keeps concurrent submissions behind the replayed
        // ones; an entry leaves the queue only once its frame is flushed.
        let mut queue = inner.queue.lock().await;
        inner.replay(&mut queue, &mut sink).await?;

        // Writer task: forward outgoing channel to the socket
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        let writer = tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::text(text)).await {
                    log::warn!("Write failed: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        });
        *inner.outgoing.lock().await = Some(out_tx);
        inner.set_state(ConnectionState::Connected).await;
        drop(queue);

        guard(&inner.backoff).reset();
        log::info!("Connected to {} as {user_id}", inner.config.url);
        inner.emit(ClientEvent::Connected { user_id });

        let heartbeat = {
            let inner = inner.clone();
            tokio::spawn(async move {
                let period = inner.config.heartbeat_interval.max(Duration::from_millis(1));
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = inner.transmit(ClientMessage::Ping).await {
                        log::debug!("Heartbeat stopped: {e}");
                        break;
                    }
                }
            })
        };

        let reader = {
            let inner = inner.clone();
            tokio::spawn(async move {
                while let Some(msg) = stream.next().await {
                    match msg {
                        Ok(Message::Text(text)) => inner.handle_frame(text.as_str()).await,
                        Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                            Ok(text) => inner.handle_frame(text).await,
                            Err(_) => log::warn!("Dropping non-UTF-8 frame"),
                        },
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            log::warn!("Connection error: {e}");
                            break;
                        }
                    }
                }
                Inner::connection_lost(&inner).await;
            })
        };

        {
            let mut tasks = guard(&inner.tasks);
            if inner.closing.load(Ordering::SeqCst) {
                // disconnect() ran while we were connecting
                reader.abort();
                heartbeat.abort();
                writer.abort();
                return Err(ClientError::NotConnected);
            }
            for old in [
                tasks.reader.replace(reader),
                tasks.writer.replace(writer),
                tasks.heartbeat.replace(heartbeat),
            ]
            .into_iter()
            .flatten()
            {
                old.abort();
            }
        }

        Ok(())
    }

    /// Send queued operations oldest first. On failure the unsent ones stay
    /// queued for the next connect.
    async fn replay(
        &self,
        queue: &mut OfflineQueue,
        sink: &mut SplitSink<WsStream, Message>,
    ) -> Result<(), ClientError> {
        if let Some(age) = queue.oldest_age() {
            log::info!("Replaying {} queued operation(s), oldest {age:?}", queue.len());
        }
        while let Some(request) = queue.front().cloned() {
            let text = self.encode(ClientMessage::Operation(request)).await?;
            if let Err(e) = sink.send(Message::text(text)).await {
                log::warn!("Replay interrupted, {} operation(s) still queued", queue.len());
                return Err(e.into());
            }
            queue.pop_front();
        }
        Ok(())
    }

    async fn handle_frame(&self, text: &str) {
        let message = match Envelope::decode(text).and_then(|e| e.server_message()) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Dropping malformed server frame: {e}");
                return;
            }
        };
        let event = self.local.write().await.apply(message);
        if let Some(event) = event {
            self.emit(event);
        }
    }

    /// Reader saw the socket go away.
    async fn connection_lost(inner: &Arc<Inner>) {
        *inner.outgoing.lock().await = None;
        if let Some(heartbeat) = guard(&inner.tasks).heartbeat.take() {
            heartbeat.abort();
        }
        if inner.closing.load(Ordering::SeqCst) {
            return;
        }

        inner.set_state(ConnectionState::Reconnecting).await;
        log::info!("Connection to {} lost", inner.config.url);
        inner.emit(ClientEvent::Disconnected);

        let mut tasks = guard(&inner.tasks);
        if !inner.closing.load(Ordering::SeqCst) {
            tasks.reconnect = Some(tokio::spawn(Inner::reconnect(inner.clone())));
        }
    }

    /// Retry with backoff until connected or out of attempts.
    fn reconnect(inner: Arc<Inner>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            loop {
                let next = {
                    let mut backoff = guard(&inner.backoff);
                    backoff.next_delay().map(|delay| (backoff.attempt(), delay))
                };
                let Some((attempt, delay)) = next else {
                    let attempts = guard(&inner.backoff).attempt();
                    log::warn!("Giving up on {} after {attempts} attempt(s)", inner.config.url);
                    inner.set_state(ConnectionState::Disconnected).await;
                    inner.emit(ClientEvent::ReconnectFailed { attempts });
                    return;
                };

                log::info!("Reconnecting in {delay:?} (attempt {attempt})");
                inner.emit(ClientEvent::Reconnecting { attempt, delay });
                tokio::time::sleep(delay).await;
                if inner.closing.load(Ordering::SeqCst) {
                    return;
                }

                match Inner::establish(&inner, ConnectionState::Reconnecting).await {
                    Ok(()) => return,
                    Err(e) => log::warn!("Reconnect attempt {attempt} failed: {e}"),
                }
            }
        })
    }
}

/// The session client.
///
/// Mirrors one collaboration session locally and keeps the connection
/// alive. Everything the host application needs arrives as
/// [`ClientEvent`]s on the receiver returned by [`SessionClient::take_event_rx`].
pub struct SessionClient {
    inner: Arc<Inner>,
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
}

impl SessionClient {
    /// Create a new client. Nothing is connected until [`connect`](Self::connect).
    pub fn new(config: ClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let backoff = Backoff::new(config.base_delay, config.max_delay, config.max_reconnect_attempts);
        let inner = Inner {
            state: RwLock::new(ConnectionState::Disconnected),
            local: RwLock::new(LocalState::new(config.session_id.clone())),
            queue: Mutex::new(OfflineQueue::new(config.queue_capacity)),
            outgoing: Mutex::new(None),
            tasks: std::sync::Mutex::new(Tasks::default()),
            backoff: std::sync::Mutex::new(backoff),
            closing: AtomicBool::new(false),
            event_tx,
            config,
        };
        Self {
            inner: Arc::new(inner),
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Connect, join the configured session and replay queued operations.
    ///
    /// Fails with [`ClientError::HandshakeTimeout`] if the server does not
    /// greet within the configured handshake timeout.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        inner.closing.store(false, Ordering::SeqCst);
        if let Some(pending) = guard(&inner.tasks).reconnect.take() {
            pending.abort();
        }

        match Inner::establish(inner, ConnectionState::Connecting).await {
            Ok(()) => Ok(()),
            Err(e) => {
                *inner.outgoing.lock().await = None;
                inner.set_state(ConnectionState::Disconnected).await;
                log::warn!("Connect to {} failed: {e}", inner.config.url);
                Err(e)
            }
        }
    }

    /// Close the connection and cancel heartbeat and reconnection.
    /// Idempotent.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.closing.store(true, Ordering::SeqCst);
        {
            let mut tasks = guard(&inner.tasks);
            for handle in [tasks.reconnect.take(), tasks.heartbeat.take(), tasks.reader.take()]
                .into_iter()
                .flatten()
            {
                handle.abort();
            }
            // The writer exits on its own once the sender is dropped,
            // closing the socket after anything already queued.
            tasks.writer.take();
        }
        *inner.outgoing.lock().await = None;

        if inner.set_state(ConnectionState::Disconnected).await != ConnectionState::Disconnected {
            log::info!("Disconnected from {}", inner.config.url);
            inner.emit(ClientEvent::Disconnected);
        }
    }

    /// Submit an operation on `target`.
    ///
    /// The operation is applied to the local mirror immediately. While
    /// offline it is queued and replayed on the next connect. Returns the
    /// operation id the server will echo back.
    pub async fn send_operation(
        &self,
        kind: OperationKind,
        target: impl Into<String>,
        data: Value,
    ) -> Result<Uuid, ClientError> {
        let target = target.into();
        let mut data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => Map::from_iter([("value".to_string(), other)]),
        };
        data.insert("target".to_string(), Value::String(target.clone()));

        let id = Uuid::new_v4();
        let mut queue = self.inner.queue.lock().await;
        let request = self
            .inner
            .local
            .write()
            .await
            .record_pending(id, kind, target, Value::Object(data));

        if *self.inner.state.read().await == ConnectionState::Connected {
            match self.inner.transmit(ClientMessage::Operation(request.clone())).await {
                Ok(()) => return Ok(id),
                Err(ClientError::NotConnected) => {}
                Err(e) => {
                    self.inner.local.write().await.discard_pending(id);
                    return Err(e);
                }
            }
        }

        if !queue.enqueue(request) {
            self.inner.local.write().await.discard_pending(id);
            return Err(ClientError::QueueFull);
        }
        log::debug!("Queued operation {id} while offline ({} pending)", queue.len());
        Ok(id)
    }

    /// Presence is ephemeral: dropped while offline.
    async fn send_presence(&self, message: ClientMessage) -> Result<(), ClientError> {
        if *self.inner.state.read().await != ConnectionState::Connected {
            log::trace!("Offline, dropping {}", message.message_type());
            return Ok(());
        }
        match self.inner.transmit(message).await {
            Err(ClientError::NotConnected) => Ok(()),
            other => other,
        }
    }

    pub async fn send_cursor(&self, x: f64, y: f64) -> Result<(), ClientError> {
        self.send_presence(ClientMessage::Cursor(CursorPosition { x, y })).await
    }

    pub async fn send_selection(&self, ids: Vec<String>) -> Result<(), ClientError> {
        self.send_presence(ClientMessage::Selection(Selection { ids })).await
    }

    pub async fn send_viewport(&self, viewport: Viewport) -> Result<(), ClientError> {
        self.send_presence(ClientMessage::Viewport(viewport)).await
    }

    pub async fn set_active(&self, is_active: bool) -> Result<(), ClientError> {
        self.send_presence(ClientMessage::Presence(PresenceState { is_active })).await
    }

    /// Send a chat line to the session.
    pub async fn send_comment(&self, message: impl Into<String>) -> Result<(), ClientError> {
        let message = message.into();
        self.inner
            .transmit(ClientMessage::Chat(ChatRequest { message }))
            .await
    }

    /// Ask for the full document, log and member list.
    pub async fn request_sync(&self) -> Result<(), ClientError> {
        self.inner.transmit(ClientMessage::Sync).await
    }

    /// Leave the session but keep the socket open.
    pub async fn leave(&self) -> Result<(), ClientError> {
        self.inner.transmit(ClientMessage::Leave).await
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.inner.state.read().await
    }

    /// Snapshot of the local mirror.
    pub async fn local_state(&self) -> LocalState {
        self.inner.local.read().await.clone()
    }

    /// Id assigned by the server on the current connection.
    pub async fn user_id(&self) -> Option<Uuid> {
        self.inner.local.read().await.user_id
    }

    pub async fn offline_queue_len(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.inner.closing.store(true, Ordering::SeqCst);
        guard(&self.inner.tasks).abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn offline_client() -> SessionClient {
        SessionClient::new(ClientConfig::new("ws://127.0.0.1:1", "doc1", "Ada"))
    }

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::new("ws://localhost:9090", "doc1", "Ada");
        assert_eq!(config.document_id, "doc1");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.base_delay, Duration::from_millis(1000));
        assert_eq!(config.max_delay, Duration::from_millis(30_000));
        assert_eq!(config.max_reconnect_attempts, 5);
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = offline_client();
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert_eq!(client.offline_queue_len().await, 0);
        assert_eq!(client.user_id().await, None);
        assert_eq!(client.config().name, "Ada");
    }

    #[tokio::test]
    async fn test_take_event_rx() {
        let mut client = offline_client();
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }

    #[tokio::test]
    async fn test_send_operation_offline_queues() {
        let client = offline_client();

        let first = client.send_operation(OperationKind::Insert, "pump-1", json!({"kw": 4})).await.unwrap();
        let second = client.send_operation(OperationKind::Modify, "pump-1", Value::Null).await.unwrap();
        assert_eq!(client.offline_queue_len().await, 2);

        let local = client.local_state().await;
        assert_eq!(local.version, 2);
        assert_eq!(local.pending.iter().map(|p| p.id).collect::<Vec<_>>(), vec![first, second]);
        assert_eq!(local.pending[0].data, json!({"kw": 4, "target": "pump-1"}));
        assert_eq!(local.pending[1].data, json!({"target": "pump-1"}));
    }

    #[tokio::test]
    async fn test_offline_queue_full_rolls_back() {
        let mut config = ClientConfig::new("ws://127.0.0.1:1", "doc1", "Ada");
        config.queue_capacity = 1;
        let client = SessionClient::new(config);

        client.send_operation(OperationKind::Insert, "a", json!({})).await.unwrap();
        let err = client.send_operation(OperationKind::Insert, "b", json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::QueueFull));
        assert_eq!(client.local_state().await.pending.len(), 1);
    }

    #[tokio::test]
    async fn test_presence_offline_is_dropped() {
        let client = offline_client();
        client.send_cursor(1.0, 2.0).await.unwrap();
        client.set_active(false).await.unwrap();
        assert_eq!(client.offline_queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_chat_offline_is_an_error() {
        let client = offline_client();
        assert!(matches!(client.send_comment("hi").await, Err(ClientError::NotConnected)));
        assert!(matches!(client.request_sync().await, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut client = offline_client();
        let mut events = client.take_event_rx().unwrap();

        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_refused_reports_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = SessionClient::new(ClientConfig::new(format!("ws://{addr}"), "doc1", "Ada"));
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        // Accepts TCP but never speaks websocket
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut config = ClientConfig::new(format!("ws://{addr}"), "doc1", "Ada");
        config.handshake_timeout = Duration::from_millis(100);
        let client = SessionClient::new(config);

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::HandshakeTimeout(_)));
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }
}
