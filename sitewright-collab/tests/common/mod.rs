//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use sitewright_collab::protocol::{ClientMessage, Envelope, MessageType, ServerMessage};
use sitewright_collab::server::{ServerConfig, SyncServer};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

pub const WAIT: Duration = Duration::from_secs(2);

/// Start a server on a free port; returns it with its ws:// URL.
pub async fn start_test_server() -> (Arc<SyncServer>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        ..ServerConfig::default()
    };
    let server = Arc::new(SyncServer::new(config));
    let running = server.clone();
    tokio::spawn(async move {
        running
            .serve(listener, std::future::pending())
            .await
            .unwrap();
    });
    (server, format!("ws://127.0.0.1:{port}"))
}

/// A bare websocket speaking the envelope protocol.
pub struct RawPeer {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pub user_id: Uuid,
}

impl RawPeer {
    /// Connect and consume the `connected` greeting.
    pub async fn connect(url: &str) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        let mut peer = Self { ws, user_id: Uuid::nil() };
        match peer.recv().await {
            ServerMessage::Connected(connected) => peer.user_id = connected.user_id,
            other => panic!("expected connected, got {other:?}"),
        }
        peer
    }

    pub async fn send(&mut self, session_id: &str, message: ClientMessage) {
        let text = message.into_envelope(session_id, None).unwrap().encode().unwrap();
        self.send_raw(&text).await;
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::text(text.to_string())).await.unwrap();
    }

    pub async fn recv_envelope(&mut self) -> Envelope {
        loop {
            let msg = timeout(WAIT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("socket closed")
                .unwrap();
            if let Message::Text(text) = msg {
                return Envelope::decode(text.as_str()).unwrap();
            }
        }
    }

    pub async fn recv(&mut self) -> ServerMessage {
        self.recv_envelope().await.server_message().unwrap()
    }

    /// Skip frames until one of type `tag` arrives.
    pub async fn recv_until(&mut self, tag: MessageType) -> ServerMessage {
        loop {
            let message = self.recv().await;
            if message.message_type() == tag {
                return message;
            }
        }
    }

    /// Assert no text frame arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(Ok(Message::Text(text)))) = timeout(window, self.ws.next()).await {
            panic!("unexpected frame {text}");
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
