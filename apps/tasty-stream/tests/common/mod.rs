//! Local WebSocket peer for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};

/// How long a test waits for any single frame or event.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(2);

/// A listening server on an ephemeral local port.
pub struct MockServer {
    listener: TcpListener,
    url: String,
}

impl MockServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        Self { listener, url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Accept the next client.
    pub async fn accept(&self) -> Peer {
        let (stream, _) = tokio::time::timeout(STEP_TIMEOUT, self.listener.accept())
            .await
            .expect("client did not connect")
            .unwrap();

        let mut authorization = None;
        let ws = accept_hdr_async(stream, |req: &Request, resp: Response| {
            authorization = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            Ok(resp)
        })
        .await
        .unwrap();

        Peer { ws, authorization }
    }
}

/// The server side of one accepted connection.
pub struct Peer {
    ws: WebSocketStream<TcpStream>,
    pub authorization: Option<String>,
}

impl Peer {
    pub async fn send_json(&mut self, value: Value) {
        self.send_text(&value.to_string()).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::text(text)).await.unwrap();
    }

    /// Next text frame parsed as JSON, or `None` once the client closes.
    pub async fn next_json(&mut self) -> Option<Value> {
        loop {
            let msg = tokio::time::timeout(STEP_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a client frame");
            match msg {
                Some(Ok(Message::Text(text))) => {
                    return Some(serde_json::from_str(text.as_str()).unwrap());
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => return None,
                Some(Ok(_)) => {}
            }
        }
    }

    /// Next frame on a Bayeux channel, skipping keep-alives on other channels.
    pub async fn next_on_channel(&mut self, channel: &str) -> Option<Value> {
        while let Some(frame) = self.next_json().await {
            if frame[0]["channel"] == channel {
                return Some(frame[0].clone());
            }
        }
        None
    }

    /// Drain until the client closes, returning every text frame seen.
    pub async fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_json().await {
            frames.push(frame);
        }
        frames
    }

    /// Drop the connection without a close handshake.
    pub fn abort(self) {
        drop(self.ws);
    }
}
