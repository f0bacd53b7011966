//! Connection Manager
//!
//! Owns one WebSocket connection to a streaming endpoint and exposes
//! send/receive/close over it.
//!
//! # Tasks
//!
//! Opening a connection splits the socket and spawns two tasks, both scoped
//! by the connection's [`CancellationToken`]:
//!
//! - **Writer**: drains an outbound queue, so every send from every task goes
//!   through one place. Answers server pings.
//! - **Reader**: forwards text frames (binary frames are read as UTF-8) to an
//!   inbound queue. Ends on close frame, stream end, or transport error.
//!
//! Lifecycle state is published on a `watch` channel. Any transport error
//! moves the state to `Failed` and cancels the token, which unblocks every
//! pending [`Connection::recv`] and stops the heartbeat. There is no
//! reconnection here.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, InvalidHeaderValue, USER_AGENT};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::credentials::Credential;
use crate::application::ports::{FrameSink, PortError};

/// `User-Agent` sent on the upgrade request.
pub const USER_AGENT_VALUE: &str = concat!("tasty-stream/", env!("CARGO_PKG_VERSION"));

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Error Type
// =============================================================================

/// Transport-level errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Credential could not be encoded as a header.
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),

    /// Send attempted while the connection is not open.
    #[error("connection not open (state: {0})")]
    NotConnected(ConnectionState),

    /// The connection has shut down.
    #[error("connection closed")]
    Closed,

    /// Waiting for a state change timed out.
    #[error("timed out after {0:?} waiting for connection state")]
    Timeout(Duration),
}

impl From<TransportError> for PortError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected(state) => Self::NotConnected(state.to_string()),
            _ => Self::Closed,
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not yet opened.
    #[default]
    Idle,
    /// Transport open, protocol handshake in flight.
    Handshaking,
    /// Open and usable.
    Connected,
    /// Close requested, shutting down.
    Closing,
    /// Closed cleanly.
    Closed,
    /// Ended by a transport error.
    Failed,
}

impl ConnectionState {
    /// Whether frames may be sent in this state.
    #[must_use]
    pub const fn can_send(self) -> bool {
        matches!(self, Self::Handshaking | Self::Connected)
    }

    /// Whether this is a final state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Numeric code for the state gauge.
    #[must_use]
    pub const fn as_code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Handshaking => 1,
            Self::Connected => 2,
            Self::Closing => 3,
            Self::Closed => 4,
            Self::Failed => 5,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Handshaking => "handshaking",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Move to `next` unless already in a terminal state.
fn transition(state: &watch::Sender<ConnectionState>, next: ConnectionState) -> bool {
    state.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            return false;
        }
        *current = next;
        true
    })
}

// =============================================================================
// Message Id
// =============================================================================

/// Per-connection message id. Rendered as a decimal string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u64);

impl MessageId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Numeric value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Connection
// =============================================================================

/// A live streaming connection.
///
/// Dropping the connection cancels its tasks.
pub struct Connection {
    url: String,
    outbound_tx: mpsc::UnboundedSender<Message>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    state: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
    next_id: AtomicU64,
}

impl Connection {
    /// Open a connection.
    ///
    /// With a credential, the upgrade request carries
    /// `Authorization: Bearer <token>`. On return the state is `Connected`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the credential cannot be sent
    /// as a header, or the WebSocket upgrade fails.
    pub async fn open(url: &str, credential: Option<&Credential>) -> Result<Self, TransportError> {
        let mut request = url.into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        if let Some(credential) = credential {
            let mut value = HeaderValue::from_str(&credential.bearer())?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        tracing::info!(url = %url, "Opening connection");
        let (ws_stream, _response) = tokio_tungstenite::connect_async(request).await?;

        Ok(Self::from_stream(url, ws_stream))
    }

    fn from_stream(url: &str, ws_stream: WsStream) -> Self {
        let (write, read) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let state = Arc::new(watch::Sender::new(ConnectionState::Connected));
        let cancel = CancellationToken::new();

        tokio::spawn(write_loop(write, outbound_rx, state.clone(), cancel.clone()));
        tokio::spawn(read_loop(
            read,
            inbound_tx,
            outbound_tx.clone(),
            state.clone(),
            cancel.clone(),
        ));

        tracing::debug!(url = %url, "Connection established");

        Self {
            url: url.to_string(),
            outbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            state,
            cancel,
            next_id: AtomicU64::new(0),
        }
    }

    /// Endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Token cancelled when the connection ends for any reason.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Allocate the next message id (starting at 1).
    pub fn next_message_id(&self) -> MessageId {
        MessageId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Mark the protocol handshake as started.
    pub fn begin_handshake(&self) {
        transition(&self.state, ConnectionState::Handshaking);
    }

    /// Mark the connection fully usable.
    pub fn mark_connected(&self) {
        transition(&self.state, ConnectionState::Connected);
    }

    /// Queue a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] unless the state is
    /// `Handshaking` or `Connected`, and [`TransportError::Closed`] if the
    /// writer has stopped.
    pub fn send(&self, frame: String) -> Result<(), TransportError> {
        let state = self.state();
        if !state.can_send() || self.cancel.is_cancelled() {
            return Err(TransportError::NotConnected(state));
        }

        tracing::trace!(frame = %frame, "Sending frame");
        self.outbound_tx
            .send(Message::text(frame))
            .map_err(|_| TransportError::Closed)
    }

    /// Receive the next text frame.
    ///
    /// Returns `None` once the connection has ended and no frame is pending.
    pub async fn recv(&self) -> Option<String> {
        let mut inbound = self.inbound_rx.lock().await;
        tokio::select! {
            biased;
            frame = inbound.recv() => frame,
            () = self.cancel.cancelled() => None,
        }
    }

    /// Close the connection.
    ///
    /// Pending and later receives return `None`; later sends fail.
    pub fn close(&self) {
        if transition(&self.state, ConnectionState::Closing) {
            tracing::info!(url = %self.url, "Closing connection");
        }
        self.cancel.cancel();
    }

    /// Wait until the state satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Timeout`] if `timeout` elapses first and
    /// [`TransportError::Closed`] if the state channel ends.
    pub async fn wait_for<F>(&self, predicate: F, timeout: Duration) -> Result<ConnectionState, TransportError>
    where
        F: FnMut(&ConnectionState) -> bool,
    {
        let mut rx = self.state.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(predicate)).await {
            Ok(Ok(state)) => Ok(*state),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    /// Wait until the connection reaches a terminal state.
    pub async fn closed(&self) -> ConnectionState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl FrameSink for Connection {
    async fn send_frame(&self, frame: String) -> Result<(), PortError> {
        self.send(frame).map_err(PortError::from)
    }
}

// =============================================================================
// Tasks
// =============================================================================

async fn write_loop(
    mut write: SplitSink<WsStream, Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    state: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                // Best effort close frame; the peer may already be gone
                let _ = write.send(Message::Close(None)).await;
                let _ = write.close().await;
                transition(&state, ConnectionState::Closed);
                tracing::debug!("Writer stopped");
                return;
            }
            msg = outbound_rx.recv() => {
                let Some(msg) = msg else {
                    return;
                };
                if let Err(e) = write.send(msg).await {
                    tracing::warn!(error = %e, "WebSocket send failed");
                    transition(&state, ConnectionState::Failed);
                    cancel.cancel();
                    return;
                }
            }
        }
    }
}

async fn read_loop(
    mut read: SplitStream<WsStream>,
    inbound_tx: mpsc::UnboundedSender<String>,
    outbound_tx: mpsc::UnboundedSender<Message>,
    state: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => break,
            msg = read.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                if inbound_tx.send(text.as_str().to_owned()).is_err() {
                    break;
                }
            }
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => {
                    if inbound_tx.send(text).is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Dropping non-UTF-8 binary frame"),
            },
            Some(Ok(Message::Ping(data))) => {
                let _ = outbound_tx.send(Message::Pong(data));
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(frame = ?frame, "Server sent close frame");
                transition(&state, ConnectionState::Closed);
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(error = %e, "WebSocket receive failed");
                transition(&state, ConnectionState::Failed);
                break;
            }
            None => {
                tracing::info!("WebSocket stream ended");
                transition(&state, ConnectionState::Closed);
                break;
            }
        }
    }

    cancel.cancel();
    tracing::debug!("Reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn server() -> (String, tokio::task::JoinHandle<WebSocketStream<TcpStream>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept_async(stream).await.unwrap()
        });
        (format!("ws://{addr}"), handle)
    }

    #[test]
    fn state_send_rules() {
        assert!(ConnectionState::Handshaking.can_send());
        assert!(ConnectionState::Connected.can_send());
        assert!(!ConnectionState::Idle.can_send());
        assert!(!ConnectionState::Closing.can_send());
        assert!(!ConnectionState::Failed.can_send());
    }

    #[test]
    fn terminal_state_is_sticky() {
        let state = watch::Sender::new(ConnectionState::Connected);
        assert!(transition(&state, ConnectionState::Failed));
        assert!(!transition(&state, ConnectionState::Closed));
        assert_eq!(*state.borrow(), ConnectionState::Failed);
    }

    #[test]
    fn transport_error_maps_to_port_error() {
        let err = PortError::from(TransportError::NotConnected(ConnectionState::Closing));
        assert_eq!(err, PortError::NotConnected("closing".to_string()));
        assert_eq!(PortError::from(TransportError::Closed), PortError::Closed);
    }

    #[tokio::test]
    async fn send_and_receive_text() {
        let (url, server) = server().await;
        let conn = Connection::open(&url, None).await.unwrap();
        let mut peer = server.await.unwrap();

        assert_eq!(conn.state(), ConnectionState::Connected);

        conn.send("hello".to_string()).unwrap();
        let got = peer.next().await.unwrap().unwrap();
        assert_eq!(got.into_text().unwrap().as_str(), "hello");

        peer.send(Message::text("world")).await.unwrap();
        assert_eq!(conn.recv().await.as_deref(), Some("world"));
    }

    #[tokio::test]
    async fn binary_frames_read_as_text() {
        let (url, server) = server().await;
        let conn = Connection::open(&url, None).await.unwrap();
        let mut peer = server.await.unwrap();

        peer.send(Message::binary(b"[1]".to_vec())).await.unwrap();
        assert_eq!(conn.recv().await.as_deref(), Some("[1]"));
    }

    #[tokio::test]
    async fn message_ids_increase() {
        let (url, _server) = server().await;
        let conn = Connection::open(&url, None).await.unwrap();

        let first = conn.next_message_id();
        let second = conn.next_message_id();
        assert_eq!(first.value(), 1);
        assert_eq!(second.to_string(), "2");
    }

    #[tokio::test]
    async fn close_unblocks_recv_and_rejects_send() {
        let (url, server) = server().await;
        let conn = Arc::new(Connection::open(&url, None).await.unwrap());
        let _peer = server.await.unwrap();

        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.recv().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.close();

        let received = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(received.is_none());
        assert!(matches!(
            conn.send("late".to_string()),
            Err(TransportError::NotConnected(_))
        ));

        let state = tokio::time::timeout(Duration::from_secs(1), conn.closed())
            .await
            .unwrap();
        assert_eq!(state, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn peer_close_ends_connection() {
        let (url, server) = server().await;
        let conn = Connection::open(&url, None).await.unwrap();
        let mut peer = server.await.unwrap();

        peer.close(None).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), conn.recv())
            .await
            .unwrap();
        assert!(received.is_none());
        assert!(conn.state().is_terminal());
    }

    #[tokio::test]
    async fn open_fails_without_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = Connection::open(&format!("ws://{addr}"), None).await;
        assert!(matches!(result, Err(TransportError::WebSocket(_))));
    }

    #[tokio::test]
    async fn wait_for_times_out() {
        let (url, _server) = server().await;
        let conn = Connection::open(&url, None).await.unwrap();

        let result = conn
            .wait_for(|s| *s == ConnectionState::Handshaking, Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }
}
