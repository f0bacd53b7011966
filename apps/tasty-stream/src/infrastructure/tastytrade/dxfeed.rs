//! dxFeed Market Data Client
//!
//! Streams market data from dxFeed over Bayeux/CometD.
//!
//! # Stream URL
//!
//! - Production: `wss://tasty-live-web.dxfeed.com/live/cometd`
//!
//! # Lifecycle
//!
//! 1. Open the socket with the streaming token as a bearer header
//! 2. Handshake; on success publish [`MarketEvent::HandshakeCompleted`]
//! 3. Start the `/meta/connect` heartbeat and send the desired subscriptions
//! 4. Decode data frames into [`MarketEvent`]s, in receipt order
//!
//! A transport failure ends the stream with [`MarketEvent::Disconnected`]
//! unless a [`ReconnectConfig`] was supplied, in which case the client backs
//! off, reconnects and replays its subscriptions after the next handshake.
//! A rejected handshake is never retried.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, EnvelopeCodec, FeedData, QuoteDecoder};
use super::connection::{Connection, ConnectionState, TransportError};
use super::credentials::Credential;
use super::heartbeat::{BayeuxKeepAlive, HeartbeatConfig, HeartbeatError, HeartbeatScheduler};
use super::messages::{
    CONNECT_CHANNEL, DATA_CHANNEL, DATA_CHANNEL_ALIAS, Envelope, HANDSHAKE_CHANNEL,
    SUBSCRIPTION_CHANNEL,
};
use super::reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
use super::session::{BayeuxSession, SessionError};
use crate::domain::streaming::MarketEvent;
use crate::domain::subscription::{SubscriptionChanges, SubscriptionRegistry};
use crate::infrastructure::metrics::{self, Feed, SubscriptionOp};

/// Default dxFeed endpoint.
pub const DEFAULT_DXFEED_URL: &str = "wss://tasty-live-web.dxfeed.com/live/cometd";

/// Time allowed for the close handshake before giving up on it.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Consumer stream of market events.
pub type MarketEventStream = UnboundedReceiverStream<MarketEvent>;

/// Handshake progress as seen by [`DxFeedClient::wait_for_handshake`].
#[derive(Debug, Clone, PartialEq, Eq)]
enum HandshakeStatus {
    /// No session on the current connection yet.
    Pending,
    /// Session established with this client id.
    Completed(String),
    /// The server refused the handshake. Terminal.
    Rejected(Option<String>),
    /// The client stopped.
    Ended,
}

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the dxFeed client.
#[derive(Debug, thiserror::Error)]
pub enum DxFeedClientError {
    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Session failure (including a rejected handshake).
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Reconnection gave up.
    #[error("reconnect error: {0}")]
    Reconnect(#[from] ReconnectError),

    /// The connection ended without a local close.
    #[error("connection lost (state: {0})")]
    ConnectionLost(ConnectionState),

    /// No handshake completed within the timeout.
    #[error("handshake not completed within {0:?}")]
    HandshakeTimeout(Duration),

    /// The client has shut down.
    #[error("client closed")]
    Closed,
}

impl DxFeedClientError {
    /// Whether a reconnect may follow this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ConnectionLost(_))
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the dxFeed client.
#[derive(Debug, Clone)]
pub struct DxFeedConfig {
    /// WebSocket URL.
    pub url: String,
    /// Streaming token.
    pub streaming_token: Credential,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
    /// Channels whose payloads are decoded as market data.
    pub data_channels: Vec<String>,
    /// Reconnect with backoff after transport failures. `None` disables it.
    pub reconnect: Option<ReconnectConfig>,
}

impl DxFeedConfig {
    /// Create a configuration with default heartbeat and data channels and
    /// no reconnect.
    #[must_use]
    pub fn new(url: impl Into<String>, streaming_token: Credential) -> Self {
        Self {
            url: url.into(),
            streaming_token,
            heartbeat: HeartbeatConfig::bayeux(),
            data_channels: vec![DATA_CHANNEL.to_string(), DATA_CHANNEL_ALIAS.to_string()],
            reconnect: None,
        }
    }

    /// Create configuration for the production endpoint.
    #[must_use]
    pub fn production(streaming_token: Credential) -> Self {
        Self::new(DEFAULT_DXFEED_URL, streaming_token)
    }

    /// Enable reconnect.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = Some(reconnect);
        self
    }

    /// Override the heartbeat interval.
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat.interval = interval;
        self
    }

    /// Override the data channels.
    #[must_use]
    pub fn with_data_channels(mut self, channels: Vec<String>) -> Self {
        self.data_channels = channels;
        self
    }

    fn is_data_channel(&self, channel: &str) -> bool {
        self.data_channels.iter().any(|c| c == channel)
    }
}

// =============================================================================
// dxFeed Client
// =============================================================================

/// dxFeed market data client.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use futures_util::StreamExt;
/// use tasty_stream::domain::streaming::MarketEvent;
/// use tasty_stream::infrastructure::tastytrade::credentials::Credential;
/// use tasty_stream::infrastructure::tastytrade::dxfeed::{DxFeedClient, DxFeedConfig};
/// use tokio_util::sync::CancellationToken;
///
/// async fn example() -> anyhow::Result<()> {
///     let config = DxFeedConfig::production(Credential::new("streaming-token")?);
///     let (client, mut events) = DxFeedClient::new(config, CancellationToken::new());
///     let client = Arc::new(client);
///
///     client.subscribe("Quote", "AAPL")?;
///     tokio::spawn(client.clone().run());
///
///     client.wait_for_handshake(Duration::from_secs(10)).await?;
///     while let Some(event) = events.next().await {
///         if let MarketEvent::Quote(quote) = event {
///             println!("{quote}");
///         }
///     }
///     Ok(())
/// }
/// ```
pub struct DxFeedClient {
    config: DxFeedConfig,
    registry: SubscriptionRegistry,
    session: Arc<RwLock<BayeuxSession>>,
    connection: RwLock<Option<Arc<Connection>>>,
    event_tx: Mutex<Option<mpsc::UnboundedSender<MarketEvent>>>,
    handshake: watch::Sender<HandshakeStatus>,
    codec: EnvelopeCodec,
    decoder: QuoteDecoder,
    cancel: CancellationToken,
}

impl DxFeedClient {
    /// Create a client and its event stream.
    ///
    /// The stream ends when [`run`](Self::run) returns.
    #[must_use]
    pub fn new(config: DxFeedConfig, cancel: CancellationToken) -> (Self, MarketEventStream) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let session = BayeuxSession::new(config.streaming_token.clone());

        let client = Self {
            config,
            registry: SubscriptionRegistry::new(),
            session: Arc::new(RwLock::new(session)),
            connection: RwLock::new(None),
            event_tx: Mutex::new(Some(event_tx)),
            handshake: watch::Sender::new(HandshakeStatus::Pending),
            codec: EnvelopeCodec::new(),
            decoder: QuoteDecoder::new(),
            cancel,
        };

        (client, UnboundedReceiverStream::new(event_rx))
    }

    /// Desired subscriptions.
    #[must_use]
    pub const fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Client id of the current session.
    #[must_use]
    pub fn client_id(&self) -> Option<String> {
        match &*self.handshake.borrow() {
            HandshakeStatus::Completed(client_id) => Some(client_id.clone()),
            _ => None,
        }
    }

    /// Check if a handshake has completed on the current connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(*self.handshake.borrow(), HandshakeStatus::Completed(_))
    }

    /// Wait until a handshake completes.
    ///
    /// Returns the client id. Returns early once the handshake is rejected
    /// or the client stops, including when that happened before the call.
    ///
    /// # Errors
    ///
    /// Returns [`DxFeedClientError::Session`] with
    /// [`SessionError::HandshakeRejected`] after a rejection,
    /// [`DxFeedClientError::Closed`] once [`run`](Self::run) has returned, and
    /// [`DxFeedClientError::HandshakeTimeout`] if `timeout` elapses first.
    pub async fn wait_for_handshake(&self, timeout: Duration) -> Result<String, DxFeedClientError> {
        let mut rx = self.handshake.subscribe();
        let status = tokio::time::timeout(
            timeout,
            rx.wait_for(|status| *status != HandshakeStatus::Pending),
        )
        .await
        .map_err(|_| DxFeedClientError::HandshakeTimeout(timeout))?
        .map_or(HandshakeStatus::Ended, |status| status.clone());

        match status {
            HandshakeStatus::Completed(client_id) => Ok(client_id),
            HandshakeStatus::Rejected(error) => {
                Err(SessionError::HandshakeRejected { error }.into())
            }
            HandshakeStatus::Pending | HandshakeStatus::Ended => Err(DxFeedClientError::Closed),
        }
    }

    /// Subscribe to an event type for a symbol.
    ///
    /// The pair is recorded and, when a session exists, an `add` is sent.
    /// Repeat calls send again but record nothing new.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be sent on a live session.
    pub fn subscribe(&self, event_type: &str, symbol: &str) -> Result<(), DxFeedClientError> {
        if !self.registry.add(event_type, symbol) {
            tracing::debug!(event_type, symbol, "Already subscribed, re-sending");
        }
        metrics::set_active_subscriptions(self.registry.len());

        self.send_changes(
            SubscriptionChanges::add_one(event_type, symbol),
            SubscriptionOp::Add,
        )
        .map(drop)
    }

    /// Unsubscribe from an event type for a symbol.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be sent on a live session.
    pub fn unsubscribe(&self, event_type: &str, symbol: &str) -> Result<(), DxFeedClientError> {
        if !self.registry.remove(event_type, symbol) {
            tracing::debug!(event_type, symbol, "Not subscribed");
        }
        metrics::set_active_subscriptions(self.registry.len());

        self.send_changes(
            SubscriptionChanges::remove_one(event_type, symbol),
            SubscriptionOp::Remove,
        )
        .map(drop)
    }

    /// Make `symbols` the only subscriptions, under one event type.
    ///
    /// The registry is replaced and, when a session exists, one request with
    /// `reset` set is sent, dropping every other upstream subscription. An
    /// empty `symbols` clears everything.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be sent on a live session.
    pub fn replace_subscriptions(
        &self,
        event_type: &str,
        symbols: &[String],
    ) -> Result<(), DxFeedClientError> {
        self.registry.replace(event_type, symbols);
        metrics::set_active_subscriptions(self.registry.len());
        tracing::info!(event_type, symbols = symbols.len(), "Replacing subscriptions");

        self.send_changes(
            SubscriptionChanges::replace_with(event_type, symbols),
            SubscriptionOp::Replace,
        )
        .map(drop)
    }

    /// Stop the client. [`run`](Self::run) closes the connection and returns.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Run the client until closed, rejected, or out of reconnect attempts.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the stream. A local close is `Ok`.
    pub async fn run(self: Arc<Self>) -> Result<(), DxFeedClientError> {
        let mut policy = self.config.reconnect.clone().map(ReconnectPolicy::new);

        let result = loop {
            if self.cancel.is_cancelled() {
                break Ok(());
            }

            let error = match self.connect_and_run(policy.as_mut()).await {
                Ok(()) => break Ok(()),
                Err(e) if !e.is_retryable() => break Err(e),
                Err(e) => e,
            };
            tracing::warn!(error = %error, "dxFeed connection error");

            let Some(policy) = policy.as_mut() else {
                break Err(error);
            };
            let Some(delay) = policy.next_delay() else {
                break Err(ReconnectError::MaxAttemptsExceeded(policy.attempt_count()).into());
            };

            let attempt = policy.attempt_count();
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis(),
                "Reconnecting to dxFeed"
            );
            metrics::record_reconnect(Feed::DxFeed);
            self.emit(MarketEvent::Reconnecting { attempt });

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("dxFeed client cancelled during reconnect delay");
                    break Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        };

        self.finish(result.as_ref().err());
        result
    }

    /// One connection attempt, from open to disconnect.
    async fn connect_and_run(
        &self,
        policy: Option<&mut ReconnectPolicy>,
    ) -> Result<(), DxFeedClientError> {
        let conn = Arc::new(
            Connection::open(&self.config.url, Some(&self.config.streaming_token)).await?,
        );
        *self.connection.write() = Some(conn.clone());

        let outcome = self.stream_frames(&conn, policy).await;

        conn.close();
        let _ = tokio::time::timeout(CLOSE_GRACE, conn.closed()).await;
        metrics::set_connection_state(Feed::DxFeed, conn.state());

        *self.connection.write() = None;
        self.handshake.send_if_modified(|status| {
            if matches!(status, HandshakeStatus::Completed(_)) {
                *status = HandshakeStatus::Pending;
                true
            } else {
                false
            }
        });
        outcome
    }

    /// Handshake, then dispatch frames until closed or disconnected.
    async fn stream_frames(
        &self,
        conn: &Arc<Connection>,
        mut policy: Option<&mut ReconnectPolicy>,
    ) -> Result<(), DxFeedClientError> {
        conn.begin_handshake();
        metrics::set_connection_state(Feed::DxFeed, conn.state());

        let frame = {
            let mut session = self.session.write();
            session.reset();
            session.handshake_frame(conn.next_message_id())?
        };
        conn.send(frame)?;
        tracing::debug!("Handshake sent");

        loop {
            let frame = tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                frame = conn.recv() => frame,
            };
            let Some(text) = frame else {
                return Err(DxFeedClientError::ConnectionLost(conn.state()));
            };

            if self.handle_frame(conn, &text)?
                && let Some(policy) = policy.as_deref_mut()
            {
                policy.reset();
            }
        }
    }

    /// Handle one inbound text frame.
    ///
    /// Returns `true` if it completed the handshake.
    fn handle_frame(&self, conn: &Arc<Connection>, text: &str) -> Result<bool, DxFeedClientError> {
        metrics::record_frame_received(Feed::DxFeed);

        let envelopes = match self.codec.decode(text) {
            Ok(envelopes) => envelopes,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame");
                metrics::record_malformed_frame(Feed::DxFeed);
                return Ok(false);
            }
        };

        let mut handshake_completed = false;
        for envelope in envelopes {
            match envelope.channel.as_str() {
                HANDSHAKE_CHANNEL => handshake_completed |= self.on_handshake(conn, &envelope)?,
                CONNECT_CHANNEL => {
                    if !envelope.is_successful() {
                        tracing::warn!(error = ?envelope.error, "Connect rejected");
                    }
                }
                SUBSCRIPTION_CHANNEL => self.on_subscription_reply(&envelope),
                channel if self.config.is_data_channel(channel) => self.on_data(&envelope),
                channel => tracing::trace!(channel, "Ignoring message"),
            }
        }

        Ok(handshake_completed)
    }

    fn on_handshake(&self, conn: &Arc<Connection>, reply: &Envelope) -> Result<bool, DxFeedClientError> {
        let result = self.session.write().on_handshake_reply(reply);
        let client_id = match result {
            Ok(client_id) => client_id,
            Err(SessionError::HandshakeRejected { error }) => {
                tracing::warn!(error = ?error, "dxFeed handshake rejected");
                self.handshake
                    .send_replace(HandshakeStatus::Rejected(error.clone()));
                self.emit(MarketEvent::HandshakeRejected {
                    error: error.clone(),
                });
                return Err(SessionError::HandshakeRejected { error }.into());
            }
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring handshake reply");
                return Ok(false);
            }
        };

        tracing::info!(client_id = %client_id, "dxFeed handshake completed");
        conn.mark_connected();
        metrics::set_connection_state(Feed::DxFeed, conn.state());
        self.handshake
            .send_replace(HandshakeStatus::Completed(client_id.clone()));
        self.emit(MarketEvent::HandshakeCompleted { client_id });

        self.start_heartbeat(conn);
        self.replay_subscriptions()?;
        Ok(true)
    }

    fn start_heartbeat(&self, conn: &Arc<Connection>) {
        let scheduler = HeartbeatScheduler::new(
            self.config.heartbeat,
            Arc::new(BayeuxKeepAlive::new(self.session.clone(), conn.clone())),
            conn.clone(),
            conn.cancel_token(),
        );

        let events = self.event_tx.lock().as_ref().map(mpsc::UnboundedSender::downgrade);

        tokio::spawn(async move {
            if let Err(e) = scheduler.run().await {
                report_heartbeat_failure(&e, events.as_ref());
            }
        });
    }

    /// Send one `add` per event type for every desired subscription.
    fn replay_subscriptions(&self) -> Result<(), DxFeedClientError> {
        let Some(changes) = self.registry.replay_changes() else {
            return Ok(());
        };

        tracing::info!(pairs = changes.pair_count(), "Sending subscriptions");
        for (event_type, symbols) in changes.add {
            let mut per_type = SubscriptionChanges::default();
            per_type.add.insert(event_type, symbols);
            self.send_changes(per_type, SubscriptionOp::Add)?;
        }
        Ok(())
    }

    fn on_subscription_reply(&self, reply: &Envelope) {
        if reply.is_successful() {
            tracing::debug!(id = ?reply.id, "Subscription acknowledged");
            self.emit(MarketEvent::Subscribed {
                id: reply.id.clone(),
            });
        } else {
            tracing::warn!(id = ?reply.id, error = ?reply.error, "Subscription rejected");
            metrics::record_subscription_rejected();
            self.emit(MarketEvent::SubscriptionRejected {
                id: reply.id.clone(),
                error: reply.error.clone(),
            });
        }
    }

    fn on_data(&self, envelope: &Envelope) {
        let Some(data) = &envelope.data else {
            tracing::warn!(channel = %envelope.channel, "Data message has no data field");
            return;
        };

        match self.decoder.decode_payload(data) {
            Ok(FeedData::Quotes(quotes)) => {
                for quote in quotes {
                    self.emit(MarketEvent::Quote(quote));
                }
            }
            Ok(FeedData::Other {
                event_type,
                payload,
            }) => self.emit(MarketEvent::Data {
                event_type,
                payload,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed data payload");
                metrics::record_malformed_frame(Feed::DxFeed);
            }
        }
    }

    /// Send subscription changes if a session is live.
    ///
    /// Returns `false` when there is no session to send on.
    fn send_changes(
        &self,
        changes: SubscriptionChanges,
        op: SubscriptionOp,
    ) -> Result<bool, DxFeedClientError> {
        let Some(conn) = self.connection.read().clone() else {
            return Ok(false);
        };

        let frame = {
            let session = self.session.read();
            if !session.state().is_connected() {
                return Ok(false);
            }
            session.subscription_frame(conn.next_message_id(), changes)?
        };

        conn.send(frame)?;
        metrics::record_subscription_message(op);
        Ok(true)
    }

    fn emit(&self, event: MarketEvent) {
        if let Some(tx) = self.event_tx.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn finish(&self, error: Option<&DxFeedClientError>) {
        if let Some(e) = error {
            tracing::warn!(error = %e, "dxFeed client stopped");
        } else {
            tracing::info!("dxFeed client stopped");
        }

        self.handshake.send_if_modified(|status| {
            if matches!(status, HandshakeStatus::Rejected(_)) {
                false
            } else {
                *status = HandshakeStatus::Ended;
                true
            }
        });

        self.registry.clear();
        metrics::set_active_subscriptions(0);
        self.emit(MarketEvent::Disconnected {
            error: error.map(ToString::to_string),
        });

        // Ends the consumer stream
        self.event_tx.lock().take();
    }
}

/// Log a stopped heartbeat and surface it on the event stream.
///
/// Nothing is emitted once the stream has ended.
fn report_heartbeat_failure(
    error: &HeartbeatError,
    events: Option<&mpsc::WeakUnboundedSender<MarketEvent>>,
) {
    tracing::warn!(error = %error, "dxFeed heartbeat stopped");
    if let Some(tx) = events.and_then(mpsc::WeakUnboundedSender::upgrade) {
        let _ = tx.send(MarketEvent::HeartbeatFailed {
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::PortError;

    fn config() -> DxFeedConfig {
        DxFeedConfig::production(Credential::new("tok").unwrap())
    }

    #[test]
    fn config_defaults() {
        let config = config();
        assert_eq!(config.url, DEFAULT_DXFEED_URL);
        assert_eq!(config.heartbeat.interval, Duration::from_secs(10));
        assert!(config.reconnect.is_none());
        assert!(config.is_data_channel("/service/data"));
        assert!(config.is_data_channel("/data"));
        assert!(!config.is_data_channel("/service/sub"));
    }

    #[test]
    fn config_overrides() {
        let reconnect =
            ReconnectConfig::new(Duration::from_millis(10), Duration::from_secs(1), 2.0).unwrap();
        let config = config()
            .with_data_channels(vec!["/service/data".to_string()])
            .with_heartbeat_interval(Duration::from_secs(5))
            .with_reconnect(reconnect);

        assert!(!config.is_data_channel("/data"));
        assert_eq!(config.heartbeat.interval, Duration::from_secs(5));
        assert!(config.reconnect.is_some());
    }

    #[test]
    fn retryable_errors() {
        assert!(DxFeedClientError::ConnectionLost(ConnectionState::Failed).is_retryable());
        assert!(DxFeedClientError::Transport(TransportError::Closed).is_retryable());
        assert!(
            !DxFeedClientError::Session(SessionError::HandshakeRejected { error: None })
                .is_retryable()
        );
        assert!(!DxFeedClientError::Closed.is_retryable());
    }

    #[test]
    fn subscribe_before_connect_records_only() {
        let (client, _events) = DxFeedClient::new(config(), CancellationToken::new());

        client.subscribe("Quote", "AAPL").unwrap();
        client.subscribe("Quote", "AAPL").unwrap();

        assert_eq!(client.registry().len(), 1);
        assert!(!client.is_connected());
        assert!(client.client_id().is_none());
    }

    #[test]
    fn unsubscribe_before_connect() {
        let (client, _events) = DxFeedClient::new(config(), CancellationToken::new());

        client.subscribe("Quote", "AAPL").unwrap();
        client.unsubscribe("Quote", "AAPL").unwrap();
        client.unsubscribe("Quote", "MSFT").unwrap();

        assert!(client.registry().is_empty());
    }

    #[tokio::test]
    async fn wait_for_handshake_times_out() {
        let (client, _events) = DxFeedClient::new(config(), CancellationToken::new());

        let err = client
            .wait_for_handshake(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, DxFeedClientError::HandshakeTimeout(_)));
    }

    #[test]
    fn heartbeat_failure_reaches_stream() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let weak = tx.downgrade();

        report_heartbeat_failure(&HeartbeatError::SendFailed(PortError::Closed), Some(&weak));

        assert_eq!(
            rx.try_recv().unwrap(),
            MarketEvent::HeartbeatFailed {
                error: HeartbeatError::SendFailed(PortError::Closed).to_string()
            }
        );
    }

    #[test]
    fn heartbeat_failure_after_stream_end_is_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel::<MarketEvent>();
        let weak = tx.downgrade();
        drop(tx);

        report_heartbeat_failure(&HeartbeatError::SendFailed(PortError::Closed), Some(&weak));
        report_heartbeat_failure(&HeartbeatError::SendFailed(PortError::Closed), None);

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn replace_before_connect_records_only() {
        let (client, _events) = DxFeedClient::new(config(), CancellationToken::new());
        client.subscribe("Trade", "SPY").unwrap();

        client
            .replace_subscriptions("Quote", &["TSLA".to_string(), "AAPL".to_string()])
            .unwrap();

        assert_eq!(client.registry().event_types(), vec!["Quote"]);
        assert_eq!(client.registry().symbols("Quote"), vec!["AAPL", "TSLA"]);
    }

    #[tokio::test]
    async fn wait_for_handshake_after_run_is_closed() {
        let cancel = CancellationToken::new();
        let (client, _events) = DxFeedClient::new(config(), cancel.clone());
        let client = Arc::new(client);
        cancel.cancel();
        client.clone().run().await.unwrap();

        let err = client
            .wait_for_handshake(Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, DxFeedClientError::Closed));
    }

    #[tokio::test]
    async fn cancelled_client_ends_stream() {
        use futures_util::StreamExt;

        let cancel = CancellationToken::new();
        let (client, events) = DxFeedClient::new(config(), cancel.clone());
        client.subscribe("Quote", "AAPL").unwrap();
        cancel.cancel();

        Arc::new(client).run().await.unwrap();

        let events: Vec<MarketEvent> = events.collect().await;
        assert_eq!(events, vec![MarketEvent::Disconnected { error: None }]);
    }
}
