//! Account Streamer Client
//!
//! Connects to the tastytrade account streamer for account-level updates
//! (orders, balances, positions), public watchlists, quote alerts and user
//! messages.
//!
//! # Stream URL
//!
//! - Production: `wss://streamer.tastyworks.com`
//!
//! # Protocol
//!
//! No handshake. Every outbound message is a flat JSON object
//! `{"auth-token": ..., "action": ..., "value": ...}`. Inbound messages are
//! parsed as JSON and handed to the consumer uninterpreted.
//!
//! The stream always ends with [`AccountEvent::Disconnected`], which carries
//! the error when the connection was lost rather than closed locally.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use super::connection::{Connection, ConnectionState, TransportError};
use super::credentials::Credential;
use super::heartbeat::{
    ACCOUNT_HEARTBEAT_INTERVAL, ActionKeepAlive, HeartbeatConfig, HeartbeatError,
    HeartbeatScheduler,
};
use super::messages::{Action, ActionMessage};
use crate::infrastructure::metrics::{self, Feed};

/// Default account streamer endpoint.
pub const DEFAULT_ACCOUNT_STREAMER_URL: &str = "wss://streamer.tastyworks.com";

/// Default time to wait for the socket to open.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Consumer stream of account events.
pub type AccountEventStream = UnboundedReceiverStream<AccountEvent>;

/// Item on the account stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountEvent {
    /// An inbound message, uninterpreted.
    Message(Value),
    /// The connection ended. Always the last item.
    Disconnected {
        /// Error text, `None` after a local close.
        error: Option<String>,
    },
}

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the account streamer.
#[derive(Debug, thiserror::Error)]
pub enum AccountStreamError {
    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Message serialization failed.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// An action was issued before the socket opened.
    #[error("account streamer is not connected")]
    NotReady,

    /// The socket did not open in time.
    #[error("account streamer not ready within {0:?}")]
    ReadinessTimeout(Duration),

    /// The connection ended before becoming ready, or failed while open.
    #[error("account streamer disconnected (state: {0})")]
    Disconnected(ConnectionState),

    /// Heartbeat task failure.
    #[error("heartbeat error: {0}")]
    Heartbeat(#[from] HeartbeatError),

    /// Heartbeat task panicked or was aborted.
    #[error("heartbeat task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the account streamer.
#[derive(Debug, Clone)]
pub struct AccountStreamerConfig {
    /// WebSocket URL.
    pub url: String,
    /// Session token, sent as `auth-token` on every message.
    pub session_token: Credential,
}

impl AccountStreamerConfig {
    /// Create a new configuration.
    #[must_use]
    pub fn new(url: impl Into<String>, session_token: Credential) -> Self {
        Self {
            url: url.into(),
            session_token,
        }
    }

    /// Create configuration for the production endpoint.
    #[must_use]
    pub fn production(session_token: Credential) -> Self {
        Self::new(DEFAULT_ACCOUNT_STREAMER_URL, session_token)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Pending,
    Ready,
    Ended(ConnectionState),
}

// =============================================================================
// Heartbeat Handle
// =============================================================================

/// A running account heartbeat.
#[derive(Debug)]
pub struct HeartbeatHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<u64, HeartbeatError>>,
}

impl HeartbeatHandle {
    /// Stop sending heartbeats.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Check if the heartbeat task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task to end.
    ///
    /// Returns the number of heartbeats sent.
    ///
    /// # Errors
    ///
    /// Returns an error if a heartbeat send failed or the task panicked.
    pub async fn join(self) -> Result<u64, AccountStreamError> {
        Ok(self.task.await??)
    }
}

// =============================================================================
// Account Streamer
// =============================================================================

/// Account streamer client.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use futures_util::StreamExt;
/// use tasty_stream::infrastructure::tastytrade::account::{
///     AccountEvent, AccountStreamer, AccountStreamerConfig,
/// };
/// use tasty_stream::infrastructure::tastytrade::credentials::Credential;
///
/// async fn example() -> anyhow::Result<()> {
///     let config = AccountStreamerConfig::production(Credential::new("session-token")?);
///     let (streamer, mut events) = AccountStreamer::new(config);
///     let streamer = Arc::new(streamer);
///
///     streamer.connect();
///     streamer.wait_for_connection(Duration::from_secs(10)).await?;
///
///     let _heartbeat = streamer.start_heartbeat(Duration::from_secs(30))?;
///     streamer.connect_accounts(&["5WT00000".to_string()])?;
///     streamer.public_watchlists_subscribe()?;
///
///     while let Some(event) = events.next().await {
///         if let AccountEvent::Message(message) = event {
///             println!("{message}");
///         }
///     }
///     Ok(())
/// }
/// ```
pub struct AccountStreamer {
    config: AccountStreamerConfig,
    connection: RwLock<Option<Arc<Connection>>>,
    readiness: watch::Sender<Readiness>,
    event_tx: Mutex<Option<mpsc::UnboundedSender<AccountEvent>>>,
    cancel: CancellationToken,
}

impl AccountStreamer {
    /// Create a streamer and its event stream.
    ///
    /// The stream ends with [`AccountEvent::Disconnected`] when the
    /// connection closes.
    #[must_use]
    pub fn new(config: AccountStreamerConfig) -> (Self, AccountEventStream) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let streamer = Self {
            config,
            connection: RwLock::new(None),
            readiness: watch::Sender::new(Readiness::Pending),
            event_tx: Mutex::new(Some(event_tx)),
            cancel: CancellationToken::new(),
        };

        (streamer, UnboundedReceiverStream::new(event_rx))
    }

    /// Open the socket and start reading in the background.
    ///
    /// Use [`wait_for_connection`](Self::wait_for_connection) before sending
    /// actions.
    pub fn connect(self: &Arc<Self>) -> JoinHandle<Result<(), AccountStreamError>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await })
    }

    /// Check if the socket is open.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready_connection().is_ok()
    }

    /// Wait until the socket is open.
    ///
    /// # Errors
    ///
    /// Returns [`AccountStreamError::ReadinessTimeout`] if `timeout` elapses
    /// first and [`AccountStreamError::Disconnected`] if the connection
    /// attempt ended without opening.
    pub async fn wait_for_connection(&self, timeout: Duration) -> Result<(), AccountStreamError> {
        let mut rx = self.readiness.subscribe();
        let readiness = tokio::time::timeout(timeout, rx.wait_for(|r| *r != Readiness::Pending))
            .await
            .map_err(|_| AccountStreamError::ReadinessTimeout(timeout))?
            .map(|r| *r)
            .unwrap_or(Readiness::Ended(ConnectionState::Closed));

        match readiness {
            Readiness::Ready => Ok(()),
            Readiness::Pending => Err(AccountStreamError::NotReady),
            Readiness::Ended(state) => Err(AccountStreamError::Disconnected(state)),
        }
    }

    /// Subscribe to account-level updates.
    ///
    /// # Errors
    ///
    /// Returns [`AccountStreamError::NotReady`] before the socket opens.
    pub fn connect_accounts(&self, account_numbers: &[String]) -> Result<(), AccountStreamError> {
        self.send_action(Action::Connect, Value::from(account_numbers.to_vec()))?;
        tracing::info!(accounts = ?account_numbers, "Sent connect message");
        Ok(())
    }

    /// Subscribe to account-level updates with the legacy action.
    ///
    /// # Errors
    ///
    /// Returns [`AccountStreamError::NotReady`] before the socket opens.
    pub fn account_subscribe(&self, account_numbers: &[String]) -> Result<(), AccountStreamError> {
        self.send_action(Action::AccountSubscribe, Value::from(account_numbers.to_vec()))?;
        tracing::warn!(
            accounts = ?account_numbers,
            "Sent account-subscribe message; prefer connect_accounts"
        );
        Ok(())
    }

    /// Subscribe to public watchlist updates.
    ///
    /// # Errors
    ///
    /// Returns [`AccountStreamError::NotReady`] before the socket opens.
    pub fn public_watchlists_subscribe(&self) -> Result<(), AccountStreamError> {
        self.send_action(Action::PublicWatchlistsSubscribe, empty_value())?;
        tracing::info!("Sent public-watchlists-subscribe message");
        Ok(())
    }

    /// Subscribe to quote alert triggers.
    ///
    /// # Errors
    ///
    /// Returns [`AccountStreamError::NotReady`] before the socket opens.
    pub fn quote_alerts_subscribe(&self) -> Result<(), AccountStreamError> {
        self.send_action(Action::QuoteAlertsSubscribe, empty_value())?;
        tracing::info!("Sent quote-alerts-subscribe message");
        Ok(())
    }

    /// Subscribe to user-level messages.
    ///
    /// # Errors
    ///
    /// Returns [`AccountStreamError::NotReady`] before the socket opens.
    pub fn user_message_subscribe(&self, user_external_id: &str) -> Result<(), AccountStreamError> {
        self.send_action(
            Action::UserMessageSubscribe,
            Value::String(user_external_id.to_string()),
        )?;
        tracing::info!(user_external_id, "Sent user-message-subscribe message");
        Ok(())
    }

    /// Send one heartbeat.
    ///
    /// # Errors
    ///
    /// Returns [`AccountStreamError::NotReady`] before the socket opens.
    pub fn heartbeat(&self) -> Result<(), AccountStreamError> {
        self.send_action(Action::Heartbeat, empty_value())?;
        metrics::record_heartbeat_sent(Feed::Account);
        tracing::debug!("Sent heartbeat message");
        Ok(())
    }

    /// Send heartbeats every `interval` until stopped or the connection
    /// closes.
    ///
    /// # Errors
    ///
    /// Returns [`AccountStreamError::NotReady`] before the socket opens.
    pub fn start_heartbeat(&self, interval: Duration) -> Result<HeartbeatHandle, AccountStreamError> {
        let conn = self.ready_connection()?;
        let cancel = conn.cancel_token().child_token();

        let scheduler = HeartbeatScheduler::new(
            HeartbeatConfig::new(interval, Feed::Account),
            Arc::new(ActionKeepAlive::new(self.config.session_token.clone())),
            conn,
            cancel.clone(),
        );
        let task = tokio::spawn(scheduler.run());

        tracing::info!(interval_secs = interval.as_secs(), "Started heartbeat");
        Ok(HeartbeatHandle { cancel, task })
    }

    /// Start heartbeats at the default 30s interval.
    ///
    /// # Errors
    ///
    /// Returns [`AccountStreamError::NotReady`] before the socket opens.
    pub fn start_default_heartbeat(&self) -> Result<HeartbeatHandle, AccountStreamError> {
        self.start_heartbeat(ACCOUNT_HEARTBEAT_INTERVAL)
    }

    /// Close the connection. The event stream ends.
    pub fn close(&self) {
        self.cancel.cancel();
        if let Some(conn) = self.connection.read().as_ref() {
            conn.close();
        }
    }

    async fn run(&self) -> Result<(), AccountStreamError> {
        let result = self.open_and_read().await;

        let end_state = self
            .connection
            .write()
            .take()
            .map_or(ConnectionState::Closed, |conn| conn.state());
        self.readiness.send_replace(Readiness::Ended(end_state));

        if let Err(e) = &result {
            tracing::warn!(error = %e, "Account streamer stopped");
        }
        self.emit(AccountEvent::Disconnected {
            error: result.as_ref().err().map(ToString::to_string),
        });
        self.event_tx.lock().take();

        result
    }

    async fn open_and_read(&self) -> Result<(), AccountStreamError> {
        let conn = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Ok(()),
            conn = Connection::open(&self.config.url, None) => Arc::new(conn?),
        };
        *self.connection.write() = Some(conn.clone());
        self.readiness.send_replace(Readiness::Ready);
        metrics::set_connection_state(Feed::Account, conn.state());
        tracing::info!(url = %self.config.url, "Account streamer connected");

        loop {
            let frame = tokio::select! {
                () = self.cancel.cancelled() => {
                    conn.close();
                    break;
                }
                frame = conn.recv() => frame,
            };
            let Some(text) = frame else {
                break;
            };
            self.on_frame(&text);
        }

        let _ = tokio::time::timeout(CLOSE_GRACE, conn.closed()).await;
        let state = conn.state();
        metrics::set_connection_state(Feed::Account, state);
        tracing::info!(state = %state, "Account streamer connection closed");

        if self.cancel.is_cancelled() {
            Ok(())
        } else {
            Err(AccountStreamError::Disconnected(state))
        }
    }

    fn on_frame(&self, text: &str) {
        metrics::record_frame_received(Feed::Account);

        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed account frame");
                metrics::record_malformed_frame(Feed::Account);
                return;
            }
        };

        tracing::debug!(message = %value, "Account message");
        self.emit(AccountEvent::Message(value));
    }

    fn emit(&self, event: AccountEvent) {
        if let Some(tx) = self.event_tx.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn send_action(&self, action: Action, value: Value) -> Result<(), AccountStreamError> {
        let conn = self.ready_connection()?;
        let frame = ActionMessage::new(self.config.session_token.expose(), action, value).to_json()?;
        conn.send(frame)?;
        Ok(())
    }

    fn ready_connection(&self) -> Result<Arc<Connection>, AccountStreamError> {
        self.connection
            .read()
            .clone()
            .filter(|conn| conn.state().can_send())
            .ok_or(AccountStreamError::NotReady)
    }
}

fn empty_value() -> Value {
    Value::String(String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streamer() -> (AccountStreamer, AccountEventStream) {
        AccountStreamer::new(AccountStreamerConfig::production(
            Credential::new("session").unwrap(),
        ))
    }

    #[test]
    fn config_production_url() {
        let config = AccountStreamerConfig::production(Credential::new("session").unwrap());
        assert_eq!(config.url, "wss://streamer.tastyworks.com");
    }

    #[test]
    fn actions_before_connect_are_not_ready() {
        let (streamer, _frames) = streamer();

        assert!(!streamer.is_ready());
        assert!(matches!(
            streamer.connect_accounts(&["5WT0001".to_string()]),
            Err(AccountStreamError::NotReady)
        ));
        assert!(matches!(
            streamer.public_watchlists_subscribe(),
            Err(AccountStreamError::NotReady)
        ));
        assert!(matches!(
            streamer.quote_alerts_subscribe(),
            Err(AccountStreamError::NotReady)
        ));
        assert!(matches!(
            streamer.user_message_subscribe("U0001"),
            Err(AccountStreamError::NotReady)
        ));
        assert!(matches!(streamer.heartbeat(), Err(AccountStreamError::NotReady)));
        assert!(matches!(
            streamer.start_heartbeat(Duration::from_secs(1)),
            Err(AccountStreamError::NotReady)
        ));
    }

    #[tokio::test]
    async fn wait_for_connection_times_out() {
        let (streamer, _frames) = streamer();

        let err = streamer
            .wait_for_connection(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, AccountStreamError::ReadinessTimeout(_)));
    }

    #[tokio::test]
    async fn failed_open_ends_readiness() {
        let (streamer, _frames) =
            AccountStreamer::new(AccountStreamerConfig::new("not a url", Credential::new("s").unwrap()));
        let streamer = Arc::new(streamer);

        let result = streamer.connect().await.unwrap();
        assert!(matches!(result, Err(AccountStreamError::Transport(_))));

        let err = streamer
            .wait_for_connection(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AccountStreamError::Disconnected(_)));
    }

    #[tokio::test]
    async fn close_before_open_ends_stream() {
        use futures_util::StreamExt;

        let (streamer, events) = streamer();
        let streamer = Arc::new(streamer);
        streamer.close();

        streamer.connect().await.unwrap().unwrap();
        assert_eq!(
            events.collect::<Vec<_>>().await,
            vec![AccountEvent::Disconnected { error: None }]
        );
    }

    #[tokio::test]
    async fn failed_open_is_reported_on_stream() {
        use futures_util::StreamExt;

        let (streamer, events) =
            AccountStreamer::new(AccountStreamerConfig::new("not a url", Credential::new("s").unwrap()));
        let streamer = Arc::new(streamer);

        streamer.connect().await.unwrap().unwrap_err();

        let events: Vec<AccountEvent> = events.collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            AccountEvent::Disconnected { error: Some(e) } if e.starts_with("transport error")
        ));
    }
}
