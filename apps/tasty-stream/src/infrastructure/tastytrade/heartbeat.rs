//! Heartbeat Scheduler
//!
//! Sends the protocol keep-alive on a fixed interval, concurrently with the
//! read loop.
//!
//! - **Bayeux**: `/meta/connect` with the session's `clientId`, every 10s
//! - **Account streamer**: `heartbeat` action, every 30s by default
//!
//! The scheduler never retries. A failed send is reported and ends the task.
//! Cancellation ends it too, and a tick that lands at the same time as
//! cancellation does not send.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::connection::Connection;
use super::credentials::Credential;
use super::messages::{Action, ActionMessage};
use super::session::{BayeuxSession, SessionError};
use crate::application::ports::{FrameSink, KeepAlive, PortError};
use crate::infrastructure::metrics::{self, Feed};

/// Default Bayeux keep-alive interval.
pub const BAYEUX_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default account streamer keep-alive interval.
pub const ACCOUNT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Interval between keep-alives. The first one goes out one interval
    /// after start.
    pub interval: Duration,
    /// Feed label for metrics.
    pub feed: Feed,
}

impl HeartbeatConfig {
    /// Create a configuration.
    #[must_use]
    pub const fn new(interval: Duration, feed: Feed) -> Self {
        Self { interval, feed }
    }

    /// Bayeux defaults.
    #[must_use]
    pub const fn bayeux() -> Self {
        Self::new(BAYEUX_HEARTBEAT_INTERVAL, Feed::DxFeed)
    }

    /// Account streamer defaults.
    #[must_use]
    pub const fn account() -> Self {
        Self::new(ACCOUNT_HEARTBEAT_INTERVAL, Feed::Account)
    }
}

/// Events emitted by the heartbeat scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// A keep-alive was queued.
    Sent {
        /// Keep-alives sent so far.
        count: u64,
    },
    /// A keep-alive could not be built or sent. The scheduler has stopped.
    SendFailed {
        /// What went wrong.
        error: PortError,
    },
}

/// Error type for heartbeat operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeartbeatError {
    /// The keep-alive could not be built or sent.
    #[error("heartbeat send failed: {0}")]
    SendFailed(#[from] PortError),
}

// =============================================================================
// Keep-Alive Frames
// =============================================================================

/// `/meta/connect` keep-alive for a Bayeux session.
pub struct BayeuxKeepAlive {
    session: Arc<RwLock<BayeuxSession>>,
    connection: Arc<Connection>,
}

impl BayeuxKeepAlive {
    /// Create a keep-alive bound to a session and its connection.
    #[must_use]
    pub const fn new(session: Arc<RwLock<BayeuxSession>>, connection: Arc<Connection>) -> Self {
        Self {
            session,
            connection,
        }
    }
}

impl KeepAlive for BayeuxKeepAlive {
    fn keep_alive_frame(&self) -> Result<String, PortError> {
        let id = self.connection.next_message_id();
        self.session.read().connect_frame(id).map_err(|e| match e {
            SessionError::NoClientSession => PortError::NoClientSession,
            other => PortError::Encode(other.to_string()),
        })
    }
}

/// `heartbeat` action keep-alive for the account streamer.
pub struct ActionKeepAlive {
    session_token: Credential,
}

impl ActionKeepAlive {
    /// Create a keep-alive for a session token.
    #[must_use]
    pub const fn new(session_token: Credential) -> Self {
        Self { session_token }
    }
}

impl KeepAlive for ActionKeepAlive {
    fn keep_alive_frame(&self) -> Result<String, PortError> {
        ActionMessage::new(
            self.session_token.expose(),
            Action::Heartbeat,
            Value::String(String::new()),
        )
        .to_json()
        .map_err(|e| PortError::Encode(e.to_string()))
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Periodic keep-alive sender.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use tasty_stream::infrastructure::tastytrade::connection::Connection;
/// use tasty_stream::infrastructure::tastytrade::credentials::Credential;
/// use tasty_stream::infrastructure::tastytrade::heartbeat::{
///     ActionKeepAlive, HeartbeatConfig, HeartbeatScheduler,
/// };
///
/// async fn example() -> anyhow::Result<()> {
///     let token = Credential::new("session-token")?;
///     let connection = Arc::new(Connection::open("wss://streamer.tastyworks.com", None).await?);
///
///     let scheduler = HeartbeatScheduler::new(
///         HeartbeatConfig::account(),
///         Arc::new(ActionKeepAlive::new(token)),
///         connection.clone(),
///         connection.cancel_token(),
///     );
///
///     // Runs until the connection closes or a send fails
///     tokio::spawn(scheduler.run());
///     Ok(())
/// }
/// ```
pub struct HeartbeatScheduler {
    config: HeartbeatConfig,
    keep_alive: Arc<dyn KeepAlive>,
    sink: Arc<dyn FrameSink>,
    cancel: CancellationToken,
    event_tx: Option<mpsc::UnboundedSender<HeartbeatEvent>>,
}

impl HeartbeatScheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(
        config: HeartbeatConfig,
        keep_alive: Arc<dyn KeepAlive>,
        sink: Arc<dyn FrameSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            keep_alive,
            sink,
            cancel,
            event_tx: None,
        }
    }

    /// Report events on a channel.
    #[must_use]
    pub fn with_events(mut self, event_tx: mpsc::UnboundedSender<HeartbeatEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Run until cancelled or a send fails.
    ///
    /// Returns the number of keep-alives sent.
    ///
    /// # Errors
    ///
    /// Returns [`HeartbeatError::SendFailed`] when a keep-alive cannot be
    /// built or sent.
    pub async fn run(self) -> Result<u64, HeartbeatError> {
        let period = self.config.interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sent = 0u64;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::debug!(sent, "Heartbeat scheduler cancelled");
                    return Ok(sent);
                }
                _ = interval.tick() => {
                    if self.cancel.is_cancelled() {
                        return Ok(sent);
                    }

                    if let Err(error) = self.beat().await {
                        tracing::warn!(error = %error, "Heartbeat send failed, stopping");
                        self.emit(HeartbeatEvent::SendFailed { error: error.clone() });
                        return Err(error.into());
                    }

                    sent += 1;
                    metrics::record_heartbeat_sent(self.config.feed);
                    tracing::trace!(sent, "Heartbeat sent");
                    self.emit(HeartbeatEvent::Sent { count: sent });
                }
            }
        }
    }

    async fn beat(&self) -> Result<(), PortError> {
        let frame = self.keep_alive.keep_alive_frame()?;
        self.sink.send_frame(frame).await
    }

    fn emit(&self, event: HeartbeatEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}
