//! Prometheus Metrics Module
//!
//! Exposes streaming metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Inbound frames, malformed frames, decoded quotes and skips
//! - **Connections**: Per-feed connection state and reconnects
//! - **Subscriptions**: Subscription messages, rejections and active pairs
//! - **Heartbeats**: Keep-alive frames sent per feed
//!
//! # Integration
//!
//! The recording functions go through the `metrics` facade and are no-ops
//! until [`init_metrics`] installs the recorder. When a port is given, the
//! exporter serves `/metrics` on it.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::infrastructure::tastytrade::connection::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics setup errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Exporter could not be built.
    #[error("failed to build Prometheus exporter: {0}")]
    Build(#[from] BuildError),

    /// A global recorder is already installed.
    #[error("a metrics recorder is already installed")]
    AlreadyInstalled,
}

/// Initialize the Prometheus metrics recorder.
///
/// With `Some(port)`, the exporter HTTP listener is spawned on the current
/// tokio runtime and serves on `0.0.0.0:port`. Calling this again returns the
/// handle from the first call.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or another recorder is
/// already installed.
pub fn init_metrics(port: Option<u16>) -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let builder = PrometheusBuilder::new();
    let handle = match port {
        Some(port) => {
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
            let (recorder, exporter) = builder.with_http_listener(addr).build()?;
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder).map_err(|_| MetricsError::AlreadyInstalled)?;
            tokio::spawn(async move {
                if let Err(e) = exporter.await {
                    tracing::error!(error = ?e, "Metrics exporter stopped");
                }
            });
            tracing::info!(%addr, "Metrics exporter listening");
            handle
        }
        None => builder.install_recorder()?,
    };

    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "tasty_stream_frames_received_total",
        "Total text frames received per feed"
    );
    describe_counter!(
        "tasty_stream_malformed_frames_total",
        "Total inbound frames that failed to parse"
    );
    describe_counter!(
        "tasty_stream_quotes_decoded_total",
        "Total quote records decoded"
    );
    describe_counter!(
        "tasty_stream_decode_skips_total",
        "Total quote chunks dropped for wrong field types"
    );
    describe_counter!(
        "tasty_stream_heartbeats_sent_total",
        "Total keep-alive frames sent per feed"
    );
    describe_counter!(
        "tasty_stream_subscription_messages_total",
        "Total subscription messages sent by operation"
    );
    describe_counter!(
        "tasty_stream_subscription_rejections_total",
        "Total subscription requests rejected upstream"
    );
    describe_counter!(
        "tasty_stream_reconnects_total",
        "Total reconnection attempts per feed"
    );

    describe_gauge!(
        "tasty_stream_active_subscriptions",
        "Number of desired (event type, symbol) subscriptions"
    );
    describe_gauge!(
        "tasty_stream_connection_state",
        "Connection state per feed (0 idle, 1 handshaking, 2 connected, 3 closing, 4 closed, 5 failed)"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    /// dxFeed market data (Bayeux).
    DxFeed,
    /// Account streamer (action messages).
    Account,
}

impl Feed {
    const fn as_str(self) -> &'static str {
        match self {
            Self::DxFeed => "dxfeed",
            Self::Account => "account",
        }
    }
}

/// Metric labels for subscription operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionOp {
    /// `data.add`.
    Add,
    /// `data.remove`.
    Remove,
    /// `reset` with a new `data.add`.
    Replace,
}

impl SubscriptionOp {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Replace => "replace",
        }
    }
}

/// Record a text frame received.
pub fn record_frame_received(feed: Feed) {
    counter!("tasty_stream_frames_received_total", "feed" => feed.as_str()).increment(1);
}

/// Record a frame that failed to parse.
pub fn record_malformed_frame(feed: Feed) {
    counter!("tasty_stream_malformed_frames_total", "feed" => feed.as_str()).increment(1);
}

/// Record decoded quotes.
pub fn record_quotes_decoded(count: u64) {
    counter!("tasty_stream_quotes_decoded_total").increment(count);
}

/// Record a dropped quote chunk.
pub fn record_decode_skip() {
    counter!("tasty_stream_decode_skips_total").increment(1);
}

/// Record a keep-alive frame sent.
pub fn record_heartbeat_sent(feed: Feed) {
    counter!("tasty_stream_heartbeats_sent_total", "feed" => feed.as_str()).increment(1);
}

/// Record a subscription message sent.
pub fn record_subscription_message(op: SubscriptionOp) {
    counter!("tasty_stream_subscription_messages_total", "op" => op.as_str()).increment(1);
}

/// Record a subscription rejection.
pub fn record_subscription_rejected() {
    counter!("tasty_stream_subscription_rejections_total").increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(feed: Feed) {
    counter!("tasty_stream_reconnects_total", "feed" => feed.as_str()).increment(1);
}

/// Update the active subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_subscriptions(count: usize) {
    gauge!("tasty_stream_active_subscriptions").set(count as f64);
}

/// Update the connection state gauge for a feed.
pub fn set_connection_state(feed: Feed, state: ConnectionState) {
    gauge!("tasty_stream_connection_state", "feed" => feed.as_str())
        .set(f64::from(state.as_code()));
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_as_str() {
        assert_eq!(Feed::DxFeed.as_str(), "dxfeed");
        assert_eq!(Feed::Account.as_str(), "account");
    }

    #[test]
    fn subscription_op_as_str() {
        assert_eq!(SubscriptionOp::Add.as_str(), "add");
        assert_eq!(SubscriptionOp::Remove.as_str(), "remove");
        assert_eq!(SubscriptionOp::Replace.as_str(), "replace");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received(Feed::DxFeed);
        record_quotes_decoded(3);
        set_connection_state(Feed::Account, ConnectionState::Connected);
        set_active_subscriptions(2);
    }
}
