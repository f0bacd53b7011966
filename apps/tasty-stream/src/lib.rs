#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Tasty Stream - tastytrade Streaming Client
//!
//! Maintains the two tastytrade streaming connections and turns their wire
//! formats into typed events for downstream consumers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core streaming types with no I/O
//!   - `streaming`: Quote records and market events
//!   - `subscription`: Desired (event type, symbol) pairs
//!   - `symbology`: Option and futures symbol formatting
//!
//! - **Application**: Port definitions
//!   - `ports`: Outbound frame sink and keep-alive frame factory
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `tastytrade`: dxFeed (Bayeux/CometD) and account streamer clients
//!   - `config`: Environment configuration
//!   - `metrics`: Prometheus metrics
//!   - `telemetry`: Tracing subscriber and OpenTelemetry
//!
//! # Data Flow
//!
//! ```text
//! dxFeed WS ──► Connection ──► DxFeedClient ──► QuoteDecoder ──► MarketEvent stream
//!                  ▲               │
//!                  └── heartbeat ◄─┘ (/meta/connect)
//!
//! Account WS ─► Connection ──► AccountStreamer ──► AccountEvent stream
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{MarketEvent, QuoteRecord};
pub use domain::subscription::{SubscriptionChanges, SubscriptionRegistry, SubscriptionStats};
pub use domain::symbology::{
    OptionKind, SymbologyError, future_option_symbol, future_symbol, option_symbol,
};

// Ports
pub use application::ports::{FrameSink, KeepAlive, PortError};

// Streamers
pub use infrastructure::tastytrade::{
    AccountEvent, AccountStreamError, AccountStreamer, AccountStreamerConfig, Credential,
    DxFeedClient, DxFeedClientError, DxFeedConfig, ReconnectConfig,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, StreamConfig};

// Metrics
pub use infrastructure::metrics::{Feed as MetricsFeed, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
