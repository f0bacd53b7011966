//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the WebSocket adapters that implement the port
//! interfaces defined in the application layer, plus process-level concerns.

/// tastytrade streaming adapters (dxFeed market data, account streamer).
pub mod tastytrade;

/// Environment configuration.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;
