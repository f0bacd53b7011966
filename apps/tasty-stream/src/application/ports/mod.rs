//! Port Interfaces
//!
//! Defines the seams between the protocol logic and the transport, following
//! the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `FrameSink`: Accepts serialized text frames for the wire
//! - `KeepAlive`: Builds the protocol's keep-alive frame on demand

use async_trait::async_trait;

/// Errors raised at the port boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    /// The connection is not in a state that accepts sends.
    #[error("connection not open (state: {0})")]
    NotConnected(String),

    /// The connection has shut down.
    #[error("connection closed")]
    Closed,

    /// No client session exists yet, so session-scoped frames cannot be built.
    #[error("no client session established")]
    NoClientSession,

    /// The frame could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

/// Outbound text frame sink.
///
/// Implemented by the connection; the heartbeat scheduler and subscription
/// emission send through it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Queue a text frame for sending.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot accept frames.
    async fn send_frame(&self, frame: String) -> Result<(), PortError>;
}

/// Keep-alive frame factory for a protocol variant.
#[cfg_attr(test, mockall::automock)]
pub trait KeepAlive: Send + Sync {
    /// Build the next keep-alive frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be built (for example before a
    /// session exists).
    fn keep_alive_frame(&self) -> Result<String, PortError>;
}
