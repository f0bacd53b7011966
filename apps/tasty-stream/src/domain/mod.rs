//! Domain Layer - Core streaming types and business logic.
//!
//! This layer contains the core domain types for market data streaming
//! with no I/O. All types here are pure Rust with serialization support.

/// Market data streaming types (decoded quotes).
pub mod streaming;

/// Subscription tracking.
pub mod subscription;

/// Option and futures symbol formatting.
pub mod symbology;
