//! Application Layer - Port definitions.
//!
//! This layer contains the port interfaces that define how the protocol
//! logic interacts with the transport.

/// Port interfaces for outbound frames and keep-alives.
pub mod ports;
