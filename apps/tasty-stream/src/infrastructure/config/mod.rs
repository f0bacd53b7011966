//! Configuration Module
//!
//! Environment-driven configuration for the dxFeed and account streamers.

mod settings;

pub use settings::{
    AccountSettings, ConfigError, DXFEED_TOKEN_VAR, DxFeedSettings, SESSION_TOKEN_VAR,
    StreamConfig, SubscriptionSpec,
};
