//! Stream Configuration Settings
//!
//! Configuration types for both streamers, loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::infrastructure::tastytrade::account::{
    AccountStreamerConfig, DEFAULT_ACCOUNT_STREAMER_URL, DEFAULT_READY_TIMEOUT,
};
use crate::infrastructure::tastytrade::credentials::{Credential, CredentialError};
use crate::infrastructure::tastytrade::dxfeed::{DEFAULT_DXFEED_URL, DxFeedConfig};
use crate::infrastructure::tastytrade::heartbeat::{
    ACCOUNT_HEARTBEAT_INTERVAL, BAYEUX_HEARTBEAT_INTERVAL,
};
use crate::infrastructure::tastytrade::messages::{DATA_CHANNEL, DATA_CHANNEL_ALIAS};
use crate::infrastructure::tastytrade::reconnect::{ReconnectConfig, ReconnectError};

/// Session token for the account streamer.
pub const SESSION_TOKEN_VAR: &str = "TASTYTRADE_SESSION_TOKEN";

/// Streaming token for dxFeed.
pub const DXFEED_TOKEN_VAR: &str = "DXFEED_TOKEN";

/// A desired market data subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Event type, e.g. `Quote`.
    pub event_type: String,
    /// Instrument symbol.
    pub symbol: String,
}

impl FromStr for SubscriptionSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once(':') {
            Some((event_type, symbol)) if !event_type.is_empty() && !symbol.is_empty() => {
                Ok(Self {
                    event_type: event_type.trim().to_string(),
                    symbol: symbol.trim().to_string(),
                })
            }
            _ => Err(format!("expected EventType:SYMBOL, got {s:?}")),
        }
    }
}

/// dxFeed market data settings.
#[derive(Debug, Clone)]
pub struct DxFeedSettings {
    /// WebSocket URL.
    pub url: String,
    /// Streaming token.
    pub token: Option<Credential>,
    /// Keep-alive interval.
    pub heartbeat_interval: Duration,
    /// Channels decoded as market data.
    pub data_channels: Vec<String>,
    /// Subscriptions issued at startup.
    pub subscriptions: Vec<SubscriptionSpec>,
    /// Reconnect backoff, if enabled.
    pub reconnect: Option<ReconnectConfig>,
}

impl Default for DxFeedSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_DXFEED_URL.to_string(),
            token: None,
            heartbeat_interval: BAYEUX_HEARTBEAT_INTERVAL,
            data_channels: vec![DATA_CHANNEL.to_string(), DATA_CHANNEL_ALIAS.to_string()],
            subscriptions: Vec::new(),
            reconnect: None,
        }
    }
}

/// Account streamer settings.
#[derive(Debug, Clone)]
pub struct AccountSettings {
    /// WebSocket URL.
    pub url: String,
    /// Session token.
    pub session_token: Option<Credential>,
    /// Keep-alive interval.
    pub heartbeat_interval: Duration,
    /// Time allowed for the socket to open.
    pub ready_timeout: Duration,
    /// Accounts to connect.
    pub account_numbers: Vec<String>,
    /// External user id for user-level messages.
    pub user_external_id: Option<String>,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_ACCOUNT_STREAMER_URL.to_string(),
            session_token: None,
            heartbeat_interval: ACCOUNT_HEARTBEAT_INTERVAL,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            account_numbers: Vec::new(),
            user_external_id: None,
        }
    }
}

/// Complete streaming configuration.
#[derive(Debug, Clone, Default)]
pub struct StreamConfig {
    /// dxFeed settings.
    pub dxfeed: DxFeedSettings,
    /// Account streamer settings.
    pub account: AccountSettings,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from a variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an invalid value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let dxfeed_defaults = DxFeedSettings::default();
        let account_defaults = AccountSettings::default();

        let data_channels = lookup("DXFEED_DATA_CHANNELS")
            .map(|v| split_list(&v))
            .filter(|channels| !channels.is_empty())
            .unwrap_or(dxfeed_defaults.data_channels);

        let subscriptions = lookup("DXFEED_SUBSCRIPTIONS")
            .map(|v| {
                split_list(&v)
                    .iter()
                    .map(|item| {
                        item.parse::<SubscriptionSpec>()
                            .map_err(|reason| invalid("DXFEED_SUBSCRIPTIONS", &v, &reason))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        let dxfeed = DxFeedSettings {
            url: lookup("DXFEED_URL").unwrap_or(dxfeed_defaults.url),
            token: credential(&lookup, DXFEED_TOKEN_VAR)?,
            heartbeat_interval: parse_or(
                &lookup,
                "DXFEED_HEARTBEAT_INTERVAL_SECS",
                dxfeed_defaults.heartbeat_interval.as_secs(),
            )
            .map(Duration::from_secs)?,
            data_channels,
            subscriptions,
            reconnect: reconnect(&lookup)?,
        };

        let account = AccountSettings {
            url: lookup("ACCOUNT_STREAMER_URL").unwrap_or(account_defaults.url),
            session_token: credential(&lookup, SESSION_TOKEN_VAR)?,
            heartbeat_interval: parse_or(
                &lookup,
                "ACCOUNT_HEARTBEAT_INTERVAL_SECS",
                account_defaults.heartbeat_interval.as_secs(),
            )
            .map(Duration::from_secs)?,
            ready_timeout: parse_or(
                &lookup,
                "ACCOUNT_READY_TIMEOUT_SECS",
                account_defaults.ready_timeout.as_secs(),
            )
            .map(Duration::from_secs)?,
            account_numbers: lookup("ACCOUNT_NUMBERS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            user_external_id: lookup("TASTYTRADE_USER_EXTERNAL_ID").filter(|v| !v.is_empty()),
        };

        Ok(Self {
            dxfeed,
            account,
            metrics_port: parse_or(&lookup, "TASTY_STREAM_METRICS_PORT", 0)?,
        })
    }

    /// Build the dxFeed client configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] without a streaming token.
    pub fn dxfeed_config(&self) -> Result<DxFeedConfig, ConfigError> {
        let token = self
            .dxfeed
            .token
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvVar(DXFEED_TOKEN_VAR.to_string()))?;

        let mut config = DxFeedConfig::new(self.dxfeed.url.clone(), token)
            .with_heartbeat_interval(self.dxfeed.heartbeat_interval)
            .with_data_channels(self.dxfeed.data_channels.clone());
        if let Some(reconnect) = &self.dxfeed.reconnect {
            config = config.with_reconnect(reconnect.clone());
        }
        Ok(config)
    }

    /// Build the account streamer configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] without a session token.
    pub fn account_config(&self) -> Result<AccountStreamerConfig, ConfigError> {
        let token = self
            .account
            .session_token
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvVar(SESSION_TOKEN_VAR.to_string()))?;
        Ok(AccountStreamerConfig::new(self.account.url.clone(), token))
    }

    /// Check if the account streamer has what it needs to run.
    #[must_use]
    pub fn account_enabled(&self) -> bool {
        self.account.session_token.is_some() && !self.account.account_numbers.is_empty()
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),

    /// Environment variable could not be parsed.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Token rejected.
    #[error("invalid credential in {key}: {source}")]
    Credential {
        /// Variable name.
        key: String,
        /// Underlying error.
        source: CredentialError,
    },

    /// Reconnect parameters out of range.
    #[error("invalid reconnect configuration: {0}")]
    Reconnect(#[from] ReconnectError),
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

fn credential<F>(lookup: &F, key: &str) -> Result<Option<Credential>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Credential::new(raw)
        .map(Some)
        .map_err(|source| ConfigError::Credential {
            key: key.to_string(),
            source,
        })
}

fn parse<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| invalid(key, &raw, &e.to_string()))
        })
        .transpose()
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse(lookup, key).map(|value| value.unwrap_or(default))
}

/// Reconnect is enabled only when initial, max and multiplier are all set.
fn reconnect<F>(lookup: &F) -> Result<Option<ReconnectConfig>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let initial = parse::<_, u64>(lookup, "DXFEED_RECONNECT_INITIAL_MS")?;
    let max = parse::<_, u64>(lookup, "DXFEED_RECONNECT_MAX_MS")?;
    let multiplier = parse::<_, f64>(lookup, "DXFEED_RECONNECT_MULTIPLIER")?;

    let (Some(initial), Some(max), Some(multiplier)) = (initial, max, multiplier) else {
        return Ok(None);
    };

    let config = ReconnectConfig::new(
        Duration::from_millis(initial),
        Duration::from_millis(max),
        multiplier,
    )?
    .with_jitter(parse_or(lookup, "DXFEED_RECONNECT_JITTER", 0.0)?)?
    .with_max_attempts(parse_or(lookup, "DXFEED_RECONNECT_MAX_ATTEMPTS", 0)?);

    Ok(Some(config))
}
