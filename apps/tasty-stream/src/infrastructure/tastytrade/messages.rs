//! tastytrade Streaming Message Types
//!
//! Wire format types for both streaming protocols.
//!
//! # Bayeux / CometD (dxFeed market data)
//!
//! Every frame is a JSON array of envelope objects. Outbound frames carry
//! exactly one envelope. Routing is by `channel`:
//!
//! - `/meta/handshake`: capability negotiation, returns `clientId`
//! - `/meta/connect`: keep-alive
//! - `/service/sub`: subscription add/remove
//! - `/service/data` (and `/data`): event payloads
//!
//! # Action messages (account streamer)
//!
//! Flat objects of the form `{"auth-token": ..., "action": ..., "value": ...}`.
//! No handshake phase.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::domain::subscription::SubscriptionChanges;

// =============================================================================
// Channels and Protocol Constants
// =============================================================================

/// Handshake channel.
pub const HANDSHAKE_CHANNEL: &str = "/meta/handshake";

/// Connect (keep-alive) channel.
pub const CONNECT_CHANNEL: &str = "/meta/connect";

/// Subscription channel.
pub const SUBSCRIPTION_CHANNEL: &str = "/service/sub";

/// Primary data channel.
pub const DATA_CHANNEL: &str = "/service/data";

/// Alternate data channel some feeds publish on.
pub const DATA_CHANNEL_ALIAS: &str = "/data";

/// Bayeux protocol version sent in the handshake.
pub const BAYEUX_VERSION: &str = "1.0";

/// Connection types offered in the handshake.
pub const SUPPORTED_CONNECTION_TYPES: [&str; 3] = ["websocket", "long-polling", "callback-polling"];

/// Connection type used on `/meta/connect`.
pub const WEBSOCKET_CONNECTION_TYPE: &str = "websocket";

/// Handshake extension key carrying the streaming token.
pub const AUTH_TOKEN_EXT_KEY: &str = "com.devexperts.auth.AuthToken";

/// Server-side connect timeout requested in the handshake advice, in ms.
pub const HANDSHAKE_ADVICE_TIMEOUT_MS: u64 = 60_000;

// =============================================================================
// Bayeux Envelope
// =============================================================================

/// Bayeux `advice` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advice {
    /// Server-side long-poll timeout in ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Delay between connects in ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    /// Server reconnect advice (`retry`, `handshake`, `none`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<String>,
}

/// A single Bayeux message.
///
/// Only `channel` is required; every other field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Routing channel.
    pub channel: String,

    /// Correlation id.
    #[serde(
        default,
        deserialize_with = "deserialize_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,

    /// Session id assigned by the server at handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Reply outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,

    /// Server error text on failed replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Extension fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,

    /// Connection advice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,

    /// Protocol version (handshake only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Minimum protocol version (handshake only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_version: Option<String>,

    /// Offered connection types (handshake only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_connection_types: Option<Vec<String>>,

    /// Chosen connection type (connect only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
}

impl Envelope {
    /// Build a handshake request.
    #[must_use]
    pub fn handshake(id: String, streaming_token: &str) -> Self {
        let mut ext = serde_json::Map::new();
        ext.insert(
            AUTH_TOKEN_EXT_KEY.to_string(),
            Value::String(streaming_token.to_string()),
        );

        Self {
            channel: HANDSHAKE_CHANNEL.to_string(),
            id: Some(id),
            version: Some(BAYEUX_VERSION.to_string()),
            minimum_version: Some(BAYEUX_VERSION.to_string()),
            supported_connection_types: Some(
                SUPPORTED_CONNECTION_TYPES
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            ),
            ext: Some(Value::Object(ext)),
            advice: Some(Advice {
                timeout: Some(HANDSHAKE_ADVICE_TIMEOUT_MS),
                interval: Some(0),
                reconnect: None,
            }),
            ..Default::default()
        }
    }

    /// Build a connect (keep-alive) request.
    #[must_use]
    pub fn connect(id: String, client_id: &str) -> Self {
        Self {
            channel: CONNECT_CHANNEL.to_string(),
            id: Some(id),
            client_id: Some(client_id.to_string()),
            connection_type: Some(WEBSOCKET_CONNECTION_TYPE.to_string()),
            ..Default::default()
        }
    }

    /// Build a subscription request.
    #[must_use]
    pub fn subscription(id: String, client_id: &str, data: &SubscriptionData) -> Self {
        Self {
            channel: SUBSCRIPTION_CHANNEL.to_string(),
            id: Some(id),
            client_id: Some(client_id.to_string()),
            data: serde_json::to_value(data).ok(),
            ..Default::default()
        }
    }

    /// Whether the server marked this reply successful.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.successful.unwrap_or(false)
    }
}

/// Accept string or numeric ids; servers echo whatever was sent.
fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// =============================================================================
// Subscription Payload
// =============================================================================

/// `data` block of a `/service/sub` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionData {
    /// Replace all existing subscriptions when true.
    pub reset: bool,
    /// Symbols to add, per event type.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add: BTreeMap<String, Vec<String>>,
    /// Symbols to remove, per event type.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub remove: BTreeMap<String, Vec<String>>,
}

impl From<SubscriptionChanges> for SubscriptionData {
    fn from(changes: SubscriptionChanges) -> Self {
        Self {
            reset: changes.reset,
            add: changes.add,
            remove: changes.remove,
        }
    }
}

// =============================================================================
// Action Messages
// =============================================================================

/// Account streamer actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Keep-alive.
    Heartbeat,
    /// Subscribe to account updates.
    Connect,
    /// Legacy account subscribe.
    AccountSubscribe,
    /// Public watchlist updates.
    PublicWatchlistsSubscribe,
    /// Quote alert triggers.
    QuoteAlertsSubscribe,
    /// User-level messages.
    UserMessageSubscribe,
}

impl Action {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::Connect => "connect",
            Self::AccountSubscribe => "account-subscribe",
            Self::PublicWatchlistsSubscribe => "public-watchlists-subscribe",
            Self::QuoteAlertsSubscribe => "quote-alerts-subscribe",
            Self::UserMessageSubscribe => "user-message-subscribe",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound account streamer message.
#[derive(Clone, PartialEq, Serialize)]
pub struct ActionMessage {
    /// Session token.
    #[serde(rename = "auth-token")]
    pub auth_token: String,
    /// Action name.
    pub action: Action,
    /// Action payload.
    pub value: Value,
}

impl ActionMessage {
    /// Create an action message.
    #[must_use]
    pub fn new(auth_token: impl Into<String>, action: Action, value: Value) -> Self {
        Self {
            auth_token: auth_token.into(),
            action,
            value,
        }
    }

    /// Serialize to JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl std::fmt::Debug for ActionMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionMessage")
            .field("auth_token", &"[REDACTED]")
            .field("action", &self.action)
            .field("value", &self.value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handshake_wire_shape() {
        let envelope = Envelope::handshake("1".to_string(), "tok");
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(
            value,
            json!({
                "channel": "/meta/handshake",
                "id": "1",
                "version": "1.0",
                "minimumVersion": "1.0",
                "supportedConnectionTypes": ["websocket", "long-polling", "callback-polling"],
                "ext": {"com.devexperts.auth.AuthToken": "tok"},
                "advice": {"timeout": 60000, "interval": 0}
            })
        );
    }

    #[test]
    fn connect_wire_shape() {
        let value = serde_json::to_value(Envelope::connect("7".to_string(), "c1")).unwrap();
        assert_eq!(
            value,
            json!({
                "channel": "/meta/connect",
                "id": "7",
                "clientId": "c1",
                "connectionType": "websocket"
            })
        );
    }

    #[test]
    fn subscription_wire_shape() {
        let data = SubscriptionData::from(SubscriptionChanges::add_one("Quote", "AAPL"));
        let value = serde_json::to_value(Envelope::subscription("2".to_string(), "c1", &data)).unwrap();

        assert_eq!(value["channel"], "/service/sub");
        assert_eq!(value["clientId"], "c1");
        assert_eq!(
            value["data"],
            json!({"reset": false, "add": {"Quote": ["AAPL"]}})
        );
    }

    #[test]
    fn unsubscription_omits_add() {
        let data = SubscriptionData::from(SubscriptionChanges::remove_one("Quote", "AAPL"));
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value, json!({"reset": false, "remove": {"Quote": ["AAPL"]}}));
    }

    #[test]
    fn replacement_sets_reset() {
        let changes = SubscriptionChanges::replace_with("Quote", &["SPY".to_string()]);
        let value = serde_json::to_value(SubscriptionData::from(changes)).unwrap();
        assert_eq!(value, json!({"reset": true, "add": {"Quote": ["SPY"]}}));
    }

    #[test]
    fn envelope_accepts_numeric_id() {
        let envelope: Envelope =
            serde_json::from_value(json!({"channel": "/meta/connect", "id": 12, "successful": true}))
                .unwrap();
        assert_eq!(envelope.id.as_deref(), Some("12"));
        assert!(envelope.is_successful());
    }

    #[test]
    fn envelope_tolerates_unknown_fields() {
        let envelope: Envelope = serde_json::from_value(json!({
            "channel": "/meta/handshake",
            "successful": true,
            "clientId": "abc",
            "advice": {"reconnect": "retry", "interval": 0, "timeout": 60000},
            "somethingNew": 1
        }))
        .unwrap();
        assert_eq!(envelope.client_id.as_deref(), Some("abc"));
        assert_eq!(envelope.advice.unwrap().reconnect.as_deref(), Some("retry"));
    }

    #[test]
    fn action_message_wire_shape() {
        let msg = ActionMessage::new("sess", Action::PublicWatchlistsSubscribe, json!(""));
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"auth-token": "sess", "action": "public-watchlists-subscribe", "value": ""})
        );
    }

    #[test]
    fn action_names_match_serde() {
        for action in [
            Action::Heartbeat,
            Action::Connect,
            Action::AccountSubscribe,
            Action::PublicWatchlistsSubscribe,
            Action::QuoteAlertsSubscribe,
            Action::UserMessageSubscribe,
        ] {
            assert_eq!(serde_json::to_value(action).unwrap(), json!(action.as_str()));
        }
    }

    #[test]
    fn action_message_debug_redacts_token() {
        let msg = ActionMessage::new("secret-session", Action::Heartbeat, json!(""));
        assert!(!format!("{msg:?}").contains("secret-session"));
    }
}
