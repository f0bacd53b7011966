//! Market Data Streaming Types
//!
//! Core domain types for market data delivered by the dxFeed stream.
//! These types are codec-agnostic and represent the canonical
//! internal representation of a decoded quote.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type label used by dxFeed for quote events.
pub const QUOTE_EVENT_TYPE: &str = "Quote";

/// Number of positional fields in one quote record.
pub const QUOTE_FIELD_COUNT: usize = 12;

/// Quote schema field names, in wire order.
pub const QUOTE_FIELDS: [&str; QUOTE_FIELD_COUNT] = [
    "eventSymbol",
    "eventTime",
    "sequence",
    "timeNanoPart",
    "bidTime",
    "bidExchangeCode",
    "bidPrice",
    "bidSize",
    "askTime",
    "askExchangeCode",
    "askPrice",
    "askSize",
];

/// A bid/ask snapshot for a symbol.
///
/// Produced only by the quote decoder. Sizes are `None` when the feed sent
/// the `"NaN"` sentinel for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRecord {
    /// Event symbol (e.g. `AAPL`, `/ESZ4:XCME`).
    pub symbol: String,
    /// Event time in epoch milliseconds.
    pub event_time: i64,
    /// Sequence number within the event time.
    pub sequence: i64,
    /// Nanosecond part of the event time.
    pub time_nano_part: i64,
    /// Bid time in epoch milliseconds.
    pub bid_time: i64,
    /// Exchange code of the bid.
    pub bid_exchange_code: String,
    /// Bid price.
    pub bid_price: f64,
    /// Bid size, absent when the feed sent the NaN sentinel.
    pub bid_size: Option<f64>,
    /// Ask time in epoch milliseconds.
    pub ask_time: i64,
    /// Exchange code of the ask.
    pub ask_exchange_code: String,
    /// Ask price.
    pub ask_price: f64,
    /// Ask size, absent when the feed sent the NaN sentinel.
    pub ask_size: Option<f64>,
}

impl QuoteRecord {
    /// Event time as a UTC timestamp.
    ///
    /// Returns `None` for the zero placeholder or out-of-range values.
    #[must_use]
    pub fn event_timestamp(&self) -> Option<DateTime<Utc>> {
        millis_to_utc(self.event_time)
    }

    /// Bid time as a UTC timestamp.
    #[must_use]
    pub fn bid_timestamp(&self) -> Option<DateTime<Utc>> {
        millis_to_utc(self.bid_time)
    }

    /// Ask time as a UTC timestamp.
    #[must_use]
    pub fn ask_timestamp(&self) -> Option<DateTime<Utc>> {
        millis_to_utc(self.ask_time)
    }

    /// Whether both sides carry a size.
    #[must_use]
    pub const fn has_sizes(&self) -> bool {
        self.bid_size.is_some() && self.ask_size.is_some()
    }
}

impl std::fmt::Display for QuoteRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let size = |s: Option<f64>| s.map_or_else(|| "-".to_string(), |v| v.to_string());
        write!(
            f,
            "{} bid {} x {} ({}) ask {} x {} ({})",
            self.symbol,
            self.bid_price,
            size(self.bid_size),
            self.bid_exchange_code,
            self.ask_price,
            size(self.ask_size),
            self.ask_exchange_code,
        )
    }
}

/// Events delivered to consumers of the market data stream.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    /// Handshake succeeded and a client session exists.
    HandshakeCompleted {
        /// Server-assigned client id.
        client_id: String,
    },
    /// Handshake was refused. Terminal for this connection attempt.
    HandshakeRejected {
        /// Server error text, when provided.
        error: Option<String>,
    },
    /// A subscription request was acknowledged.
    Subscribed {
        /// Message id of the acknowledged request.
        id: Option<String>,
    },
    /// A subscription request was refused. The stream stays open.
    SubscriptionRejected {
        /// Message id of the refused request.
        id: Option<String>,
        /// Server error text, when provided.
        error: Option<String>,
    },
    /// A decoded quote.
    Quote(QuoteRecord),
    /// A data payload for an event type other than `Quote`.
    Data {
        /// Event type label from the payload.
        event_type: String,
        /// Undecoded payload.
        payload: serde_json::Value,
    },
    /// Keep-alives stopped after a send failure. The connection stays up
    /// until the server or the transport ends it.
    HeartbeatFailed {
        /// Send error text.
        error: String,
    },
    /// Reconnecting after a transport failure.
    Reconnecting {
        /// Reconnection attempt number.
        attempt: u32,
    },
    /// The connection ended.
    Disconnected {
        /// Transport error text, `None` on a clean close.
        error: Option<String>,
    },
}

impl MarketEvent {
    /// Whether this event ends the stream when no reconnect follows.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::HandshakeRejected { .. } | Self::Disconnected { .. })
    }
}

fn millis_to_utc(millis: i64) -> Option<DateTime<Utc>> {
    if millis <= 0 {
        return None;
    }
    DateTime::from_timestamp_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote() -> QuoteRecord {
        QuoteRecord {
            symbol: "AAPL".to_string(),
            event_time: 0,
            sequence: 0,
            time_nano_part: 0,
            bid_time: 1_700_000_000_000,
            bid_exchange_code: "Q".to_string(),
            bid_price: 167.1,
            bid_size: Some(439.0),
            ask_time: 0,
            ask_exchange_code: "Q".to_string(),
            ask_price: 167.12,
            ask_size: None,
        }
    }

    #[test]
    fn zero_time_has_no_timestamp() {
        assert!(quote().event_timestamp().is_none());
        assert!(quote().ask_timestamp().is_none());
    }

    #[test]
    fn bid_time_converts_from_millis() {
        let ts = quote().bid_timestamp().unwrap();
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn has_sizes_requires_both_sides() {
        let mut q = quote();
        assert!(!q.has_sizes());
        q.ask_size = Some(602.0);
        assert!(q.has_sizes());
    }

    #[test]
    fn display_marks_missing_size() {
        let rendered = quote().to_string();
        assert!(rendered.starts_with("AAPL bid 167.1 x 439"));
        assert!(rendered.contains("ask 167.12 x - (Q)"));
    }

    #[test]
    fn terminal_events() {
        assert!(MarketEvent::Disconnected { error: None }.is_terminal());
        assert!(MarketEvent::HandshakeRejected { error: None }.is_terminal());
        assert!(!MarketEvent::Quote(quote()).is_terminal());
        assert!(
            !MarketEvent::HeartbeatFailed {
                error: "connection closed".to_string()
            }
            .is_terminal()
        );
        assert!(
            !MarketEvent::SubscriptionRejected {
                id: Some("2".to_string()),
                error: None
            }
            .is_terminal()
        );
    }

    #[test]
    fn schema_has_twelve_fields() {
        assert_eq!(QUOTE_FIELDS.len(), QUOTE_FIELD_COUNT);
        assert_eq!(QUOTE_FIELDS[0], "eventSymbol");
        assert_eq!(QUOTE_FIELDS[11], "askSize");
    }
}
