//! Stream Codec Module
//!
//! Provides encoding and decoding for the dxFeed Bayeux stream.
//!
//! - **Envelopes**: JSON arrays of Bayeux message objects
//! - **Quotes**: compact flat-array encoding, 12 positional fields per record
//!
//! # Compact Quote Format
//!
//! A `/service/data` payload names the event type and carries a flat list of
//! scalars. The first payload of a session may instead open with a schema
//! header naming the fields:
//!
//! ```json
//! ["Quote", ["AAPL", 0, 0, 0, 0, "Q", 167.1, 439.0, 0, "Q", 167.12, 602.0]]
//! [["Quote", ["eventSymbol", "eventTime", ...]], ["AAPL", 0, 0, ...]]
//! ```
//!
//! Sizes may arrive as the string `"NaN"`, which decodes to `None`.

use serde_json::Value;

use super::messages::Envelope;
use crate::domain::streaming::{QUOTE_EVENT_TYPE, QUOTE_FIELD_COUNT, QuoteRecord};
use crate::infrastructure::metrics;

/// Sentinel the feed uses for missing numeric values.
pub const NAN_SENTINEL: &str = "NaN";

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is valid JSON but not an envelope or envelope array.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// An envelope has no `channel`.
    #[error("envelope missing channel")]
    MissingChannel,
}

// =============================================================================
// Envelope Codec
// =============================================================================

/// JSON codec for Bayeux envelopes.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// Create a new envelope codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode one envelope as a single-element array.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, envelope: &Envelope) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&[envelope])?)
    }

    /// Decode a text frame into envelopes.
    ///
    /// Accepts an array of envelopes or a bare envelope object.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not JSON, is not an object or array of
    /// objects, or any envelope lacks a string `channel`.
    pub fn decode(&self, text: &str) -> Result<Vec<Envelope>, CodecError> {
        let value: Value = serde_json::from_str(text.trim())?;

        match value {
            Value::Array(items) => items.into_iter().map(Self::decode_envelope).collect(),
            obj @ Value::Object(_) => Ok(vec![Self::decode_envelope(obj)?]),
            other => Err(CodecError::MalformedFrame(format!(
                "expected JSON array or object, got {}",
                json_type(&other)
            ))),
        }
    }

    fn decode_envelope(value: Value) -> Result<Envelope, CodecError> {
        let Value::Object(ref map) = value else {
            return Err(CodecError::MalformedFrame(format!(
                "expected envelope object, got {}",
                json_type(&value)
            )));
        };

        if !map.get("channel").is_some_and(Value::is_string) {
            return Err(CodecError::MissingChannel);
        }

        Ok(serde_json::from_value(value)?)
    }
}

// =============================================================================
// Quote Decoder
// =============================================================================

/// A chunk that could not be mapped to a quote.
///
/// Skips are dropped silently by [`QuoteDecoder::decode`]; the type exists so
/// the single-record path can say which field was wrong.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("skipped quote chunk: field '{field}' has unexpected type")]
pub struct DecodeSkip {
    /// Name of the offending field.
    pub field: &'static str,
}

/// Decoded contents of a data payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedData {
    /// Quote records, in wire order.
    Quotes(Vec<QuoteRecord>),
    /// Any other event type, undecoded.
    Other {
        /// Event type label.
        event_type: String,
        /// Raw scalars following the label (header removed).
        payload: Value,
    },
}

/// Decoder for the compact quote encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuoteDecoder;

impl QuoteDecoder {
    /// Create a new quote decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a flat scalar sequence into quotes.
    ///
    /// A leading schema header is removed. The rest is split into chunks of
    /// 12; a trailing short chunk is dropped, as is any chunk whose fields
    /// have the wrong JSON types.
    #[must_use]
    pub fn decode(&self, values: &[Value]) -> Vec<QuoteRecord> {
        let values = strip_header(values);

        let quotes: Vec<QuoteRecord> = values
            .chunks_exact(QUOTE_FIELD_COUNT)
            .filter_map(|chunk| match decode_record(chunk) {
                Ok(quote) => Some(quote),
                Err(skip) => {
                    tracing::trace!(field = skip.field, "Dropping quote chunk");
                    metrics::record_decode_skip();
                    None
                }
            })
            .collect();

        metrics::record_quotes_decoded(quotes.len() as u64);
        quotes
    }

    /// Decode the `data` field of a data-channel envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not an array or has no event type.
    pub fn decode_payload(&self, data: &Value) -> Result<FeedData, CodecError> {
        let Value::Array(items) = data else {
            return Err(CodecError::MalformedFrame(format!(
                "data payload must be an array, got {}",
                json_type(data)
            )));
        };

        let (event_type, scalars) = split_payload(items)?;

        if event_type == QUOTE_EVENT_TYPE {
            Ok(FeedData::Quotes(self.decode(&scalars)))
        } else {
            Ok(FeedData::Other {
                event_type,
                payload: Value::Array(scalars),
            })
        }
    }
}

/// Split a payload into its event type and flat scalars.
///
/// Accepted shapes:
/// - `[label, [scalars...]]` or `[label, scalars...]`
/// - `[[label, [field names...]], [scalars...]]` or with the scalars inline
/// - `[scalars...]` with no label, treated as quotes
///
/// Every record opens with its symbol and a numeric field follows it, so two
/// leading strings mean a label precedes inline scalars.
fn split_payload(items: &[Value]) -> Result<(String, Vec<Value>), CodecError> {
    match items.first() {
        Some(Value::String(label)) if items.len() == 2 && items[1].is_array() => {
            Ok((label.clone(), flatten(&items[1..])))
        }
        Some(Value::String(label)) if matches!(items.get(1), Some(Value::String(_))) => {
            Ok((label.clone(), flatten(&items[1..])))
        }
        Some(first) if header_label(first).is_some() => {
            let label = header_label(first).unwrap_or(QUOTE_EVENT_TYPE).to_string();
            Ok((label, flatten(&items[1..])))
        }
        Some(_) => Ok((QUOTE_EVENT_TYPE.to_string(), items.to_vec())),
        None => Err(CodecError::MalformedFrame("empty data payload".to_string())),
    }
}

/// Flatten one level of nested arrays.
fn flatten(items: &[Value]) -> Vec<Value> {
    items
        .iter()
        .flat_map(|item| match item {
            Value::Array(inner) => inner.clone(),
            scalar => vec![scalar.clone()],
        })
        .collect()
}

/// Event type label of a schema header (`[label, [field names...]]`).
fn header_label(value: &Value) -> Option<&str> {
    let Value::Array(parts) = value else {
        return None;
    };
    match parts.as_slice() {
        [Value::String(label), Value::Array(_), ..] => Some(label.as_str()),
        _ => None,
    }
}

fn strip_header(values: &[Value]) -> &[Value] {
    match values.first() {
        Some(first) if header_label(first).is_some() => &values[1..],
        _ => values,
    }
}

/// Map one 12-field chunk to a quote.
///
/// # Errors
///
/// Returns [`DecodeSkip`] naming the first field with an unexpected type.
pub fn decode_record(chunk: &[Value]) -> Result<QuoteRecord, DecodeSkip> {
    let [
        symbol,
        event_time,
        sequence,
        time_nano_part,
        bid_time,
        bid_exchange_code,
        bid_price,
        bid_size,
        ask_time,
        ask_exchange_code,
        ask_price,
        ask_size,
    ] = chunk
    else {
        return Err(DecodeSkip { field: "eventSymbol" });
    };

    Ok(QuoteRecord {
        symbol: symbol
            .as_str()
            .ok_or(DecodeSkip { field: "eventSymbol" })?
            .to_string(),
        event_time: integer(event_time, "eventTime")?,
        sequence: integer(sequence, "sequence")?,
        time_nano_part: integer(time_nano_part, "timeNanoPart")?,
        bid_time: integer(bid_time, "bidTime")?,
        bid_exchange_code: exchange_code(bid_exchange_code, "bidExchangeCode")?,
        bid_price: price(bid_price, "bidPrice")?,
        bid_size: size(bid_size, "bidSize")?,
        ask_time: integer(ask_time, "askTime")?,
        ask_exchange_code: exchange_code(ask_exchange_code, "askExchangeCode")?,
        ask_price: price(ask_price, "askPrice")?,
        ask_size: size(ask_size, "askSize")?,
    })
}

#[allow(clippy::cast_possible_truncation)]
fn integer(value: &Value, field: &'static str) -> Result<i64, DecodeSkip> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .ok_or(DecodeSkip { field }),
        _ => Err(DecodeSkip { field }),
    }
}

fn exchange_code(value: &Value, field: &'static str) -> Result<String, DecodeSkip> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(DecodeSkip { field }),
    }
}

fn price(value: &Value, field: &'static str) -> Result<f64, DecodeSkip> {
    match value {
        Value::Number(n) => n.as_f64().ok_or(DecodeSkip { field }),
        Value::String(s) if s == NAN_SENTINEL => Ok(f64::NAN),
        Value::String(s) => s.parse().map_err(|_| DecodeSkip { field }),
        _ => Err(DecodeSkip { field }),
    }
}

fn size(value: &Value, field: &'static str) -> Result<Option<f64>, DecodeSkip> {
    match value {
        Value::String(s) if s == NAN_SENTINEL => Ok(None),
        Value::Number(n) => n.as_f64().map(Some).ok_or(DecodeSkip { field }),
        Value::String(s) => s.parse().map(Some).map_err(|_| DecodeSkip { field }),
        _ => Err(DecodeSkip { field }),
    }
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
