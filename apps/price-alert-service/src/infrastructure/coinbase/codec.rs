//! Feed Frame Codec
//!
//! Turns raw text frames from the Coinbase feed into [`FeedMessage`]s.
//!
//! Decoding is lenient below the frame level: a ticker event or record that
//! does not match the expected shape is skipped, and so is a record whose
//! price text does not parse. Only text that is not a JSON object fails the
//! whole frame.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::messages::{
    FeedFrame, HEARTBEATS_CHANNEL, SUBSCRIPTIONS_CHANNEL, SubscriptionsEvent, TICKER_CHANNEL,
    TickerEvent, TickerRecord,
};
use crate::domain::market::Tick;

/// Errors that fail a whole frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Text is not valid JSON for a frame envelope.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Text is valid JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
}

/// A decoded feed frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Ticks extracted from a ticker frame, in frame order. May be empty.
    Ticks(Vec<Tick>),
    /// Subscription acknowledgement keyed by channel.
    Subscriptions(BTreeMap<String, Vec<String>>),
    /// Keepalive.
    Heartbeat,
    /// Server-side error frame.
    Error(String),
    /// Any other channel.
    Ignored {
        /// Channel name, if the frame carried one.
        channel: Option<String>,
    },
}

/// Stateless decoder for feed frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedCodec;

impl FeedCodec {
    /// Create a codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// Ticks take their `observed_at` from the frame timestamp, falling back
    /// to the current time when the timestamp is absent or unparsable.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object.
    pub fn decode(&self, text: &str) -> Result<FeedMessage, DecodeError> {
        let trimmed = text.trim_start();
        if !trimmed.starts_with('{') {
            // Garbage reports the parse error, valid non-objects do not.
            let _: serde_json::Value = serde_json::from_str(trimmed)?;
            return Err(DecodeError::NotAnObject);
        }

        let frame: FeedFrame = serde_json::from_str(trimmed)?;

        if frame.frame_type.as_deref() == Some("error") {
            return Ok(FeedMessage::Error(
                frame.message.unwrap_or_else(|| "unspecified error".to_string()),
            ));
        }

        match frame.channel.as_deref() {
            Some(TICKER_CHANNEL) => Ok(FeedMessage::Ticks(Self::ticks(&frame))),
            Some(SUBSCRIPTIONS_CHANNEL) => Ok(FeedMessage::Subscriptions(Self::subscriptions(frame))),
            Some(HEARTBEATS_CHANNEL) => Ok(FeedMessage::Heartbeat),
            _ => Ok(FeedMessage::Ignored {
                channel: frame.channel,
            }),
        }
    }

    fn ticks(frame: &FeedFrame) -> Vec<Tick> {
        let observed_at = frame
            .timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map_or_else(Utc::now, |ts| ts.with_timezone(&Utc));

        frame
            .events
            .iter()
            .filter_map(|event| serde_json::from_value::<TickerEvent>(event.clone()).ok())
            .flat_map(|event| event.tickers)
            .filter_map(|record| serde_json::from_value::<TickerRecord>(record).ok())
            .filter_map(|record| {
                let symbol = record.product_id.filter(|s| !s.is_empty())?;
                let price = record.price?.trim().parse::<Decimal>().ok()?;
                Some(Tick::new(symbol, price, observed_at))
            })
            .collect()
    }

    fn subscriptions(frame: FeedFrame) -> BTreeMap<String, Vec<String>> {
        frame
            .events
            .into_iter()
            .filter_map(|event| serde_json::from_value::<SubscriptionsEvent>(event).ok())
            .flat_map(|event| event.subscriptions)
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
