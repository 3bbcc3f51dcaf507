//! Coinbase Advanced Trade WebSocket Message Types
//!
//! Wire format types for the public market data feed at
//! `wss://advanced-trade-ws.coinbase.com`. Only the fields the service needs
//! are modelled; everything else in a frame is ignored.
//!
//! # Channels
//!
//! - `ticker`: Last trade price per product
//! - `heartbeats`: Once-per-second keepalive
//! - `subscriptions`: Acknowledgement listing active subscriptions
//!
//! Rejected requests come back as a bare `{"type": "error", ...}` object.
//!
//! # References
//!
//! - [Advanced Trade WebSocket Channels](https://docs.cdp.coinbase.com/advanced-trade/docs/ws-channels)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Ticker channel name.
pub const TICKER_CHANNEL: &str = "ticker";

/// Heartbeats channel name.
pub const HEARTBEATS_CHANNEL: &str = "heartbeats";

/// Subscription acknowledgement channel name.
pub const SUBSCRIPTIONS_CHANNEL: &str = "subscriptions";

// =============================================================================
// Outbound
// =============================================================================

/// Subscribe request.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "subscribe", "product_ids": ["BTC-USD", "ETH-USD"], "channel": "ticker"}
/// {"type": "subscribe", "channel": "heartbeats"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest {
    /// Always `subscribe`.
    #[serde(rename = "type")]
    pub request_type: &'static str,
    /// Products to subscribe to. Omitted for product-less channels.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub product_ids: Vec<String>,
    /// Channel name.
    pub channel: &'static str,
}

impl SubscribeRequest {
    /// Ticker subscription for `products`.
    #[must_use]
    pub fn ticker<I, S>(products: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            request_type: "subscribe",
            product_ids: products.into_iter().map(Into::into).collect(),
            channel: TICKER_CHANNEL,
        }
    }

    /// Heartbeats subscription.
    #[must_use]
    pub const fn heartbeats() -> Self {
        Self {
            request_type: "subscribe",
            product_ids: Vec::new(),
            channel: HEARTBEATS_CHANNEL,
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

// =============================================================================
// Inbound
// =============================================================================

/// Envelope shared by every inbound frame.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "channel": "ticker",
///   "client_id": "",
///   "timestamp": "2026-02-09T20:30:37.167359596Z",
///   "sequence_num": 12,
///   "events": [ ... ]
/// }
/// ```
///
/// Events are kept as raw JSON so one malformed event does not discard the
/// rest of the frame.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedFrame {
    /// Only present on error frames (`"error"`).
    #[serde(rename = "type", default)]
    pub frame_type: Option<String>,
    /// Channel the frame belongs to.
    #[serde(default)]
    pub channel: Option<String>,
    /// Server timestamp (RFC 3339).
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Per-connection sequence number.
    #[serde(default)]
    pub sequence_num: Option<u64>,
    /// Channel events.
    #[serde(default)]
    pub events: Vec<serde_json::Value>,
    /// Error description on error frames.
    #[serde(default)]
    pub message: Option<String>,
}

/// One event of the ticker channel.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "update", "tickers": [{"type": "ticker", "product_id": "BTC-USD", "price": "21932.98"}]}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct TickerEvent {
    /// `snapshot` or `update`.
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    /// Ticker records, kept raw for per-record skipping.
    #[serde(default)]
    pub tickers: Vec<serde_json::Value>,
}

/// One ticker record. Both fields are required for a tick to be produced.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerRecord {
    /// Product identifier (e.g. `BTC-USD`).
    #[serde(default)]
    pub product_id: Option<String>,
    /// Last trade price as decimal text.
    #[serde(default)]
    pub price: Option<String>,
}

/// One event of the subscriptions channel.
///
/// # Wire Format (JSON)
/// ```json
/// {"subscriptions": {"ticker": ["BTC-USD", "ETH-USD"], "heartbeats": ["heartbeats"]}}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionsEvent {
    /// Active subscriptions keyed by channel.
    #[serde(default)]
    pub subscriptions: BTreeMap<String, Vec<String>>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_request_wire_format() {
        let json = SubscribeRequest::ticker(["BTC-USD", "ETH-USD"]).to_json().unwrap();
        assert_eq!(
            json,
            r#"{"type":"subscribe","product_ids":["BTC-USD","ETH-USD"],"channel":"ticker"}"#
        );
    }

    #[test]
    fn heartbeats_request_omits_products() {
        let json = SubscribeRequest::heartbeats().to_json().unwrap();
        assert_eq!(json, r#"{"type":"subscribe","channel":"heartbeats"}"#);
    }

    #[test]
    fn frame_tolerates_missing_fields() {
        let frame: FeedFrame = serde_json::from_str("{}").unwrap();
        assert!(frame.channel.is_none());
        assert!(frame.events.is_empty());
    }
}
