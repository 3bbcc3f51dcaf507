//! Market Data Types
//!
//! Normalized price observations and the instrument catalogue they map to.
//!
//! # Classification
//!
//! Feed symbols are mapped to instrument identifiers by a small ordered
//! table of ticker substrings, built from the catalogue's base currencies. The first entry whose ticker is contained in
//! the symbol wins. Matching is case-sensitive and the symbol is not
//! normalized, so `"btc-usd"` does not classify.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Tick
// =============================================================================

/// One normalized price observation for an instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    /// Feed symbol (e.g. `BTC-USD`).
    pub symbol: String,
    /// Last traded price.
    pub price: Decimal,
    /// When the price was observed.
    pub observed_at: DateTime<Utc>,
}

impl Tick {
    /// Create a new tick.
    #[must_use]
    pub fn new(symbol: impl Into<String>, price: Decimal, observed_at: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            observed_at,
        }
    }
}

// =============================================================================
// Instruments
// =============================================================================

/// Identifier of a tradable instrument in the rule store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(pub i32);

impl InstrumentId {
    /// Get the raw identifier.
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Catalogue entry for an instrument alerts can be defined on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Instrument identifier.
    pub id: InstrumentId,
    /// Feed symbol.
    pub symbol: String,
    /// Display name.
    pub name: String,
}

// =============================================================================
// Instrument Classifier
// =============================================================================

/// Maps feed symbols to instrument identifiers.
#[derive(Debug, Clone)]
pub struct InstrumentClassifier {
    entries: Vec<(String, InstrumentId)>,
}

impl Default for InstrumentClassifier {
    fn default() -> Self {
        Self::new([("BTC", InstrumentId(1)), ("ETH", InstrumentId(2))])
    }
}

impl InstrumentClassifier {
    /// Create a classifier from an ordered list of `(ticker, id)` pairs.
    #[must_use]
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, InstrumentId)>,
        S: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(ticker, id)| (ticker.into(), id))
                .collect(),
        }
    }

    /// Create a classifier from the instrument catalogue.
    ///
    /// Each instrument is keyed on its base currency, the part of the
    /// symbol before the first `-`, so `BTC-USD` also classifies `BTC-EUR`.
    /// Catalogue order is kept and a base already taken by an earlier
    /// instrument is skipped.
    #[must_use]
    pub fn from_catalogue(instruments: &[Instrument]) -> Self {
        let mut entries: Vec<(String, InstrumentId)> = Vec::with_capacity(instruments.len());
        for instrument in instruments {
            let base = instrument
                .symbol
                .split('-')
                .next()
                .unwrap_or_default()
                .trim();
            if base.is_empty() || entries.iter().any(|(ticker, _)| ticker == base) {
                continue;
            }
            entries.push((base.to_string(), instrument.id));
        }
        Self { entries }
    }

    /// Classify a feed symbol.
    ///
    /// Returns `None` for symbols that contain none of the known tickers.
    #[must_use]
    pub fn classify(&self, symbol: &str) -> Option<InstrumentId> {
        self.entries
            .iter()
            .find(|(ticker, _)| symbol.contains(ticker.as_str()))
            .map(|(_, id)| *id)
    }

    /// Number of known tickers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the classifier knows no tickers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("BTC-USD", Some(InstrumentId(1)) ; "bitcoin")]
    #[test_case("ETH-USD", Some(InstrumentId(2)) ; "ether")]
    #[test_case("ETH-BTC", Some(InstrumentId(1)) ; "first table entry wins")]
    #[test_case("btc-usd", None ; "case sensitive")]
    #[test_case("SOL-USD", None ; "unknown symbol")]
    #[test_case("", None ; "empty symbol")]
    fn default_classifier(symbol: &str, expected: Option<InstrumentId>) {
        assert_eq!(InstrumentClassifier::default().classify(symbol), expected);
    }

    #[test]
    fn custom_table_order_is_respected() {
        let classifier =
            InstrumentClassifier::new([("ETH", InstrumentId(20)), ("BTC", InstrumentId(10))]);
        assert_eq!(classifier.classify("ETH-BTC"), Some(InstrumentId(20)));
        assert_eq!(classifier.len(), 2);
        assert!(!classifier.is_empty());
    }

    fn instrument(id: i32, symbol: &str) -> Instrument {
        Instrument {
            id: InstrumentId(id),
            symbol: symbol.to_string(),
            name: symbol.to_string(),
        }
    }

    #[test_case("BTC-USD", Some(InstrumentId(1)) ; "catalogue symbol")]
    #[test_case("BTC-EUR", Some(InstrumentId(1)) ; "other quote currency")]
    #[test_case("ETH-USDC", Some(InstrumentId(2)) ; "second instrument")]
    #[test_case("SOL-USD", None ; "not in catalogue")]
    fn catalogue_classifier_keys_on_base_currency(symbol: &str, expected: Option<InstrumentId>) {
        let classifier = InstrumentClassifier::from_catalogue(&[
            instrument(1, "BTC-USD"),
            instrument(2, "ETH-USD"),
        ]);
        assert_eq!(classifier.classify(symbol), expected);
    }

    #[test]
    fn catalogue_classifier_skips_duplicate_and_blank_bases() {
        let classifier = InstrumentClassifier::from_catalogue(&[
            instrument(1, "BTC-USD"),
            instrument(3, "BTC-EUR"),
            instrument(4, ""),
        ]);
        assert_eq!(classifier.len(), 1);
        assert_eq!(classifier.classify("BTC-EUR"), Some(InstrumentId(1)));
    }

    #[test]
    fn instrument_id_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&InstrumentId(7)).unwrap(), "7");
    }
}
