//! Threshold Rules
//!
//! A rule is a standing instruction to alert when an instrument's price
//! crosses a threshold in one direction. The engine never evaluates rules
//! straight from the store; it works from a [`RuleSnapshot`], which is built
//! completely from one store read and then published as a whole.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::market::InstrumentId;

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of a stored rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub i64);

impl RuleId {
    /// Get the raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Threshold Kind
// =============================================================================

/// Direction a price must cross for a rule to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdKind {
    /// Match when the price is strictly greater than the threshold.
    Above,
    /// Match when the price is strictly less than the threshold.
    Below,
}

impl ThresholdKind {
    /// Check whether `price` satisfies this direction against `threshold`.
    #[must_use]
    pub fn is_crossed_by(self, price: Decimal, threshold: Decimal) -> bool {
        match self {
            Self::Above => price > threshold,
            Self::Below => price < threshold,
        }
    }

    /// Get the wire and storage name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Above => "above",
            Self::Below => "below",
        }
    }
}

impl fmt::Display for ThresholdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown threshold kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown threshold kind: {0}")]
pub struct UnknownThresholdKind(pub String);

impl FromStr for ThresholdKind {
    type Err = UnknownThresholdKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "above" => Ok(Self::Above),
            "below" => Ok(Self::Below),
            _ => Err(UnknownThresholdKind(s.to_string())),
        }
    }
}

// =============================================================================
// Rule
// =============================================================================

/// A stored threshold rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule identifier assigned by the store.
    pub id: RuleId,
    /// Owner of the rule.
    pub owner_id: String,
    /// Instrument the rule watches.
    pub instrument_id: InstrumentId,
    /// Crossing direction.
    pub kind: ThresholdKind,
    /// Threshold price.
    pub threshold: Decimal,
    /// Inactive rules are never matched.
    pub active: bool,
}

impl Rule {
    /// Check whether a price observed for `instrument_id` satisfies this rule.
    ///
    /// Inactive rules never match.
    #[must_use]
    pub fn matches(&self, instrument_id: InstrumentId, price: Decimal) -> bool {
        self.active
            && self.instrument_id == instrument_id
            && self.kind.is_crossed_by(price, self.threshold)
    }
}

/// A rule that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRule {
    /// Owner of the rule.
    pub owner_id: String,
    /// Instrument the rule watches.
    pub instrument_id: InstrumentId,
    /// Crossing direction.
    pub kind: ThresholdKind,
    /// Threshold price.
    pub threshold: Decimal,
}

impl NewRule {
    /// Build the stored form of this rule under `id`. New rules start active.
    #[must_use]
    pub fn into_rule(self, id: RuleId) -> Rule {
        Rule {
            id,
            owner_id: self.owner_id,
            instrument_id: self.instrument_id,
            kind: self.kind,
            threshold: self.threshold,
            active: true,
        }
    }
}

// =============================================================================
// Rule Snapshot
// =============================================================================

/// Immutable, versioned view of the active rules.
#[derive(Debug, Clone)]
pub struct RuleSnapshot {
    version: u64,
    loaded_at: DateTime<Utc>,
    rules: Vec<Rule>,
}

impl RuleSnapshot {
    /// Snapshot with no rules, used before the first reload.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: 0,
            loaded_at: Utc::now(),
            rules: Vec::new(),
        }
    }

    /// Build a snapshot from a store read.
    ///
    /// Inactive rules are dropped; the remaining rules keep store order.
    #[must_use]
    pub fn new(version: u64, loaded_at: DateTime<Utc>, rules: Vec<Rule>) -> Self {
        Self {
            version,
            loaded_at,
            rules: rules.into_iter().filter(|rule| rule.active).collect(),
        }
    }

    /// Snapshot version. Each successful reload increments it by one.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// When the snapshot was built.
    #[must_use]
    pub const fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// All active rules in store order.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Number of active rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if the snapshot holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules matched by a price for an instrument, in store order.
    pub fn matching(
        &self,
        instrument_id: InstrumentId,
        price: Decimal,
    ) -> impl Iterator<Item = &Rule> + '_ {
        self.rules
            .iter()
            .filter(move |rule| rule.matches(instrument_id, price))
    }
}

impl Default for RuleSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
