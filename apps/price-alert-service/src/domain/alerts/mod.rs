//! Alert Events and Cooldown Suppression
//!
//! An [`Alert`] is produced exactly once per rule match that clears the
//! cooldown. The [`CooldownLedger`] remembers when each rule last fired and
//! refuses a new claim until the window has elapsed.
//!
//! # Wire Format
//!
//! Alerts are delivered to subscribers as flat JSON objects:
//!
//! ```json
//! {
//!   "rule_id": 7,
//!   "product_id": 1,
//!   "symbol": "BTC-USD",
//!   "price": 50500.0,
//!   "threshold": 50000.0,
//!   "type": "above",
//!   "time": "2026-01-01T00:00:00Z"
//! }
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::market::{InstrumentId, Tick};
use crate::domain::rules::{Rule, RuleId, ThresholdKind};

/// Default minimum time between two alerts for the same rule.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

// =============================================================================
// Alert
// =============================================================================

/// A triggered threshold alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Rule that fired.
    pub rule_id: RuleId,
    /// Instrument the tick was classified to.
    #[serde(rename = "product_id")]
    pub instrument_id: InstrumentId,
    /// Feed symbol of the tick.
    pub symbol: String,
    /// Price that crossed the threshold.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Rule threshold.
    #[serde(with = "rust_decimal::serde::float")]
    pub threshold: Decimal,
    /// Crossing direction.
    #[serde(rename = "type")]
    pub threshold_kind: ThresholdKind,
    /// When the alert fired (RFC 3339, UTC).
    #[serde(rename = "time")]
    pub fired_at: DateTime<Utc>,
}

impl Alert {
    /// Build the alert for `rule` matched by `tick`.
    #[must_use]
    pub fn triggered(rule: &Rule, tick: &Tick, fired_at: DateTime<Utc>) -> Self {
        Self {
            rule_id: rule.id,
            instrument_id: rule.instrument_id,
            symbol: tick.symbol.clone(),
            price: tick.price,
            threshold: rule.threshold,
            threshold_kind: rule.kind,
            fired_at,
        }
    }
}

// =============================================================================
// Cooldown Ledger
// =============================================================================

/// Last-fired instants per rule.
///
/// Keys are rule ids only, so a rule cannot fire again in either direction
/// until its window has elapsed.
#[derive(Debug)]
pub struct CooldownLedger {
    window: Duration,
    last_fired: HashMap<RuleId, Instant>,
}

impl CooldownLedger {
    /// Create an empty ledger with the given window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: HashMap::new(),
        }
    }

    /// Check whether `rule_id` is still cooling down at `now`.
    ///
    /// The window is inclusive: a rule may fire again only once strictly
    /// more than `window` has passed since it last fired.
    #[must_use]
    pub fn is_cooling(&self, rule_id: RuleId, now: Instant) -> bool {
        self.last_fired
            .get(&rule_id)
            .is_some_and(|fired| now.saturating_duration_since(*fired) <= self.window)
    }

    /// Claim the right to fire `rule_id` at `now`.
    ///
    /// Returns `false` without touching the ledger when the rule is cooling
    /// down; otherwise records `now` and returns `true`.
    pub fn try_claim(&mut self, rule_id: RuleId, now: Instant) -> bool {
        if self.is_cooling(rule_id, now) {
            return false;
        }
        self.last_fired.insert(rule_id, now);
        true
    }

    /// Drop entries whose window has elapsed.
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.last_fired
            .retain(|_, fired| now.saturating_duration_since(*fired) <= window);
    }

    /// Number of rules currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.last_fired.len()
    }

    /// Check if no rule is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_fired.is_empty()
    }
}

impl Default for CooldownLedger {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

// =============================================================================
// Tests
// =============================================================================
