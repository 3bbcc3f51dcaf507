//! In-Memory Rule Store
//!
//! Process-local implementation of [`RuleStore`] used for local runs without
//! a database and throughout the test suite. The instrument catalogue is
//! seeded with the same products as the database migration.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::application::ports::{RuleStore, StoreError};
use crate::domain::market::{Instrument, InstrumentId};
use crate::domain::rules::{NewRule, Rule, RuleId};

/// A triggered alert recorded by the in-memory store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggeredAlertRecord {
    /// Rule that fired.
    pub rule_id: RuleId,
    /// Price at trigger time.
    pub price: Decimal,
    /// When the record was written.
    pub triggered_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    rules: BTreeMap<RuleId, Rule>,
    triggered: Vec<TriggeredAlertRecord>,
    failure: Option<StoreError>,
}

/// In-memory rule store.
#[derive(Debug)]
pub struct InMemoryRuleStore {
    instruments: Vec<Instrument>,
    inner: RwLock<Inner>,
}

impl Default for InMemoryRuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRuleStore {
    /// Create a store seeded with the default instrument catalogue.
    #[must_use]
    pub fn new() -> Self {
        Self::with_instruments(vec![
            Instrument {
                id: InstrumentId(1),
                symbol: "BTC-USD".to_string(),
                name: "Bitcoin".to_string(),
            },
            Instrument {
                id: InstrumentId(2),
                symbol: "ETH-USD".to_string(),
                name: "Ethereum".to_string(),
            },
        ])
    }

    /// Create a store with a custom instrument catalogue.
    #[must_use]
    pub fn with_instruments(instruments: Vec<Instrument>) -> Self {
        Self {
            instruments,
            inner: RwLock::new(Inner {
                next_id: 1,
                ..Inner::default()
            }),
        }
    }

    /// Store a rule directly and return it. Ids are assigned sequentially
    /// from 1.
    pub fn insert(&self, rule: NewRule) -> Rule {
        let mut inner = self.inner.write();
        let id = RuleId(inner.next_id);
        inner.next_id += 1;
        let rule = rule.into_rule(id);
        inner.rules.insert(id, rule.clone());
        rule
    }

    /// Mark a rule active or inactive. Returns `false` if it does not exist.
    pub fn set_active(&self, id: RuleId, active: bool) -> bool {
        self.inner
            .write()
            .rules
            .get_mut(&id)
            .map(|rule| rule.active = active)
            .is_some()
    }

    /// Make every subsequent operation fail with `error`, or clear the
    /// injected failure with `None`.
    pub fn fail_with(&self, error: Option<StoreError>) {
        self.inner.write().failure = error;
    }

    /// Triggered alerts recorded so far, oldest first.
    #[must_use]
    pub fn triggered_alerts(&self) -> Vec<TriggeredAlertRecord> {
        self.inner.read().triggered.clone()
    }

    fn check_failure(&self) -> Result<(), StoreError> {
        self.inner.read().failure.clone().map_or(Ok(()), Err)
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn active_rules(&self) -> Result<Vec<Rule>, StoreError> {
        self.check_failure()?;
        Ok(self
            .inner
            .read()
            .rules
            .values()
            .filter(|rule| rule.active)
            .cloned()
            .collect())
    }

    async fn rules_for_owner(&self, owner_id: &str) -> Result<Vec<Rule>, StoreError> {
        self.check_failure()?;
        Ok(self
            .inner
            .read()
            .rules
            .values()
            .rev()
            .filter(|rule| rule.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn create_rule(&self, rule: NewRule) -> Result<Rule, StoreError> {
        self.check_failure()?;
        Ok(self.insert(rule))
    }

    async fn delete_rule(&self, id: RuleId) -> Result<(), StoreError> {
        self.check_failure()?;
        self.inner
            .write()
            .rules
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn save_triggered_alert(
        &self,
        rule_id: RuleId,
        price: Decimal,
    ) -> Result<(), StoreError> {
        self.check_failure()?;
        self.inner.write().triggered.push(TriggeredAlertRecord {
            rule_id,
            price,
            triggered_at: Utc::now(),
        });
        Ok(())
    }

    async fn instruments(&self) -> Result<Vec<Instrument>, StoreError> {
        self.check_failure()?;
        Ok(self.instruments.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================
