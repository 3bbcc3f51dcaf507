//! Rule Store Port
//!
//! Persistence contract for threshold rules and triggered alerts.
//!
//! Deleting a rule that does not exist is reported as
//! [`StoreError::NotFound`] so callers can tell it apart from a failed query.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::market::Instrument;
use crate::domain::rules::{NewRule, Rule, RuleId};

/// Errors from rule store operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store connection error: {0}")]
    Connection(String),

    /// A query failed.
    #[error("store query error: {0}")]
    Query(String),

    /// The rule does not exist.
    #[error("rule {0} not found")]
    NotFound(RuleId),

    /// A stored row could not be mapped to a domain type.
    #[error("invalid stored data: {0}")]
    InvalidData(String),
}

/// Port for rule persistence.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Load every active rule in store order.
    async fn active_rules(&self) -> Result<Vec<Rule>, StoreError>;

    /// Load the rules owned by `owner_id`, newest first.
    async fn rules_for_owner(&self, owner_id: &str) -> Result<Vec<Rule>, StoreError>;

    /// Store a new rule and return it with its assigned id.
    async fn create_rule(&self, rule: NewRule) -> Result<Rule, StoreError>;

    /// Delete a rule.
    ///
    /// Returns [`StoreError::NotFound`] when no rule has this id.
    async fn delete_rule(&self, id: RuleId) -> Result<(), StoreError>;

    /// Append a triggered alert to the alert log.
    async fn save_triggered_alert(&self, rule_id: RuleId, price: Decimal)
    -> Result<(), StoreError>;

    /// List the instruments rules can be defined on.
    async fn instruments(&self) -> Result<Vec<Instrument>, StoreError>;
}

/// Shared handle to a rule store.
pub type SharedRuleStore = Arc<dyn RuleStore>;
