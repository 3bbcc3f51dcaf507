//! HTTP response DTOs.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::market::Instrument;
use crate::domain::rules::{Rule, ThresholdKind};

/// A stored alert rule.
///
/// # Wire Format (JSON)
/// ```json
/// {"id": 7, "user_id": "demo-user", "product_id": 1, "threshold_type": "above",
///  "threshold_value": 50000.0, "is_active": true}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRuleResponse {
    /// Rule id.
    pub id: i64,
    /// Owner.
    pub user_id: String,
    /// Instrument id.
    pub product_id: i32,
    /// Crossing direction.
    pub threshold_type: ThresholdKind,
    /// Threshold price.
    #[serde(with = "rust_decimal::serde::float")]
    pub threshold_value: Decimal,
    /// Whether the rule is evaluated.
    pub is_active: bool,
}

impl From<Rule> for AlertRuleResponse {
    fn from(rule: Rule) -> Self {
        Self {
            id: rule.id.get(),
            user_id: rule.owner_id,
            product_id: rule.instrument_id.get(),
            threshold_type: rule.kind,
            threshold_value: rule.threshold,
            is_active: rule.active,
        }
    }
}

/// A catalogue entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductResponse {
    /// Instrument id.
    pub id: i32,
    /// Feed symbol.
    pub symbol: String,
    /// Display name.
    pub name: String,
}

impl From<Instrument> for ProductResponse {
    fn from(instrument: Instrument) -> Self {
        Self {
            id: instrument.id.get(),
            symbol: instrument.symbol,
            name: instrument.name,
        }
    }
}

/// Error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable message.
    pub error: String,
}
