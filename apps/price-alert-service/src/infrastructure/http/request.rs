//! HTTP request DTOs.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Body of `POST /api/alerts`.
///
/// # Wire Format (JSON)
/// ```json
/// {"user_id": "demo-user", "product_id": 1, "threshold_type": "above", "threshold_value": 50000}
/// ```
///
/// `threshold_value` accepts a JSON number or decimal string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAlertRequest {
    /// Owner; the configured default owner when absent or blank.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Instrument id from `/api/products`.
    pub product_id: i32,
    /// `above` or `below`, case-insensitive.
    pub threshold_type: String,
    /// Threshold price, must be positive.
    pub threshold_value: Decimal,
}

/// Query string of `GET /api/alerts`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertsQuery {
    /// Owner; the configured default owner when absent or blank.
    #[serde(default)]
    pub user_id: Option<String>,
}
