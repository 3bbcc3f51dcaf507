//! PostgreSQL Rule Store
//!
//! [`RuleStore`] backed by `PostgreSQL` via `SQLx`. The schema lives in the
//! crate's `migrations/` directory and is applied by [`PostgresRuleStore::migrate`].

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::application::ports::{RuleStore, StoreError};
use crate::domain::market::{Instrument, InstrumentId};
use crate::domain::rules::{NewRule, Rule, RuleId, ThresholdKind};

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

/// Rule store backed by a `PostgreSQL` connection pool.
#[derive(Debug, Clone)]
pub struct PostgresRuleStore {
    pool: PgPool,
}

impl PostgresRuleStore {
    /// Connect to `database_url` with at most `max_connections` pooled
    /// connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be connected.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!(max_connections, "PostgreSQL connection pool initialized");

        Ok(Self::with_pool(pool))
    }

    /// Create a store with an existing pool.
    #[must_use]
    pub const fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("migration failed: {e}")))?;
        info!("Database migrations applied");
        Ok(())
    }

    fn row_to_rule(row: &PgRow) -> Result<Rule, StoreError> {
        let kind = row
            .try_get::<String, _>("threshold_type")
            .map_err(|e| StoreError::InvalidData(format!("threshold_type: {e}")))?
            .parse::<ThresholdKind>()
            .map_err(|e| StoreError::InvalidData(e.to_string()))?;

        Ok(Rule {
            id: RuleId(
                row.try_get::<i64, _>("id")
                    .map_err(|e| StoreError::InvalidData(format!("id: {e}")))?,
            ),
            owner_id: row
                .try_get::<String, _>("user_id")
                .map_err(|e| StoreError::InvalidData(format!("user_id: {e}")))?,
            instrument_id: InstrumentId(
                row.try_get::<i32, _>("product_id")
                    .map_err(|e| StoreError::InvalidData(format!("product_id: {e}")))?,
            ),
            kind,
            threshold: row
                .try_get::<Decimal, _>("threshold_value")
                .map_err(|e| StoreError::InvalidData(format!("threshold_value: {e}")))?,
            active: row.try_get::<bool, _>("is_active").unwrap_or(false),
        })
    }

    fn rows_to_rules(rows: &[PgRow]) -> Result<Vec<Rule>, StoreError> {
        rows.iter().map(Self::row_to_rule).collect()
    }
}

#[async_trait]
impl RuleStore for PostgresRuleStore {
    async fn active_rules(&self) -> Result<Vec<Rule>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, product_id, threshold_type, threshold_value, is_active
            FROM alert_rules
            WHERE is_active = TRUE
            ORDER BY id
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Self::rows_to_rules(&rows)
    }

    async fn rules_for_owner(&self, owner_id: &str) -> Result<Vec<Rule>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, product_id, threshold_type, threshold_value, is_active
            FROM alert_rules
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            ",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Self::rows_to_rules(&rows)
    }

    async fn create_rule(&self, rule: NewRule) -> Result<Rule, StoreError> {
        let row = sqlx::query(
            r"
            INSERT INTO alert_rules (user_id, product_id, threshold_type, threshold_value)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, product_id, threshold_type, threshold_value, is_active
            ",
        )
        .bind(&rule.owner_id)
        .bind(rule.instrument_id.get())
        .bind(rule.kind.as_str())
        .bind(rule.threshold)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        let stored = Self::row_to_rule(&row)?;
        info!(rule_id = %stored.id, owner_id = %stored.owner_id, "Created alert rule");
        Ok(stored)
    }

    async fn delete_rule(&self, id: RuleId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM alert_rules WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }

        info!(rule_id = %id, "Deleted alert rule");
        Ok(())
    }

    async fn save_triggered_alert(
        &self,
        rule_id: RuleId,
        price: Decimal,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO triggered_alerts (rule_id, price) VALUES ($1, $2)")
            .bind(rule_id.get())
            .bind(price)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        debug!(rule_id = %rule_id, price = %price, "Saved triggered alert");
        Ok(())
    }

    async fn instruments(&self) -> Result<Vec<Instrument>, StoreError> {
        let rows = sqlx::query("SELECT id, symbol, name FROM products ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Ok(Instrument {
                    id: InstrumentId(
                        row.try_get::<i32, _>("id")
                            .map_err(|e| StoreError::InvalidData(format!("id: {e}")))?,
                    ),
                    symbol: row
                        .try_get::<String, _>("symbol")
                        .map_err(|e| StoreError::InvalidData(format!("symbol: {e}")))?,
                    name: row
                        .try_get::<String, _>("name")
                        .map_err(|e| StoreError::InvalidData(format!("name: {e}")))?,
                })
            })
            .collect()
    }
}
