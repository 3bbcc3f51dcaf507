//! Alert Evaluation Engine
//!
//! Matches ticks against the current rule snapshot and applies per-rule
//! cooldown suppression.
//!
//! # Concurrency
//!
//! - The snapshot lives behind a read-mostly `RwLock<Arc<RuleSnapshot>>`.
//!   Evaluators clone the `Arc` under the read lock and work from that
//!   snapshot; reloads build a complete replacement first and swap it under
//!   the write lock.
//! - Reloads are serialized so snapshot versions are published in order.
//! - The cooldown claim is a single check-and-set under the ledger mutex,
//!   completed before the alert is returned to the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::application::ports::{SharedRuleStore, StoreError};
use crate::domain::alerts::{Alert, CooldownLedger};
use crate::domain::market::{InstrumentId, Tick};
use crate::domain::rules::RuleSnapshot;
use crate::infrastructure::metrics::{self, ReloadOutcome};

/// Summary of the engine state for health reporting.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    /// Version of the current snapshot (0 before the first reload).
    pub snapshot_version: u64,
    /// Number of active rules in the snapshot.
    pub active_rules: usize,
    /// When the current snapshot was built.
    pub loaded_at: DateTime<Utc>,
    /// Error from the most recent reload, if it failed.
    pub last_reload_error: Option<String>,
}

/// Threshold rule evaluation engine.
pub struct AlertEngine {
    store: SharedRuleStore,
    snapshot: RwLock<Arc<RuleSnapshot>>,
    cooldown: Mutex<CooldownLedger>,
    reload_lock: tokio::sync::Mutex<()>,
    last_reload_error: RwLock<Option<String>>,
}

impl AlertEngine {
    /// Create an engine with an empty snapshot.
    #[must_use]
    pub fn new(store: SharedRuleStore, cooldown_window: Duration) -> Self {
        Self {
            store,
            snapshot: RwLock::new(Arc::new(RuleSnapshot::empty())),
            cooldown: Mutex::new(CooldownLedger::new(cooldown_window)),
            reload_lock: tokio::sync::Mutex::new(()),
            last_reload_error: RwLock::new(None),
        }
    }

    /// Replace the rule snapshot with the store's active rules.
    ///
    /// On failure the previous snapshot stays in place and the error is
    /// remembered for health reporting.
    ///
    /// # Errors
    ///
    /// Returns the store error when the active rules cannot be read.
    pub async fn reload_rules(&self) -> Result<Arc<RuleSnapshot>, StoreError> {
        let _serialized = self.reload_lock.lock().await;

        let rules = match self.store.active_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!(error = %e, "Rule reload failed, keeping previous snapshot");
                *self.last_reload_error.write() = Some(e.to_string());
                metrics::record_rule_reload(ReloadOutcome::Failure);
                return Err(e);
            }
        };

        let next = {
            let mut current = self.snapshot.write();
            let next = Arc::new(RuleSnapshot::new(
                current.version() + 1,
                Utc::now(),
                rules,
            ));
            *current = Arc::clone(&next);
            next
        };

        *self.last_reload_error.write() = None;
        self.cooldown.lock().prune(tokio::time::Instant::now().into_std());

        metrics::record_rule_reload(ReloadOutcome::Success);
        metrics::set_active_rules(next.len());
        tracing::debug!(
            version = next.version(),
            rules = next.len(),
            "Rule snapshot reloaded"
        );

        Ok(next)
    }

    /// Current rule snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Evaluate a tick classified to `instrument_id`.
    ///
    /// Uses the runtime clock, so paused-time tests control the cooldown.
    #[must_use]
    pub fn evaluate(&self, tick: &Tick, instrument_id: InstrumentId) -> Vec<Alert> {
        self.evaluate_at(tick, instrument_id, tokio::time::Instant::now().into_std())
    }

    /// Evaluate a tick against the current snapshot at instant `now`.
    ///
    /// Every matching rule whose cooldown has elapsed produces one alert, in
    /// snapshot order.
    #[must_use]
    pub fn evaluate_at(&self, tick: &Tick, instrument_id: InstrumentId, now: Instant) -> Vec<Alert> {
        let snapshot = self.snapshot();
        let mut alerts = Vec::new();

        for rule in snapshot.matching(instrument_id, tick.price) {
            let claimed = self.cooldown.lock().try_claim(rule.id, now);
            if claimed {
                metrics::record_alert_fired();
                alerts.push(Alert::triggered(rule, tick, Utc::now()));
            } else {
                metrics::record_alert_suppressed();
                tracing::trace!(rule_id = %rule.id, price = %tick.price, "Alert suppressed by cooldown");
            }
        }

        alerts
    }

    /// Engine state for health reporting.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        let snapshot = self.snapshot();
        EngineStatus {
            snapshot_version: snapshot.version(),
            active_rules: snapshot.len(),
            loaded_at: snapshot.loaded_at(),
            last_reload_error: self.last_reload_error.read().clone(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::RuleStore;
    use crate::domain::rules::{NewRule, RuleId, ThresholdKind};
    use crate::infrastructure::persistence::InMemoryRuleStore;
    use rust_decimal::Decimal;

    fn tick(symbol: &str, price: i64) -> Tick {
        Tick::new(symbol, Decimal::from(price), Utc::now())
    }

    fn new_rule(kind: ThresholdKind, threshold: i64) -> NewRule {
        NewRule {
            owner_id: "demo-user".to_string(),
            instrument_id: InstrumentId(1),
            kind,
            threshold: Decimal::from(threshold),
        }
    }

    async fn engine_with(rules: Vec<NewRule>) -> (AlertEngine, Arc<InMemoryRuleStore>) {
        let store = Arc::new(InMemoryRuleStore::new());
        for rule in rules {
            store.insert(rule);
        }
        let engine = AlertEngine::new(store.clone(), Duration::from_secs(300));
        engine.reload_rules().await.unwrap();
        (engine, store)
    }

    #[tokio::test]
    async fn empty_engine_emits_nothing() {
        let store = Arc::new(InMemoryRuleStore::new());
        let engine = AlertEngine::new(store, Duration::from_secs(300));
        assert!(engine.evaluate(&tick("BTC-USD", 100_000), InstrumentId(1)).is_empty());
        assert_eq!(engine.status().snapshot_version, 0);
    }

    #[tokio::test]
    async fn above_rule_fires_once_within_window() {
        let (engine, _) = engine_with(vec![new_rule(ThresholdKind::Above, 50_000)]).await;
        let start = Instant::now();

        let first = engine.evaluate_at(&tick("BTC-USD", 50_001), InstrumentId(1), start);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].price, Decimal::from(50_001));

        let second = engine.evaluate_at(
            &tick("BTC-USD", 50_002),
            InstrumentId(1),
            start + Duration::from_secs(10),
        );
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn rule_fires_again_after_window() {
        let (engine, _) = engine_with(vec![new_rule(ThresholdKind::Below, 3_000)]).await;
        let start = Instant::now();

        assert_eq!(
            engine
                .evaluate_at(&tick("ETH-USD", 2_999), InstrumentId(1), start)
                .len(),
            1
        );
        assert_eq!(
            engine
                .evaluate_at(
                    &tick("ETH-USD", 2_998),
                    InstrumentId(1),
                    start + Duration::from_secs(300),
                )
                .len(),
            0
        );
        assert_eq!(
            engine
                .evaluate_at(
                    &tick("ETH-USD", 2_997),
                    InstrumentId(1),
                    start + Duration::from_secs(300) + Duration::from_nanos(1),
                )
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn cooldown_is_per_rule() {
        let (engine, _) = engine_with(vec![
            new_rule(ThresholdKind::Above, 50_000),
            new_rule(ThresholdKind::Below, 60_000),
        ])
        .await;
        let start = Instant::now();

        let both = engine.evaluate_at(&tick("BTC-USD", 55_000), InstrumentId(1), start);
        let ids: Vec<_> = both.iter().map(|a| a.rule_id).collect();
        assert_eq!(ids, vec![RuleId(1), RuleId(2)]);

        // Only rule 2 matches now and it is still cooling down.
        let later = engine.evaluate_at(
            &tick("BTC-USD", 40_000),
            InstrumentId(1),
            start + Duration::from_secs(1),
        );
        assert!(later.is_empty());
    }

    #[tokio::test]
    async fn reload_swaps_snapshot_and_bumps_version() {
        let (engine, store) = engine_with(vec![new_rule(ThresholdKind::Above, 1)]).await;
        assert_eq!(engine.snapshot().version(), 1);

        store.insert(new_rule(ThresholdKind::Above, 2));
        let snapshot = engine.reload_rules().await.unwrap();

        assert_eq!(snapshot.version(), 2);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(engine.status().active_rules, 2);
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_snapshot() {
        let (engine, store) = engine_with(vec![new_rule(ThresholdKind::Above, 1)]).await;

        store.fail_with(Some(StoreError::Connection("database down".to_string())));
        assert!(engine.reload_rules().await.is_err());

        let status = engine.status();
        assert_eq!(status.snapshot_version, 1);
        assert_eq!(status.active_rules, 1);
        assert!(status.last_reload_error.unwrap().contains("database down"));

        store.fail_with(None);
        engine.reload_rules().await.unwrap();
        assert!(engine.status().last_reload_error.is_none());
    }

    #[tokio::test]
    async fn deleted_rule_stops_firing_after_reload() {
        let (engine, store) = engine_with(vec![new_rule(ThresholdKind::Above, 10)]).await;
        store.delete_rule(RuleId(1)).await.unwrap();
        engine.reload_rules().await.unwrap();

        assert!(engine.evaluate(&tick("BTC-USD", 100), InstrumentId(1)).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_evaluations_fire_once() {
        let (engine, _) = engine_with(vec![new_rule(ThresholdKind::Above, 10)]).await;
        let engine = Arc::new(engine);
        let now = Instant::now();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    engine
                        .evaluate_at(&tick("BTC-USD", 11), InstrumentId(1), now)
                        .len()
                })
            })
            .collect();

        let mut fired = 0;
        for handle in handles {
            fired += handle.await.unwrap();
        }
        assert_eq!(fired, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn evaluations_never_see_partial_snapshot() {
        let (engine, store) = engine_with(vec![]).await;
        let engine = Arc::new(engine);

        let reloader = {
            let engine = Arc::clone(&engine);
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for _ in 0..50 {
                    store.insert(new_rule(ThresholdKind::Above, 1));
                    store.insert(new_rule(ThresholdKind::Above, 1));
                    engine.reload_rules().await.unwrap();
                }
            })
        };

        for _ in 0..200 {
            let snapshot = engine.snapshot();
            // Rules are always added in pairs between reloads.
            assert_eq!(snapshot.len() % 2, 0);
            assert_eq!(snapshot.len() as u64, snapshot.version().saturating_sub(1) * 2);
            tokio::task::yield_now().await;
        }

        reloader.await.unwrap();
    }
}
