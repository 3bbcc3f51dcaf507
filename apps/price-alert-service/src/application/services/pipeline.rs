//! Alert Pipeline
//!
//! Long-running loops that wire the feed to the engine and the engine to
//! its consumers:
//!
//! ```text
//! tick queue ──► run_evaluator ──► alert queue ──► run_dispatcher ──┬──► publisher
//!                  (classify,                                         └──► rule store
//!                   evaluate)
//!
//! run_rule_refresh ──► AlertEngine::reload_rules (every interval)
//! ```
//!
//! Each loop stops when its cancellation token fires or its input queue
//! closes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::alert_engine::AlertEngine;
use crate::application::ports::{AlertPublisher, SharedRuleStore};
use crate::domain::alerts::Alert;
use crate::domain::market::{InstrumentClassifier, Tick};
use crate::infrastructure::metrics;

/// Classify and evaluate ticks, forwarding triggered alerts.
pub async fn run_evaluator(
    mut ticks: mpsc::Receiver<Tick>,
    classifier: InstrumentClassifier,
    engine: Arc<AlertEngine>,
    alerts: mpsc::Sender<Alert>,
    cancel: CancellationToken,
) {
    loop {
        let tick = tokio::select! {
            () = cancel.cancelled() => break,
            tick = ticks.recv() => match tick {
                Some(tick) => tick,
                None => break,
            },
        };

        let Some(instrument_id) = classifier.classify(&tick.symbol) else {
            metrics::record_tick_unclassified();
            tracing::trace!(symbol = %tick.symbol, "Dropping tick for unknown instrument");
            continue;
        };

        let started = Instant::now();
        let fired = engine.evaluate(&tick, instrument_id);
        metrics::record_evaluation_duration(started.elapsed());

        for alert in fired {
            tracing::info!(
                rule_id = %alert.rule_id,
                symbol = %alert.symbol,
                price = %alert.price,
                threshold = %alert.threshold,
                kind = %alert.threshold_kind,
                "Alert triggered"
            );

            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Evaluator stopped");
                    return;
                }
                sent = alerts.send(alert) => {
                    if sent.is_err() {
                        tracing::warn!("Alert queue closed, stopping evaluator");
                        return;
                    }
                }
            }
        }
    }

    tracing::info!("Evaluator stopped");
}

/// Publish each alert and append it to the alert log.
///
/// The alert is handed to the publisher first; the store write runs on its
/// own task so a slow or failing store never delays fan-out. Pending writes
/// are awaited before returning.
pub async fn run_dispatcher(
    mut alerts: mpsc::Receiver<Alert>,
    store: SharedRuleStore,
    publisher: Arc<dyn AlertPublisher>,
    cancel: CancellationToken,
) {
    let mut writes = JoinSet::new();

    loop {
        let alert = tokio::select! {
            () = cancel.cancelled() => break,
            alert = alerts.recv() => match alert {
                Some(alert) => alert,
                None => break,
            },
        };

        let (rule_id, price) = (alert.rule_id, alert.price);
        publisher.publish(alert);

        let store = Arc::clone(&store);
        writes.spawn(async move {
            if let Err(e) = store.save_triggered_alert(rule_id, price).await {
                metrics::record_persist_failure();
                tracing::warn!(error = %e, rule_id = %rule_id, "Failed to persist triggered alert");
            }
        });

        while writes.try_join_next().is_some() {}
    }

    while writes.join_next().await.is_some() {}
    tracing::info!("Dispatcher stopped");
}

/// Reload the rule snapshot every `interval`.
///
/// The first reload happens one interval after start; the caller is
/// expected to have loaded the initial snapshot already.
pub async fn run_rule_refresh(
    engine: Arc<AlertEngine>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                // Failures are logged by the engine and the old snapshot stays.
                let _ = engine.reload_rules().await;
            }
        }
    }

    tracing::info!("Rule refresh stopped");
}

// =============================================================================
// Tests
// =============================================================================
