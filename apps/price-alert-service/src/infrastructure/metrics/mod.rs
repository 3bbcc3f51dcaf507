//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Feed**: Ticks received, decode errors, reconnects, connection state
//! - **Evaluation**: Alerts fired and suppressed, rule reloads, latency
//! - **Distribution**: Broadcasts, deliveries, evictions, subscriber count
//! - **Persistence**: Failed alert writes
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling this again after a successful install returns the same handle.
///
/// # Errors
///
/// Returns `MetricsError::Install` if another global recorder is already
/// installed.
pub fn init_metrics() -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The Prometheus recorder could not be installed.
    #[error("failed to install Prometheus recorder: {0}")]
    Install(String),
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Feed
    describe_counter!(
        "price_alerts_ticks_received_total",
        "Total ticks decoded from the price feed"
    );
    describe_counter!(
        "price_alerts_ticks_unclassified_total",
        "Total ticks dropped because the symbol matched no instrument"
    );
    describe_counter!(
        "price_alerts_decode_errors_total",
        "Total feed frames that could not be decoded"
    );
    describe_counter!(
        "price_alerts_feed_errors_total",
        "Total error frames sent by the price feed"
    );
    describe_counter!(
        "price_alerts_reconnects_total",
        "Total price feed reconnection attempts"
    );
    describe_gauge!(
        "price_alerts_feed_connected",
        "1 when the price feed is subscribed, 0 otherwise"
    );

    // Evaluation
    describe_counter!(
        "price_alerts_alerts_fired_total",
        "Total alerts emitted by the evaluation engine"
    );
    describe_counter!(
        "price_alerts_alerts_suppressed_total",
        "Total rule matches suppressed by the cooldown"
    );
    describe_counter!(
        "price_alerts_rule_reloads_total",
        "Total rule snapshot reloads by outcome"
    );
    describe_gauge!(
        "price_alerts_active_rules",
        "Number of rules in the current snapshot"
    );
    describe_histogram!(
        "price_alerts_evaluation_seconds",
        "Time to evaluate one tick against the rule snapshot"
    );

    // Distribution
    describe_counter!(
        "price_alerts_hub_broadcasts_total",
        "Total alerts fanned out by the distribution hub"
    );
    describe_counter!(
        "price_alerts_hub_deliveries_total",
        "Total alert copies enqueued to subscribers"
    );
    describe_counter!(
        "price_alerts_hub_evictions_total",
        "Total subscribers evicted during broadcast"
    );
    describe_gauge!(
        "price_alerts_hub_subscribers",
        "Number of registered subscribers"
    );

    // Persistence
    describe_counter!(
        "price_alerts_persist_failures_total",
        "Total triggered alerts that could not be written to the store"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// Outcome label for rule reloads.
#[derive(Debug, Clone, Copy)]
pub enum ReloadOutcome {
    /// Snapshot replaced.
    Success,
    /// Store read failed; previous snapshot kept.
    Failure,
}

impl ReloadOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Reason label for subscriber evictions.
#[derive(Debug, Clone, Copy)]
pub enum EvictionReason {
    /// Outbound buffer was full.
    Full,
    /// Subscriber had gone away.
    Closed,
}

impl EvictionReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Closed => "closed",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a tick decoded from the feed.
pub fn record_tick_received(symbol: &str) {
    counter!(
        "price_alerts_ticks_received_total",
        "symbol" => symbol.to_string()
    )
    .increment(1);
}

/// Record a tick dropped by the classifier.
pub fn record_tick_unclassified() {
    counter!("price_alerts_ticks_unclassified_total").increment(1);
}

/// Record a frame that failed to decode.
pub fn record_decode_error() {
    counter!("price_alerts_decode_errors_total").increment(1);
}

/// Record an error frame from the feed.
pub fn record_feed_error() {
    counter!("price_alerts_feed_errors_total").increment(1);
}

/// Record a feed reconnection attempt.
pub fn record_reconnect() {
    counter!("price_alerts_reconnects_total").increment(1);
}

/// Update the feed connection gauge.
pub fn set_feed_connected(connected: bool) {
    gauge!("price_alerts_feed_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record an emitted alert.
pub fn record_alert_fired() {
    counter!("price_alerts_alerts_fired_total").increment(1);
}

/// Record a match suppressed by the cooldown.
pub fn record_alert_suppressed() {
    counter!("price_alerts_alerts_suppressed_total").increment(1);
}

/// Record a rule reload.
pub fn record_rule_reload(outcome: ReloadOutcome) {
    counter!(
        "price_alerts_rule_reloads_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Update the active rule gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_rules(count: usize) {
    gauge!("price_alerts_active_rules").set(count as f64);
}

/// Record tick evaluation duration.
pub fn record_evaluation_duration(duration: Duration) {
    histogram!("price_alerts_evaluation_seconds").record(duration.as_secs_f64());
}

/// Record one hub broadcast and the number of copies delivered.
pub fn record_hub_broadcast(deliveries: u64) {
    counter!("price_alerts_hub_broadcasts_total").increment(1);
    counter!("price_alerts_hub_deliveries_total").increment(deliveries);
}

/// Record a subscriber eviction.
pub fn record_hub_eviction(reason: EvictionReason) {
    counter!(
        "price_alerts_hub_evictions_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Update the subscriber gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_hub_subscribers(count: usize) {
    gauge!("price_alerts_hub_subscribers").set(count as f64);
}

/// Record a triggered alert that could not be persisted.
pub fn record_persist_failure() {
    counter!("price_alerts_persist_failures_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================
