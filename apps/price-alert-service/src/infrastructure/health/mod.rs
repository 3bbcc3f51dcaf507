//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, feed status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status (503 when unhealthy)
//! - `GET /healthz` - Liveness check (simple OK)
//! - `GET /readyz` - Readiness check (feed subscribed)
//! - `GET /metrics` - Prometheus metrics in text format
//!
//! # Status
//!
//! | Condition | Status |
//! |---|---|
//! | Feed supervisor stopped | `unhealthy` |
//! | Feed not subscribed, stale, or last rule reload failed | `degraded` |
//! | Otherwise | `healthy` |

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::AlertEngine;
use crate::infrastructure::coinbase::{FeedEvent, FeedStats};
use crate::infrastructure::hub::AlertHub;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Feed State
// =============================================================================

/// Connection state of the price feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedConnectionState {
    /// Opening a connection.
    Connecting,
    /// Subscribed and streaming.
    Connected,
    /// Session ended.
    Disconnected,
    /// Backing off before the next attempt.
    Reconnecting,
    /// Supervisor exited; no further attempts.
    Stopped,
}

impl FeedConnectionState {
    /// State name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Stopped => "stopped",
        }
    }
}

/// Feed connection state tracked from supervisor events.
#[derive(Debug)]
pub struct FeedState {
    state: parking_lot::RwLock<FeedConnectionState>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    error_message: parking_lot::RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    stats: Arc<FeedStats>,
}

impl FeedState {
    /// Create state backed by the connection's counters.
    #[must_use]
    pub fn new(stats: Arc<FeedStats>) -> Self {
        Self {
            state: parking_lot::RwLock::new(FeedConnectionState::Connecting),
            last_connected_at: parking_lot::RwLock::new(None),
            error_message: parking_lot::RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            stats,
        }
    }

    /// Fold one supervisor event into the state.
    pub fn apply(&self, event: &FeedEvent) {
        match event {
            FeedEvent::Connecting => self.set_state(FeedConnectionState::Connecting),
            FeedEvent::Subscribed { .. } => {
                self.set_state(FeedConnectionState::Connected);
                *self.last_connected_at.write() = Some(Utc::now());
                *self.error_message.write() = None;
                self.reconnect_attempts.store(0, Ordering::Relaxed);
            }
            FeedEvent::Disconnected { reason } => {
                self.set_state(FeedConnectionState::Disconnected);
                *self.error_message.write() = Some(reason.clone());
            }
            FeedEvent::Reconnecting { attempt, .. } => {
                self.set_state(FeedConnectionState::Reconnecting);
                self.reconnect_attempts.store(*attempt, Ordering::Relaxed);
            }
            FeedEvent::Error(message) => {
                *self.error_message.write() = Some(message.clone());
            }
            FeedEvent::Stopped => self.set_state(FeedConnectionState::Stopped),
        }
    }

    fn set_state(&self, state: FeedConnectionState) {
        *self.state.write() = state;
    }

    /// Current connection state.
    #[must_use]
    pub fn get_state(&self) -> FeedConnectionState {
        *self.state.read()
    }

    /// Last time a subscription was acknowledged.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// Most recent disconnect reason or feed error.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error_message.read().clone()
    }

    /// Reconnect attempts since the last subscription.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Connection counters.
    #[must_use]
    pub fn stats(&self) -> &FeedStats {
        &self.stats
    }
}

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Price feed status.
    pub feed: FeedInfo,
    /// Rule snapshot status.
    pub rules: RulesInfo,
    /// Subscriber hub status.
    pub subscribers: SubscribersInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Some systems degraded but functional.
    Degraded,
    /// Critical systems unavailable.
    Unhealthy,
}

/// Price feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Connection state.
    pub state: FeedConnectionState,
    /// Whether the feed is subscribed.
    pub connected: bool,
    /// No tick within the staleness threshold while connected.
    pub stale: bool,
    /// Ticks received.
    pub ticks_received: u64,
    /// Frames that failed to decode.
    pub decode_errors: u64,
    /// Current reconnect attempts (0 if connected).
    pub reconnect_attempts: u32,
    /// Last tick time.
    pub last_tick_at: Option<DateTime<Utc>>,
    /// Most recent disconnect reason or feed error.
    pub last_error: Option<String>,
}

/// Rule snapshot status.
#[derive(Debug, Clone, Serialize)]
pub struct RulesInfo {
    /// Snapshot version.
    pub snapshot_version: u64,
    /// Active rules in the snapshot.
    pub active_rules: usize,
    /// When the snapshot was built.
    pub loaded_at: DateTime<Utc>,
    /// Error from the most recent reload.
    pub last_reload_error: Option<String>,
}

/// Subscriber hub status.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribersInfo {
    /// Registered subscribers.
    pub current: usize,
    /// Alerts fanned out.
    pub broadcasts: u64,
    /// Copies delivered.
    pub deliveries: u64,
    /// Slow or closed subscribers evicted.
    pub evictions: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    feed: Arc<FeedState>,
    engine: Arc<AlertEngine>,
    hub: AlertHub,
    stale_after: Duration,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        feed: Arc<FeedState>,
        engine: Arc<AlertEngine>,
        hub: AlertHub,
        stale_after: Duration,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed,
            engine,
            hub,
            stale_after,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Routes served by the health server.
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state, Utc::now());
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.feed.get_state() == FeedConnectionState::Connected {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState, now: DateTime<Utc>) -> HealthResponse {
    let feed = feed_info(&state.feed, state.stale_after, now);

    let engine = state.engine.status();
    let rules = RulesInfo {
        snapshot_version: engine.snapshot_version,
        active_rules: engine.active_rules,
        loaded_at: engine.loaded_at,
        last_reload_error: engine.last_reload_error,
    };

    let hub = state.hub.stats();
    let subscribers = SubscribersInfo {
        current: hub.subscribers,
        broadcasts: hub.broadcasts,
        deliveries: hub.deliveries,
        evictions: hub.evictions,
    };

    HealthResponse {
        status: determine_health_status(&feed, &rules),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: now,
        feed,
        rules,
        subscribers,
    }
}

fn feed_info(feed: &FeedState, stale_after: Duration, now: DateTime<Utc>) -> FeedInfo {
    let state = feed.get_state();
    let connected = state == FeedConnectionState::Connected;
    let last_tick_at = feed.stats().last_tick_at();

    // A fresh subscription counts as activity until the first tick arrives.
    let last_activity = last_tick_at.max(feed.last_connected_at());
    let stale = connected
        && last_activity.is_some_and(|at| {
            (now - at).to_std().is_ok_and(|elapsed| elapsed > stale_after)
        });

    FeedInfo {
        state,
        connected,
        stale,
        ticks_received: feed.stats().ticks_received(),
        decode_errors: feed.stats().decode_errors(),
        reconnect_attempts: feed.reconnect_attempts(),
        last_tick_at,
        last_error: feed.error_message(),
    }
}

fn determine_health_status(feed: &FeedInfo, rules: &RulesInfo) -> HealthStatus {
    if feed.state == FeedConnectionState::Stopped {
        return HealthStatus::Unhealthy;
    }
    if !feed.connected || feed.stale || rules.last_reload_error.is_some() {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::hub::HubConfig;
    use crate::infrastructure::persistence::InMemoryRuleStore;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn feed_state() -> Arc<FeedState> {
        Arc::new(FeedState::new(Arc::new(FeedStats::new())))
    }

    fn rules(error: Option<&str>) -> RulesInfo {
        RulesInfo {
            snapshot_version: 1,
            active_rules: 0,
            loaded_at: Utc::now(),
            last_reload_error: error.map(String::from),
        }
    }

    fn server_state(feed: Arc<FeedState>) -> Arc<HealthServerState> {
        let engine = Arc::new(AlertEngine::new(
            Arc::new(InMemoryRuleStore::new()),
            Duration::from_secs(300),
        ));
        let (hub, _hub_loop) = AlertHub::new(HubConfig::default(), CancellationToken::new());
        Arc::new(HealthServerState::new(
            "test".to_string(),
            feed,
            engine,
            hub,
            Duration::from_secs(120),
        ))
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(serde_json::to_string(&HealthStatus::Healthy).unwrap(), "\"healthy\"");
        assert_eq!(serde_json::to_string(&HealthStatus::Degraded).unwrap(), "\"degraded\"");
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn feed_state_follows_supervisor_events() {
        let feed = feed_state();
        assert_eq!(feed.get_state(), FeedConnectionState::Connecting);

        feed.apply(&FeedEvent::Subscribed {
            products: vec!["BTC-USD".to_string()],
        });
        assert_eq!(feed.get_state(), FeedConnectionState::Connected);
        assert!(feed.last_connected_at().is_some());

        feed.apply(&FeedEvent::Disconnected {
            reason: "feed connection closed".to_string(),
        });
        feed.apply(&FeedEvent::Reconnecting {
            attempt: 3,
            delay: Duration::from_secs(2),
        });
        assert_eq!(feed.get_state(), FeedConnectionState::Reconnecting);
        assert_eq!(feed.reconnect_attempts(), 3);
        assert_eq!(feed.error_message().as_deref(), Some("feed connection closed"));

        feed.apply(&FeedEvent::Subscribed { products: vec![] });
        assert_eq!(feed.reconnect_attempts(), 0);
        assert!(feed.error_message().is_none());

        feed.apply(&FeedEvent::Stopped);
        assert_eq!(feed.get_state(), FeedConnectionState::Stopped);
    }

    #[test]
    fn status_reflects_feed_and_rules() {
        let feed = feed_state();
        let now = Utc::now();

        let info = feed_info(&feed, Duration::from_secs(120), now);
        assert_eq!(determine_health_status(&info, &rules(None)), HealthStatus::Degraded);

        feed.apply(&FeedEvent::Subscribed { products: vec![] });
        let info = feed_info(&feed, Duration::from_secs(120), now);
        assert_eq!(determine_health_status(&info, &rules(None)), HealthStatus::Healthy);
        assert_eq!(
            determine_health_status(&info, &rules(Some("connection refused"))),
            HealthStatus::Degraded
        );

        feed.apply(&FeedEvent::Stopped);
        let info = feed_info(&feed, Duration::from_secs(120), now);
        assert_eq!(determine_health_status(&info, &rules(None)), HealthStatus::Unhealthy);
    }

    #[test]
    fn connected_feed_goes_stale_without_ticks() {
        let feed = feed_state();
        feed.apply(&FeedEvent::Subscribed { products: vec![] });

        let later = Utc::now() + chrono::Duration::seconds(121);
        let info = feed_info(&feed, Duration::from_secs(120), later);
        assert!(info.stale);
        assert_eq!(determine_health_status(&info, &rules(None)), HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn readiness_tracks_subscription() {
        let feed = feed_state();
        let app = HealthServer::router(server_state(Arc::clone(&feed)));

        let response = app
            .clone()
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        feed.apply(&FeedEvent::Subscribed { products: vec![] });
        let response = app
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_endpoint_reports_unhealthy_when_stopped() {
        let feed = feed_state();
        feed.apply(&FeedEvent::Stopped);
        let app = HealthServer::router(server_state(feed));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["feed"]["state"], "stopped");
        assert_eq!(json["subscribers"]["current"], 0);
    }
}
