//! Price Alert Service Binary
//!
//! Starts the feed, the alert pipeline, the REST/WebSocket API and the
//! health server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-alert-service
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `DATABASE_URL`: `PostgreSQL` connection string (unless `ALERTS_STORE=memory`)
//!
//! ## Optional
//! - `ALERTS_STORE`: postgres | memory (default: postgres)
//! - `COINBASE_WS_URL`: Feed endpoint (default: wss://advanced-trade-ws.coinbase.com)
//! - `ALERTS_PRODUCTS`: Comma-separated products (default: BTC-USD,ETH-USD)
//! - `ALERTS_HTTP_PORT`: REST API and WebSocket port (default: 8080)
//! - `ALERTS_HEALTH_PORT`: Health check and metrics port (default: 8082)
//! - `ALERTS_COOLDOWN_SECS`: Per-rule cooldown (default: 300)
//! - `ALERTS_RULE_RELOAD_SECS`: Rule reload interval (default: 30)
//! - `LOG_FORMAT`: json for structured logs
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use price_alert_service::application::ports::AlertPublisher;
use price_alert_service::application::services::{run_dispatcher, run_evaluator, run_rule_refresh};
use price_alert_service::infrastructure::coinbase::{
    BackoffConfig, FeedClient, FeedError, FeedEvent, FeedStats, FeedSupervisor,
};
use price_alert_service::infrastructure::config::StoreSettings;
use price_alert_service::infrastructure::health::FeedState;
use price_alert_service::infrastructure::telemetry;
use price_alert_service::{
    AlertEngine, AlertHub, AppState, HealthServer, HealthServerState, HttpServer, HubConfig,
    InMemoryRuleStore, InstrumentClassifier, PostgresRuleStore, ServiceConfig, SharedRuleStore,
    StoreBackend, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Feed lifecycle event queue capacity.
const FEED_EVENT_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Fails only if a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting price alert service");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus exporter unavailable");
    }

    let config = ServiceConfig::from_env().context("failed to load configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let mut tasks = JoinSet::new();

    // Rule store and engine
    let store = build_store(&config.store).await?;
    let classifier = build_classifier(&store).await?;

    let engine = Arc::new(AlertEngine::new(Arc::clone(&store), config.engine.cooldown));
    if let Ok(snapshot) = engine.reload_rules().await {
        tracing::info!(rules = snapshot.len(), "Initial rule snapshot loaded");
    }

    // Subscriber hub
    let (hub, hub_handle) = AlertHub::spawn(
        HubConfig {
            subscriber_buffer: config.queues.subscriber_buffer,
        },
        shutdown_token.clone(),
    );

    // Pipeline queues
    let (tick_tx, tick_rx) = mpsc::channel(config.queues.tick_capacity);
    let (alert_tx, alert_rx) = mpsc::channel(config.queues.alert_capacity);
    let (event_tx, event_rx) = mpsc::channel(FEED_EVENT_CAPACITY);

    // Price feed
    let feed_stats = Arc::new(FeedStats::new());
    let feed_state = Arc::new(FeedState::new(Arc::clone(&feed_stats)));
    let feed_client = FeedClient::new(config.feed.url.clone(), config.feed.idle_timeout, feed_stats);
    let supervisor = FeedSupervisor::new(
        feed_client,
        config.feed.products.clone(),
        BackoffConfig::from_feed_settings(&config.feed),
        tick_tx,
        event_tx,
        shutdown_token.clone(),
    );

    let feed_shutdown = shutdown_token.clone();
    let feed_task = tokio::spawn(async move {
        let result = supervisor.run().await;
        if matches!(result, Err(FeedError::Subscription(_))) {
            feed_shutdown.cancel();
        }
        result
    });

    tasks.spawn(handle_feed_events(event_rx, Arc::clone(&feed_state)));

    tasks.spawn(run_evaluator(
        tick_rx,
        classifier,
        Arc::clone(&engine),
        alert_tx,
        shutdown_token.clone(),
    ));

    let publisher: Arc<dyn AlertPublisher> = Arc::new(hub.clone());
    tasks.spawn(run_dispatcher(
        alert_rx,
        Arc::clone(&store),
        publisher,
        shutdown_token.clone(),
    ));

    tasks.spawn(run_rule_refresh(
        Arc::clone(&engine),
        config.engine.rule_reload_interval,
        shutdown_token.clone(),
    ));

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        feed_state,
        Arc::clone(&engine),
        hub.clone(),
        config.feed.stale_after,
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tasks.spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // REST API and WebSocket
    let http_server = HttpServer::new(
        config.server.http_port,
        AppState {
            store,
            engine,
            hub,
            default_owner: Arc::from(config.engine.default_owner.as_str()),
        },
        shutdown_token.clone(),
    );
    let http_shutdown = shutdown_token.clone();
    tasks.spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
            http_shutdown.cancel();
        }
    });

    tracing::info!("Price alert service ready");

    await_shutdown(shutdown_token.clone()).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        while tasks.join_next().await.is_some() {}
        let _ = hub_handle.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out, abandoning remaining tasks"
        );
    }

    match feed_task.await {
        Ok(Err(e @ FeedError::Subscription(_))) => {
            return Err(e).context("price feed rejected the subscription");
        }
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "Feed task panicked"),
    }

    tracing::info!("Price alert service stopped");
    Ok(())
}

/// Open the configured rule store.
async fn build_store(settings: &StoreSettings) -> anyhow::Result<SharedRuleStore> {
    match settings.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory rule store, rules are lost on restart");
            Ok(Arc::new(InMemoryRuleStore::new()))
        }
        StoreBackend::Postgres => {
            let url = settings
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres store")?;
            let store = PostgresRuleStore::connect(url, settings.max_connections)
                .await
                .context("failed to connect to PostgreSQL")?;
            store
                .migrate()
                .await
                .context("failed to run database migrations")?;
            Ok(Arc::new(store))
        }
    }
}

/// Map feed symbols to instruments using the store's catalogue.
async fn build_classifier(store: &SharedRuleStore) -> anyhow::Result<InstrumentClassifier> {
    let instruments = store
        .instruments()
        .await
        .context("failed to load the instrument catalogue")?;

    if instruments.is_empty() {
        tracing::warn!("Instrument catalogue is empty, using built-in symbols");
        return Ok(InstrumentClassifier::default());
    }

    Ok(InstrumentClassifier::from_catalogue(&instruments))
}

/// Fold feed lifecycle events into the health state.
async fn handle_feed_events(mut rx: mpsc::Receiver<FeedEvent>, feed_state: Arc<FeedState>) {
    while let Some(event) = rx.recv().await {
        feed_state.apply(&event);
        match &event {
            FeedEvent::Connecting => tracing::debug!("Price feed connecting"),
            FeedEvent::Subscribed { products } => {
                tracing::info!(products = ?products, "Price feed subscribed");
            }
            FeedEvent::Disconnected { reason } => {
                tracing::warn!(reason = %reason, "Price feed disconnected");
            }
            FeedEvent::Reconnecting { attempt, delay } => {
                tracing::info!(attempt, delay_ms = delay.as_millis(), "Price feed reconnecting");
            }
            FeedEvent::Error(message) => tracing::warn!(error = %message, "Price feed error"),
            FeedEvent::Stopped => tracing::info!("Price feed stopped"),
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        store = config.store.backend.as_str(),
        products = ?config.feed.products,
        http_port = config.server.http_port,
        health_port = config.server.health_port,
        cooldown_secs = config.engine.cooldown.as_secs(),
        rule_reload_secs = config.engine.rule_reload_interval.as_secs(),
        "Configuration loaded"
    );
    tracing::debug!(
        feed_url = %config.feed.url,
        idle_timeout_secs = config.feed.idle_timeout.as_secs(),
        tick_queue = config.queues.tick_capacity,
        alert_queue = config.queues.alert_capacity,
        subscriber_buffer = config.queues.subscriber_buffer,
        "Pipeline settings"
    );
}

/// Wait for SIGTERM, SIGINT, or an internal shutdown request.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Internal shutdown requested");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
