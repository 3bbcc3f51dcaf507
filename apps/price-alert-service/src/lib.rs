#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Price Alert Service - Threshold Alerts over a Live Price Feed
//!
//! Streams last-trade prices from Coinbase, evaluates user-defined
//! above/below threshold rules against every tick, suppresses repeats with a
//! per-rule cooldown, records triggered alerts and pushes them to every
//! connected WebSocket client.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and rules
//!   - `market`: Ticks, instruments, symbol classification
//!   - `rules`: Threshold rules and immutable rule snapshots
//!   - `alerts`: Alert events and the cooldown ledger
//!
//! - **Application**: Ports and services
//!   - `ports`: Rule store and alert publisher contracts
//!   - `services`: Evaluation engine and pipeline loops
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `coinbase`: Feed session, codec and reconnect supervisor
//!   - `hub`: Subscriber registry and best-effort fan-out
//!   - `persistence`: `PostgreSQL` and in-memory rule stores
//!   - `http`: REST API and WebSocket endpoint
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                      tick queue              alert queue
//! Coinbase WS ──► FeedSupervisor ──► evaluator ──► dispatcher ──┬──► AlertHub ──► WS client 1
//!                                       │                        │              └─► WS client N
//!                                  AlertEngine                   └──► RuleStore (triggered_alerts)
//!                                       ▲
//!                   rule refresh ───────┘◄──── REST mutations
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core alerting types with no I/O.
pub mod domain;

/// Application layer - Services and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::alerts::{Alert, CooldownLedger, DEFAULT_COOLDOWN};
pub use domain::market::{Instrument, InstrumentClassifier, InstrumentId, Tick};
pub use domain::rules::{NewRule, Rule, RuleId, RuleSnapshot, ThresholdKind};

// Ports and services
pub use application::ports::{AlertPublisher, RuleStore, SharedRuleStore, StoreError};
pub use application::services::{AlertEngine, EngineStatus};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ServiceConfig, StoreBackend};

// Hub
pub use infrastructure::hub::{AlertHub, HubConfig, HubStats, SubscriberHandle};

// Persistence
pub use infrastructure::persistence::{InMemoryRuleStore, PostgresRuleStore};

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::http::{AppState, HttpServer, create_router};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
