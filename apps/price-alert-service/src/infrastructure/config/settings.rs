//! Service Configuration Settings
//!
//! Configuration types for the alert service, loaded from environment
//! variables. Every variable has a default except `DATABASE_URL`, which is
//! only required for the Postgres store.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use crate::infrastructure::coinbase::{DEFAULT_FEED_URL, DEFAULT_IDLE_TIMEOUT};
use crate::infrastructure::hub::DEFAULT_SUBSCRIBER_BUFFER;

/// Rule store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    /// `PostgreSQL` via sqlx.
    #[default]
    Postgres,
    /// Process-local store seeded with the default instruments.
    Memory,
}

impl StoreBackend {
    /// Backend name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Memory => "memory",
        }
    }
}

impl FromStr for StoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" | "in-memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

/// Rule store settings.
#[derive(Clone)]
pub struct StoreSettings {
    /// Selected backend.
    pub backend: StoreBackend,
    /// Connection string, required for Postgres.
    pub database_url: Option<String>,
    /// Pool size.
    pub max_connections: u32,
}

impl std::fmt::Debug for StoreSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSettings")
            .field("backend", &self.backend)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            database_url: None,
            max_connections: 5,
        }
    }
}

/// Price feed settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// WebSocket endpoint.
    pub url: String,
    /// Products to subscribe to.
    pub products: BTreeSet<String>,
    /// Read idle timeout before the session is dropped.
    pub idle_timeout: Duration,
    /// No tick for this long marks the feed as stale in health.
    pub stale_after: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_string(),
            products: ["BTC-USD", "ETH-USD"].into_iter().map(String::from).collect(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            stale_after: Duration::from_secs(120),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0,
        }
    }
}

/// Rule evaluation settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Per-rule cooldown window.
    pub cooldown: Duration,
    /// Periodic rule reload interval.
    pub rule_reload_interval: Duration,
    /// Owner used when a request does not name one.
    pub default_owner: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(300),
            rule_reload_interval: Duration::from_secs(30),
            default_owner: "demo-user".to_string(),
        }
    }
}

/// Queue capacities.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Feed → evaluator.
    pub tick_capacity: usize,
    /// Evaluator → dispatcher.
    pub alert_capacity: usize,
    /// Per-subscriber outbound queue.
    pub subscriber_buffer: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            tick_capacity: 100,
            alert_capacity: 100,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// REST API and WebSocket port.
    pub http_port: u16,
    /// Health check and metrics port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 8080,
            health_port: 8082,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Rule store settings.
    pub store: StoreSettings,
    /// Price feed settings.
    pub feed: FeedSettings,
    /// Rule evaluation settings.
    pub engine: EngineSettings,
    /// Queue capacities.
    pub queues: QueueSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value does
    /// not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value does
    /// not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();

        let backend = match env.get("ALERTS_STORE") {
            Some(value) => value.parse().map_err(|()| ConfigError::invalid("ALERTS_STORE", &value))?,
            None => defaults.store.backend,
        };
        let database_url = env.get("DATABASE_URL");
        if backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingEnvVar("DATABASE_URL".to_string()));
        }
        let store = StoreSettings {
            backend,
            database_url,
            max_connections: env.positive("DATABASE_MAX_CONNECTIONS", defaults.store.max_connections)?,
        };

        let products = match env.get("ALERTS_PRODUCTS") {
            Some(value) => {
                let products: BTreeSet<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_uppercase)
                    .collect();
                if products.is_empty() {
                    return Err(ConfigError::EmptyValue("ALERTS_PRODUCTS".to_string()));
                }
                products
            }
            None => defaults.feed.products,
        };

        let feed = FeedSettings {
            url: env.get("COINBASE_WS_URL").unwrap_or(defaults.feed.url),
            products,
            idle_timeout: env.secs("ALERTS_FEED_IDLE_TIMEOUT_SECS", defaults.feed.idle_timeout)?,
            stale_after: env.secs("ALERTS_FEED_STALE_SECS", defaults.feed.stale_after)?,
            reconnect_delay_initial: env.millis(
                "ALERTS_RECONNECT_DELAY_INITIAL_MS",
                defaults.feed.reconnect_delay_initial,
            )?,
            reconnect_delay_max: env.secs(
                "ALERTS_RECONNECT_DELAY_MAX_SECS",
                defaults.feed.reconnect_delay_max,
            )?,
            reconnect_delay_multiplier: env.parse(
                "ALERTS_RECONNECT_DELAY_MULTIPLIER",
                defaults.feed.reconnect_delay_multiplier,
            )?,
            max_reconnect_attempts: env.parse(
                "ALERTS_MAX_RECONNECT_ATTEMPTS",
                defaults.feed.max_reconnect_attempts,
            )?,
        };

        let engine = EngineSettings {
            cooldown: env.secs("ALERTS_COOLDOWN_SECS", defaults.engine.cooldown)?,
            rule_reload_interval: env.secs(
                "ALERTS_RULE_RELOAD_SECS",
                defaults.engine.rule_reload_interval,
            )?,
            default_owner: env
                .get("ALERTS_DEFAULT_OWNER")
                .unwrap_or(defaults.engine.default_owner),
        };
        if engine.rule_reload_interval.is_zero() {
            return Err(ConfigError::invalid("ALERTS_RULE_RELOAD_SECS", "0"));
        }

        let queues = QueueSettings {
            tick_capacity: env.positive("ALERTS_TICK_QUEUE_CAPACITY", defaults.queues.tick_capacity)?,
            alert_capacity: env.positive("ALERTS_ALERT_QUEUE_CAPACITY", defaults.queues.alert_capacity)?,
            subscriber_buffer: env.positive(
                "ALERTS_SUBSCRIBER_BUFFER",
                defaults.queues.subscriber_buffer,
            )?,
        };

        let server = ServerSettings {
            http_port: env.parse("ALERTS_HTTP_PORT", defaults.server.http_port)?,
            health_port: env.parse("ALERTS_HEALTH_PORT", defaults.server.health_port)?,
        };

        Ok(Self {
            store,
            feed,
            engine,
            queues,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable does not parse.
    #[error("invalid value for {key}: {value:?}")]
    Invalid {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str) -> Self {
        Self::Invalid {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Variable lookup where blank values count as unset.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        self.get(key).map_or(Ok(default), |value| {
            value.parse().map_err(|_| ConfigError::invalid(key, &value))
        })
    }

    fn positive<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialEq + Default,
    {
        let value = self.parse(key, default)?;
        if value == T::default() {
            return Err(ConfigError::invalid(key, "0"));
        }
        Ok(value)
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.get(key).map_or(Ok(default), |value| {
            value
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::invalid(key, &value))
        })
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.get(key).map_or(Ok(default), |value| {
            value
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::invalid(key, &value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn memory_store_needs_no_database() {
        let config = config(&[("ALERTS_STORE", "memory")]).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(config.store.database_url.is_none());
    }

    #[test]
    fn postgres_requires_database_url() {
        let err = config(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "DATABASE_URL"));
    }

    #[test]
    fn defaults_apply() {
        let config = config(&[("DATABASE_URL", "postgres://localhost/alerts")]).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Postgres);
        assert_eq!(config.store.max_connections, 5);
        assert_eq!(config.feed.url, "wss://advanced-trade-ws.coinbase.com");
        assert_eq!(
            config.feed.products.iter().collect::<Vec<_>>(),
            vec!["BTC-USD", "ETH-USD"]
        );
        assert_eq!(config.engine.cooldown, Duration::from_secs(300));
        assert_eq!(config.engine.rule_reload_interval, Duration::from_secs(30));
        assert_eq!(config.engine.default_owner, "demo-user");
        assert_eq!(config.queues.tick_capacity, 100);
        assert_eq!(config.queues.subscriber_buffer, 256);
        assert_eq!(config.server.http_port, 8080);
        assert_eq!(config.server.health_port, 8082);
        assert_eq!(config.feed.reconnect_delay_initial, Duration::from_millis(500));
    }

    #[test]
    fn overrides_apply() {
        let config = config(&[
            ("ALERTS_STORE", "MEMORY"),
            ("ALERTS_PRODUCTS", " sol-usd, BTC-USD ,,"),
            ("ALERTS_COOLDOWN_SECS", "60"),
            ("ALERTS_HTTP_PORT", "9000"),
            ("ALERTS_RECONNECT_DELAY_MULTIPLIER", "1.5"),
            ("ALERTS_DEFAULT_OWNER", "alice"),
        ])
        .unwrap();

        assert_eq!(
            config.feed.products.iter().collect::<Vec<_>>(),
            vec!["BTC-USD", "SOL-USD"]
        );
        assert_eq!(config.engine.cooldown, Duration::from_secs(60));
        assert_eq!(config.server.http_port, 9000);
        assert!((config.feed.reconnect_delay_multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.engine.default_owner, "alice");
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = config(&[("ALERTS_STORE", "memory"), ("ALERTS_HTTP_PORT", "  ")]).unwrap();
        assert_eq!(config.server.http_port, 8080);
    }

    #[test]
    fn rejects_unparsable_values() {
        let err = config(&[("ALERTS_STORE", "memory"), ("ALERTS_HTTP_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == "ALERTS_HTTP_PORT"));

        let err = config(&[("ALERTS_STORE", "sqlite")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == "ALERTS_STORE"));
    }

    #[test]
    fn rejects_zero_capacities() {
        let err = config(&[("ALERTS_STORE", "memory"), ("ALERTS_TICK_QUEUE_CAPACITY", "0")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == "ALERTS_TICK_QUEUE_CAPACITY"));
    }

    #[test]
    fn rejects_empty_product_list() {
        let err = config(&[("ALERTS_STORE", "memory"), ("ALERTS_PRODUCTS", ", ,")]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(key) if key == "ALERTS_PRODUCTS"));
    }

    #[test]
    fn database_url_redacted_in_debug() {
        let config = config(&[("DATABASE_URL", "postgres://user:hunter2@db/alerts")]).unwrap();
        let debug = format!("{:?}", config.store);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
