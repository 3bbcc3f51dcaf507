//! Configuration Module
//!
//! Environment-driven configuration for the alert service.

mod settings;

pub use settings::{
    ConfigError, EngineSettings, FeedSettings, QueueSettings, ServerSettings, ServiceConfig,
    StoreBackend, StoreSettings,
};
