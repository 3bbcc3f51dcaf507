//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Coinbase WebSocket price feed adapter.
pub mod coinbase;

/// Alert fan-out to WebSocket subscribers.
pub mod hub;

/// Rule store adapters (`PostgreSQL`, in-memory).
pub mod persistence;

/// REST API and WebSocket endpoint.
pub mod http;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
