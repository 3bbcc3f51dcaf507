//! Domain Layer - Core alerting types and business rules.
//!
//! This layer contains the core domain types for threshold alerting
//! with no I/O. All types here are pure Rust with serialization support.

/// Market data types (ticks, instruments, symbol classification).
pub mod market;

/// Threshold rules and versioned rule snapshots.
pub mod rules;

/// Alert events and cooldown suppression.
pub mod alerts;
