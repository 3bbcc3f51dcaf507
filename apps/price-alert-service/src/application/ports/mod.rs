//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `RuleStore`: Rules, the instrument catalogue and the triggered-alert log
//! - `AlertPublisher`: Fan-out of triggered alerts to subscribers

mod alert_publisher;
mod rule_store;

pub use alert_publisher::{AlertPublisher, NoOpAlertPublisher};
pub use rule_store::{RuleStore, SharedRuleStore, StoreError};
