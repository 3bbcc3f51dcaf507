//! Rule Store Adapters
//!
//! - `PostgresRuleStore`: production store over `SQLx`
//! - `InMemoryRuleStore`: process-local store for local runs and tests

mod in_memory;
mod postgres;

pub use in_memory::{InMemoryRuleStore, TriggeredAlertRecord};
pub use postgres::PostgresRuleStore;
