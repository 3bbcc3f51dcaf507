//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `AlertEngine`: Rule snapshot, matching and cooldown suppression
//! - `pipeline`: Evaluator, dispatcher and rule refresh loops

mod alert_engine;
pub mod pipeline;

pub use alert_engine::{AlertEngine, EngineStatus};
pub use pipeline::{run_dispatcher, run_evaluator, run_rule_refresh};
