//! Alert Publisher Port (Driven Port)
//!
//! Interface for handing triggered alerts to real-time subscribers.
//! Publishing never blocks and never reports delivery failures.

use crate::domain::alerts::Alert;

/// Port for publishing triggered alerts.
pub trait AlertPublisher: Send + Sync {
    /// Hand an alert over for fan-out.
    fn publish(&self, alert: Alert);
}

/// No-op publisher for testing.
#[derive(Debug, Clone, Default)]
pub struct NoOpAlertPublisher;

impl AlertPublisher for NoOpAlertPublisher {
    fn publish(&self, _alert: Alert) {}
}
