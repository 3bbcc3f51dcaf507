//! Alert Distribution Hub
//!
//! Fans triggered alerts out to every live subscriber.
//!
//! # Architecture
//!
//! A single control loop ([`HubLoop`]) owns the subscriber map. Every
//! operation reaches it through one unbounded command queue, so
//! registration, removal and fan-out are applied strictly in arrival order:
//!
//! ```text
//! register ───┐
//! unregister ─┼──► command queue ──► HubLoop ──► subscriber 1 (bounded queue)
//! broadcast ──┘                         │    ──► subscriber 2
//!                                       └─── ──► subscriber N
//! ```
//!
//! Each alert is serialized once and offered to every subscriber with
//! `try_send`. A subscriber whose queue is full or whose receiver is gone is
//! evicted in the same pass. Delivery is at-most-once; nothing is retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::ports::AlertPublisher;
use crate::domain::alerts::Alert;
use crate::infrastructure::metrics::{self, EvictionReason};

/// Unique identifier for a subscriber.
pub type SubscriberId = Uuid;

/// Default per-subscriber outbound queue capacity.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

// =============================================================================
// Configuration
// =============================================================================

/// Hub configuration.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// Capacity of each subscriber's outbound queue.
    pub subscriber_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

/// Hub errors.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Alert could not be serialized.
    #[error("failed to serialize alert: {0}")]
    Serialize(#[from] serde_json::Error),
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct HubCounters {
    subscribers: AtomicUsize,
    broadcasts: AtomicU64,
    deliveries: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time hub statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Currently registered subscribers.
    pub subscribers: usize,
    /// Alerts fanned out.
    pub broadcasts: u64,
    /// Alert copies enqueued to subscribers.
    pub deliveries: u64,
    /// Subscribers evicted during fan-out.
    pub evictions: u64,
}

// =============================================================================
// Subscriber Handle
// =============================================================================

/// Receiving side of one subscriber.
///
/// Messages are alerts already serialized to JSON. The stream ends when the
/// subscriber is unregistered, evicted, or the hub stops.
#[derive(Debug)]
pub struct SubscriberHandle {
    id: SubscriberId,
    receiver: mpsc::Receiver<Arc<str>>,
}

impl SubscriberHandle {
    /// Subscriber id.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next serialized alert.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.receiver.recv().await
    }

    /// Take a serialized alert if one is queued.
    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        self.receiver.try_recv().ok()
    }
}

// =============================================================================
// Hub Handle
// =============================================================================

enum HubCommand {
    Register {
        id: SubscriberId,
        sender: mpsc::Sender<Arc<str>>,
    },
    Unregister {
        id: SubscriberId,
    },
    Broadcast(Alert),
}

/// Cloneable handle to the hub control loop.
#[derive(Clone)]
pub struct AlertHub {
    commands: mpsc::UnboundedSender<HubCommand>,
    counters: Arc<HubCounters>,
    config: HubConfig,
}

impl AlertHub {
    /// Create a hub handle and the control loop that serves it.
    ///
    /// The loop must be driven with [`HubLoop::run`].
    #[must_use]
    pub fn new(config: HubConfig, cancel: CancellationToken) -> (Self, HubLoop) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(HubCounters::default());

        let hub = Self {
            commands,
            counters: Arc::clone(&counters),
            config,
        };
        let control = HubLoop {
            commands: receiver,
            subscribers: HashMap::new(),
            counters,
            cancel,
        };
        (hub, control)
    }

    /// Create a hub and spawn its control loop on the current runtime.
    #[must_use]
    pub fn spawn(config: HubConfig, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (hub, control) = Self::new(config, cancel);
        (hub, tokio::spawn(control.run()))
    }

    /// Register a new subscriber.
    ///
    /// Every broadcast enqueued after this call returns is offered to the
    /// subscriber. If the hub has stopped the handle's stream is already
    /// closed.
    #[must_use]
    pub fn register(&self) -> SubscriberHandle {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(self.config.subscriber_buffer.max(1));
        if self
            .commands
            .send(HubCommand::Register { id, sender })
            .is_err()
        {
            tracing::debug!(subscriber_id = %id, "Hub stopped, subscriber not registered");
        }
        SubscriberHandle { id, receiver }
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unregister(&self, id: SubscriberId) {
        let _ = self.commands.send(HubCommand::Unregister { id });
    }

    /// Enqueue an alert for fan-out.
    pub fn broadcast(&self, alert: Alert) {
        if self.commands.send(HubCommand::Broadcast(alert)).is_err() {
            tracing::debug!("Hub stopped, alert not broadcast");
        }
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            subscribers: self.counters.subscribers.load(Ordering::Relaxed),
            broadcasts: self.counters.broadcasts.load(Ordering::Relaxed),
            deliveries: self.counters.deliveries.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}

impl AlertPublisher for AlertHub {
    fn publish(&self, alert: Alert) {
        self.broadcast(alert);
    }
}

// =============================================================================
// Control Loop
// =============================================================================

/// The hub control loop. Sole owner of the subscriber map.
pub struct HubLoop {
    commands: mpsc::UnboundedReceiver<HubCommand>,
    subscribers: HashMap<SubscriberId, mpsc::Sender<Arc<str>>>,
    counters: Arc<HubCounters>,
    cancel: CancellationToken,
}

impl HubLoop {
    /// Process commands until cancelled or every hub handle is dropped.
    ///
    /// All subscriber streams are closed on exit.
    pub async fn run(mut self) {
        tracing::debug!("Hub control loop started");

        loop {
            let command = tokio::select! {
                () = self.cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                HubCommand::Register { id, sender } => {
                    self.subscribers.insert(id, sender);
                    tracing::debug!(subscriber_id = %id, "Subscriber registered");
                }
                HubCommand::Unregister { id } => {
                    if self.subscribers.remove(&id).is_some() {
                        tracing::debug!(subscriber_id = %id, "Subscriber unregistered");
                    }
                }
                HubCommand::Broadcast(alert) => self.fan_out(&alert),
            }
            self.publish_subscriber_count();
        }

        self.subscribers.clear();
        self.publish_subscriber_count();
        tracing::info!("Hub control loop stopped");
    }

    fn fan_out(&mut self, alert: &Alert) {
        let payload = match encode(alert) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, rule_id = %alert.rule_id, "Dropping alert");
                return;
            }
        };

        let mut delivered = 0_u64;
        let mut evicted = Vec::new();

        for (id, sender) in &self.subscribers {
            match sender.try_send(Arc::clone(&payload)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => evicted.push((*id, EvictionReason::Full)),
                Err(TrySendError::Closed(_)) => evicted.push((*id, EvictionReason::Closed)),
            }
        }

        for (id, reason) in evicted {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            metrics::record_hub_eviction(reason);
            tracing::debug!(subscriber_id = %id, ?reason, "Evicting subscriber");
            self.subscribers.remove(&id);
        }

        self.counters.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.counters
            .deliveries
            .fetch_add(delivered, Ordering::Relaxed);
        metrics::record_hub_broadcast(delivered);
    }

    fn publish_subscriber_count(&self) {
        let count = self.subscribers.len();
        self.counters.subscribers.store(count, Ordering::Relaxed);
        metrics::set_hub_subscribers(count);
    }
}

fn encode(alert: &Alert) -> Result<Arc<str>, HubError> {
    Ok(Arc::from(serde_json::to_string(alert)?))
}

// =============================================================================
// Tests
// =============================================================================
