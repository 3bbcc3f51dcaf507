//! Feed Supervisor
//!
//! Keeps a feed session alive: connect, subscribe, read, and on failure back
//! off and start over. Lifecycle changes are reported as [`FeedEvent`]s.
//!
//! ```text
//! Connecting ──► Subscribed ──► (run) ──► Disconnected ──► Reconnecting ──┐
//!      ▲                                                                   │
//!      └───────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::backoff::{BackoffConfig, BackoffPolicy};
use super::client::{FeedClient, FeedError};
use crate::domain::market::Tick;
use crate::infrastructure::metrics;

/// Lifecycle events emitted by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Opening a connection.
    Connecting,
    /// Subscription acknowledged.
    Subscribed {
        /// Products subscribed to.
        products: Vec<String>,
    },
    /// Session ended.
    Disconnected {
        /// Why it ended.
        reason: String,
    },
    /// Waiting before the next attempt.
    Reconnecting {
        /// Attempt number since the last successful subscription.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Error frame received on a live session.
    Error(String),
    /// Supervisor exited.
    Stopped,
}

/// Restart loop around [`FeedClient`].
pub struct FeedSupervisor {
    client: FeedClient,
    products: BTreeSet<String>,
    backoff: BackoffConfig,
    ticks: mpsc::Sender<Tick>,
    events: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
}

impl FeedSupervisor {
    /// Create a supervisor.
    #[must_use]
    pub const fn new(
        client: FeedClient,
        products: BTreeSet<String>,
        backoff: BackoffConfig,
        ticks: mpsc::Sender<Tick>,
        events: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            products,
            backoff,
            ticks,
            events,
            cancel,
        }
    }

    /// Run until cancelled or a fatal error.
    ///
    /// Emits [`FeedEvent::Stopped`] on every exit path.
    ///
    /// # Errors
    ///
    /// - [`FeedError::Subscription`] if the very first subscription is
    ///   rejected
    /// - [`FeedError::MaxReconnectAttemptsExceeded`] when retries run out
    /// - [`FeedError::TickQueueClosed`] if the consumer went away
    pub async fn run(self) -> Result<(), FeedError> {
        let result = self.supervise().await;

        match &result {
            Ok(()) => tracing::info!("Feed supervisor stopped"),
            Err(e) => tracing::error!(error = %e, "Feed supervisor gave up"),
        }
        metrics::set_feed_connected(false);
        let _ = self.events.send(FeedEvent::Stopped).await;

        result
    }

    async fn supervise(&self) -> Result<(), FeedError> {
        let mut policy = BackoffPolicy::new(self.backoff.clone());
        let mut ever_subscribed = false;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let error = match self.session(&mut policy, &mut ever_subscribed).await {
                Ok(()) => return Ok(()),
                Err(FeedError::Subscription(message)) if !ever_subscribed => {
                    return Err(FeedError::Subscription(message));
                }
                Err(FeedError::TickQueueClosed) => return Err(FeedError::TickQueueClosed),
                Err(e) => e,
            };

            tracing::warn!(error = %error, "Price feed session ended");
            metrics::set_feed_connected(false);
            let _ = self
                .events
                .send(FeedEvent::Disconnected {
                    reason: error.to_string(),
                })
                .await;

            let Some(delay) = policy.next_delay() else {
                return Err(FeedError::MaxReconnectAttemptsExceeded(policy.attempt_count()));
            };
            let attempt = policy.attempt_count();

            metrics::record_reconnect();
            tracing::info!(attempt, delay_ms = delay.as_millis(), "Reconnecting to price feed");
            let _ = self
                .events
                .send(FeedEvent::Reconnecting { attempt, delay })
                .await;

            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One connect → subscribe → run cycle. `Ok` means cancelled.
    async fn session(
        &self,
        policy: &mut BackoffPolicy,
        ever_subscribed: &mut bool,
    ) -> Result<(), FeedError> {
        let _ = self.events.send(FeedEvent::Connecting).await;

        let mut connection = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            connection = self.client.connect() => connection?,
        };

        tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            subscribed = connection.subscribe(&self.products) => subscribed?,
        }

        *ever_subscribed = true;
        policy.reset();
        metrics::set_feed_connected(true);
        let _ = self
            .events
            .send(FeedEvent::Subscribed {
                products: self.products.iter().cloned().collect(),
            })
            .await;

        connection.run(&self.ticks, &self.events, &self.cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::coinbase::FeedStats;
    use std::sync::Arc;

    fn supervisor(
        max_attempts: u32,
        cancel: CancellationToken,
    ) -> (FeedSupervisor, mpsc::Receiver<FeedEvent>) {
        let client = FeedClient::new(
            "ws://127.0.0.1:1",
            Duration::from_secs(1),
            Arc::new(FeedStats::new()),
        );
        let (tick_tx, _tick_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = mpsc::channel(64);
        let backoff = BackoffConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter_factor: 0.0,
            max_attempts,
            ..BackoffConfig::default()
        };
        let products = BTreeSet::from(["BTC-USD".to_string()]);
        (
            FeedSupervisor::new(client, products, backoff, tick_tx, event_tx, cancel),
            event_rx,
        )
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let (supervisor, mut events) = supervisor(2, CancellationToken::new());

        let result = supervisor.run().await;
        assert!(matches!(result, Err(FeedError::MaxReconnectAttemptsExceeded(2))));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        let reconnects = seen
            .iter()
            .filter(|e| matches!(e, FeedEvent::Reconnecting { .. }))
            .count();
        assert_eq!(reconnects, 2);
        assert_eq!(seen.first(), Some(&FeedEvent::Connecting));
        assert_eq!(seen.last(), Some(&FeedEvent::Stopped));
    }

    #[tokio::test]
    async fn cancelled_supervisor_stops_cleanly() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (supervisor, mut events) = supervisor(0, cancel);

        assert!(supervisor.run().await.is_ok());
        assert_eq!(events.recv().await, Some(FeedEvent::Stopped));
    }
}
