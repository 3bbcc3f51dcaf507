//! Coinbase Feed Connection
//!
//! One WebSocket session against the Advanced Trade feed. A [`FeedClient`]
//! opens sessions; a [`FeedConnection`] is subscribed once and then consumed
//! by [`FeedConnection::run`]. Sessions never reconnect on their own, that is
//! the supervisor's job.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::{FeedCodec, FeedMessage};
use super::messages::SubscribeRequest;
use super::supervisor::FeedEvent;
use crate::domain::market::Tick;
use crate::infrastructure::metrics;

/// Default Coinbase Advanced Trade WebSocket endpoint.
pub const DEFAULT_FEED_URL: &str = "wss://advanced-trade-ws.coinbase.com";

/// Default read idle timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

type FeedStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Error Type
// =============================================================================

/// Errors from the feed connection and its supervisor.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Could not open the WebSocket.
    #[error("feed connection failed: {0}")]
    Connection(String),

    /// The server rejected the subscription.
    #[error("subscription rejected: {0}")]
    Subscription(String),

    /// The server closed the stream.
    #[error("feed connection closed")]
    ConnectionClosed,

    /// Nothing arrived within the idle timeout.
    #[error("no frame received for {0:?}")]
    IdleTimeout(Duration),

    /// Transport failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// An outbound request could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    /// The tick consumer has gone away.
    #[error("tick queue closed")]
    TickQueueClosed,

    /// The supervisor ran out of reconnect attempts.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

// =============================================================================
// Feed Statistics
// =============================================================================

/// Counters shared between the connection and the health surface.
#[derive(Debug, Default)]
pub struct FeedStats {
    ticks_received: AtomicU64,
    decode_errors: AtomicU64,
    feed_errors: AtomicU64,
    last_tick_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
}

impl FeedStats {
    /// Create zeroed stats.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record_tick(&self, at: DateTime<Utc>) {
        self.ticks_received.fetch_add(1, Ordering::Relaxed);
        *self.last_tick_at.write() = Some(at);
    }

    fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_feed_error(&self) {
        self.feed_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Ticks pushed onto the tick queue.
    #[must_use]
    pub fn ticks_received(&self) -> u64 {
        self.ticks_received.load(Ordering::Relaxed)
    }

    /// Frames that failed to decode.
    #[must_use]
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    /// Error frames received after subscribing.
    #[must_use]
    pub fn feed_errors(&self) -> u64 {
        self.feed_errors.load(Ordering::Relaxed)
    }

    /// Wall-clock time the last tick was received.
    #[must_use]
    pub fn last_tick_at(&self) -> Option<DateTime<Utc>> {
        *self.last_tick_at.read()
    }
}

// =============================================================================
// Feed Client
// =============================================================================

/// Opens feed sessions.
#[derive(Debug, Clone)]
pub struct FeedClient {
    url: String,
    idle_timeout: Duration,
    stats: Arc<FeedStats>,
}

impl FeedClient {
    /// Create a client for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>, idle_timeout: Duration, stats: Arc<FeedStats>) -> Self {
        Self {
            url: url.into(),
            idle_timeout,
            stats,
        }
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<FeedStats> {
        Arc::clone(&self.stats)
    }

    /// Open a WebSocket session.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Connection`] if the handshake fails.
    pub async fn connect(&self) -> Result<FeedConnection, FeedError> {
        tracing::info!(url = %self.url, "Connecting to price feed");

        let (stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| FeedError::Connection(e.to_string()))?;

        Ok(FeedConnection {
            stream,
            codec: FeedCodec::new(),
            idle_timeout: self.idle_timeout,
            stats: Arc::clone(&self.stats),
            pending: VecDeque::new(),
        })
    }
}

// =============================================================================
// Feed Connection
// =============================================================================

/// An open feed session.
pub struct FeedConnection {
    stream: FeedStream,
    codec: FeedCodec,
    idle_timeout: Duration,
    stats: Arc<FeedStats>,
    /// Frames that arrived while waiting for the subscription ack.
    pending: VecDeque<Utf8Bytes>,
}

impl FeedConnection {
    /// Subscribe to the ticker channel for `products` and wait for the ack.
    ///
    /// A heartbeats subscription is sent alongside so quiet markets do not
    /// trip the idle timeout. Ticker frames that race ahead of the ack are
    /// kept and replayed by [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// - [`FeedError::Subscription`] if `products` is empty or the server
    ///   answers with an error frame
    /// - [`FeedError::IdleTimeout`] if no ack arrives in time
    /// - [`FeedError::ConnectionClosed`] / [`FeedError::WebSocket`] on
    ///   transport failure
    pub async fn subscribe(&mut self, products: &BTreeSet<String>) -> Result<(), FeedError> {
        if products.is_empty() {
            return Err(FeedError::Subscription("no products requested".to_string()));
        }

        tracing::debug!(products = ?products, "Sending subscribe request");
        for request in [SubscribeRequest::ticker(products), SubscribeRequest::heartbeats()] {
            let json = request.to_json()?;
            self.stream.send(Message::Text(json.into())).await?;
        }

        let deadline = tokio::time::Instant::now() + self.idle_timeout;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.stream.next())
                .await
                .map_err(|_| FeedError::IdleTimeout(self.idle_timeout))?;

            match frame {
                Some(Ok(Message::Text(text))) => match self.codec.decode(&text) {
                    Ok(FeedMessage::Subscriptions(subs)) => {
                        tracing::info!(subscriptions = ?subs, "Subscription confirmed");
                        return Ok(());
                    }
                    Ok(FeedMessage::Error(message)) => {
                        return Err(FeedError::Subscription(message));
                    }
                    _ => self.pending.push_back(text),
                },
                Some(Ok(Message::Ping(data))) => self.stream.send(Message::Pong(data)).await?,
                Some(Ok(Message::Close(_))) | None => return Err(FeedError::ConnectionClosed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Read until cancelled or the session fails, pushing every tick onto
    /// `ticks`.
    ///
    /// A full tick queue suspends reading. Returns `Ok(())` only on
    /// cancellation.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the session.
    pub async fn run(
        mut self,
        ticks: &mpsc::Sender<Tick>,
        events: &mpsc::Sender<FeedEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), FeedError> {
        while let Some(text) = self.pending.pop_front() {
            self.handle_text(&text, ticks, events, cancel).await?;
        }

        loop {
            let frame = tokio::select! {
                () = cancel.cancelled() => {
                    let _ = self.stream.close(None).await;
                    return Ok(());
                }
                frame = tokio::time::timeout(self.idle_timeout, self.stream.next()) => frame,
            };

            match frame {
                Err(_) => {
                    tracing::warn!(timeout = ?self.idle_timeout, "Price feed went idle");
                    return Err(FeedError::IdleTimeout(self.idle_timeout));
                }
                Ok(Some(Ok(Message::Text(text)))) => {
                    self.handle_text(&text, ticks, events, cancel).await?;
                }
                Ok(Some(Ok(Message::Ping(data)))) => {
                    self.stream.send(Message::Pong(data)).await?;
                }
                Ok(Some(Ok(Message::Close(frame)))) => {
                    tracing::info!(frame = ?frame, "Price feed sent close frame");
                    return Err(FeedError::ConnectionClosed);
                }
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(None) => {
                    tracing::info!("Price feed stream ended");
                    return Err(FeedError::ConnectionClosed);
                }
            }
        }
    }

    async fn handle_text(
        &self,
        text: &str,
        ticks: &mpsc::Sender<Tick>,
        events: &mpsc::Sender<FeedEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), FeedError> {
        let message = match self.codec.decode(text) {
            Ok(message) => message,
            Err(e) => {
                self.stats.record_decode_error();
                metrics::record_decode_error();
                tracing::debug!(error = %e, "Skipping undecodable frame");
                return Ok(());
            }
        };

        match message {
            FeedMessage::Ticks(batch) => {
                for tick in batch {
                    metrics::record_tick_received(&tick.symbol);
                    self.stats.record_tick(Utc::now());

                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        sent = ticks.send(tick) => {
                            if sent.is_err() {
                                return Err(FeedError::TickQueueClosed);
                            }
                        }
                    }
                }
            }
            FeedMessage::Error(message) => {
                self.stats.record_feed_error();
                metrics::record_feed_error();
                tracing::warn!(message = %message, "Price feed reported an error");
                let _ = events.send(FeedEvent::Error(message)).await;
            }
            FeedMessage::Subscriptions(subs) => {
                tracing::debug!(subscriptions = ?subs, "Subscription update");
            }
            FeedMessage::Heartbeat => {
                tracing::trace!("Heartbeat");
            }
            FeedMessage::Ignored { channel } => {
                tracing::trace!(channel = ?channel, "Ignoring frame");
            }
        }

        Ok(())
    }
}
