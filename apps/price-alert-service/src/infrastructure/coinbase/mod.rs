//! Coinbase Price Feed Adapter
//!
//! Streams last-trade prices from the Coinbase Advanced Trade WebSocket and
//! normalizes them into [`Tick`](crate::domain::market::Tick)s.
//!
//! - `messages`: Wire types
//! - `codec`: Frame decoding
//! - `client`: One subscribed session
//! - `supervisor`: Reconnect loop with backoff
//! - `backoff`: Exponential backoff with jitter

pub mod backoff;
pub mod client;
pub mod codec;
pub mod messages;
pub mod supervisor;

pub use backoff::{BackoffConfig, BackoffPolicy};
pub use client::{DEFAULT_FEED_URL, DEFAULT_IDLE_TIMEOUT, FeedClient, FeedConnection, FeedError, FeedStats};
pub use codec::{DecodeError, FeedCodec, FeedMessage};
pub use supervisor::{FeedEvent, FeedSupervisor};
