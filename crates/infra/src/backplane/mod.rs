//! Realtime backplane: fan-out of notifications between worker processes.
//!
//! The backplane is for distribution only. Messages published while a
//! subscriber is offline are lost, and consumers must tolerate duplicates.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_pubsub;

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub use in_memory::InMemoryBackplane;
#[cfg(feature = "redis")]
pub use redis_pubsub::RedisBackplane;

/// Pub/sub channel shared by every worker.
pub const REALTIME_CHANNEL: &str = "hive:realtime";

/// A notification broadcast to every connected realtime client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMessage {
    pub topic: String,
    pub payload: JsonValue,
    pub published_at: DateTime<Utc>,
}

impl RealtimeMessage {
    pub fn new(topic: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            topic: topic.into(),
            payload,
            published_at: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackplaneError {
    #[error("backplane connection failed: {0}")]
    Connection(String),

    #[error("backplane command failed: {0}")]
    Command(String),

    #[error("message serialization failed: {0}")]
    Serialization(String),

    #[error("backplane is closed")]
    Closed,

    #[error("backplane lock poisoned")]
    Poisoned,
}

/// Receiving half of a backplane subscription.
///
/// The sender side is dropped when the backplane closes, so `recv` reports
/// disconnection instead of blocking forever.
#[derive(Debug)]
pub struct Subscription {
    receiver: Receiver<RealtimeMessage>,
}

impl Subscription {
    pub fn new(receiver: Receiver<RealtimeMessage>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<RealtimeMessage, RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<RealtimeMessage, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<RealtimeMessage, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Publish/subscribe transport shared across processes.
///
/// Blocking by contract; async callers go through `spawn_blocking`.
pub trait Backplane: Send + Sync {
    /// Short backend name for logs (`"memory"`, `"redis"`).
    fn backend(&self) -> &'static str;

    fn publish(&self, message: &RealtimeMessage) -> Result<(), BackplaneError>;

    fn subscribe(&self) -> Result<Subscription, BackplaneError>;

    /// Disconnect. Open subscriptions end; later publishes fail with
    /// [`BackplaneError::Closed`].
    fn close(&self) -> Result<(), BackplaneError>;
}

/// Connect to the backplane named by `url` (`memory://` or `redis://…`).
pub fn connect(url: &str) -> Result<Arc<dyn Backplane>, BackplaneError> {
    if url.starts_with("memory:") {
        return Ok(Arc::new(InMemoryBackplane::new()));
    }
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        return connect_redis(url);
    }
    Err(BackplaneError::Connection(format!("unsupported backplane url '{url}'")))
}

#[cfg(feature = "redis")]
fn connect_redis(url: &str) -> Result<Arc<dyn Backplane>, BackplaneError> {
    Ok(Arc::new(RedisBackplane::connect(url, REALTIME_CHANNEL)?))
}

#[cfg(not(feature = "redis"))]
fn connect_redis(url: &str) -> Result<Arc<dyn Backplane>, BackplaneError> {
    Err(BackplaneError::Connection(format!(
        "'{url}' requires hive-infra to be built with the `redis` feature"
    )))
}
