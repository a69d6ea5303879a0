//! Redis pub/sub backplane.
//!
//! Note: Redis pub/sub is not durable. Messages are dropped for subscribers
//! that are offline when they are published.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use redis::Commands;

use super::{Backplane, BackplaneError, RealtimeMessage, Subscription};

/// How often a subscriber thread wakes up to check for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Redis pub/sub backplane for JSON realtime messages.
///
/// Holds one publishing connection (opened eagerly, reopened after a failed
/// publish) plus one connection per subscription, each drained on its own
/// thread.
pub struct RedisBackplane {
    client: redis::Client,
    channel: String,
    publisher: Mutex<Option<redis::Connection>>,
    subscribers: Mutex<Vec<Arc<AtomicBool>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for RedisBackplane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackplane")
            .field("channel", &self.channel)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl RedisBackplane {
    /// Open the client and the publishing connection.
    pub fn connect(redis_url: impl AsRef<str>, channel: impl Into<String>) -> Result<Self, BackplaneError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| BackplaneError::Connection(e.to_string()))?;
        let publisher = client
            .get_connection()
            .map_err(|e| BackplaneError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            channel: channel.into(),
            publisher: Mutex::new(Some(publisher)),
            subscribers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }
}

impl Backplane for RedisBackplane {
    fn backend(&self) -> &'static str {
        "redis"
    }

    fn publish(&self, message: &RealtimeMessage) -> Result<(), BackplaneError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackplaneError::Closed);
        }
        let payload = serde_json::to_string(message)
            .map_err(|e| BackplaneError::Serialization(e.to_string()))?;

        let mut guard = self.publisher.lock().map_err(|_| BackplaneError::Poisoned)?;
        if guard.is_none() {
            let conn = self
                .client
                .get_connection()
                .map_err(|e| BackplaneError::Connection(e.to_string()))?;
            *guard = Some(conn);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(BackplaneError::Closed);
        };

        let published: Result<i64, _> = conn.publish(&self.channel, payload);
        if let Err(e) = published {
            // Reconnect on the next publish.
            *guard = None;
            return Err(BackplaneError::Command(e.to_string()));
        }
        Ok(())
    }

    fn subscribe(&self) -> Result<Subscription, BackplaneError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackplaneError::Closed);
        }
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| BackplaneError::Connection(e.to_string()))?;
        conn.set_read_timeout(Some(POLL_INTERVAL))
            .map_err(|e| BackplaneError::Connection(e.to_string()))?;

        let stop = Arc::new(AtomicBool::new(false));
        self.subscribers
            .lock()
            .map_err(|_| BackplaneError::Poisoned)?
            .push(Arc::clone(&stop));

        let (tx, rx) = mpsc::channel();
        let channel = self.channel.clone();

        thread::spawn(move || {
            let mut pubsub = conn.as_pubsub();
            if let Err(e) = pubsub.subscribe(&channel) {
                tracing::warn!(error = %e, channel = %channel, "backplane subscribe failed");
                return;
            }

            while !stop.load(Ordering::SeqCst) {
                let msg = match pubsub.get_message() {
                    Ok(m) => m,
                    Err(e) if e.is_timeout() => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "backplane subscription ended");
                        return;
                    }
                };

                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };

                let message: RealtimeMessage = match serde_json::from_str(&payload) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::debug!(error = %e, "dropping malformed backplane message");
                        continue;
                    }
                };

                if tx.send(message).is_err() {
                    return;
                }
            }
        });

        Ok(Subscription::new(rx))
    }

    fn close(&self) -> Result<(), BackplaneError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for stop in self.subscribers.lock().map_err(|_| BackplaneError::Poisoned)?.drain(..) {
            stop.store(true, Ordering::SeqCst);
        }

        let publisher = self
            .publisher
            .lock()
            .map_err(|_| BackplaneError::Poisoned)?
            .take();
        if let Some(mut conn) = publisher {
            redis::cmd("QUIT")
                .query::<()>(&mut conn)
                .map_err(|e| BackplaneError::Command(e.to_string()))?;
        }
        Ok(())
    }
}
