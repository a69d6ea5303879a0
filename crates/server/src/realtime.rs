//! Per-process fan-out of backplane messages to connected stream clients.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use hive_infra::backplane::{RealtimeMessage, Subscription};

/// Messages buffered per client before it starts lagging.
pub const CLIENT_BUFFER: usize = 256;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Broadcasts every delivered message to all current subscribers.
///
/// Closing drops the sender: subscribers still receive what was already
/// buffered, then their streams end.
#[derive(Debug)]
pub struct RealtimeHub {
    sender: Mutex<Option<broadcast::Sender<RealtimeMessage>>>,
    closed: AtomicBool,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Mutex::new(Some(sender)),
            closed: AtomicBool::new(false),
        }
    }

    /// `None` once the hub is closed.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<RealtimeMessage>> {
        let guard = self.sender.lock().ok()?;
        guard.as_ref().map(broadcast::Sender::subscribe)
    }

    /// Hand a message to every subscriber; returns how many received it.
    pub fn deliver(&self, message: RealtimeMessage) -> usize {
        let Ok(guard) = self.sender.lock() else {
            return 0;
        };
        match guard.as_ref() {
            // No subscribers is not an error.
            Some(sender) => sender.send(message).unwrap_or(0),
            None => 0,
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(CLIENT_BUFFER)
    }
}

/// Drain a backplane subscription into `hub` on a blocking thread.
///
/// Ends when the backplane closes (after forwarding what it had buffered) or
/// when the hub is closed.
pub fn spawn_forwarder(subscription: Subscription, hub: Arc<RealtimeHub>) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        loop {
            match subscription.recv_timeout(POLL_INTERVAL) {
                Ok(message) => {
                    let receivers = hub.deliver(message);
                    tracing::trace!(receivers, "realtime message delivered");
                }
                Err(RecvTimeoutError::Timeout) => {
                    if hub.is_closed() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    })
}
