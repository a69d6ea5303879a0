//! In-process backplane for tests/dev and single-process deployments.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, mpsc};

use super::{Backplane, BackplaneError, RealtimeMessage, Subscription};

/// Best-effort fan-out within one process.
#[derive(Debug, Default)]
pub struct InMemoryBackplane {
    subscribers: Mutex<Vec<mpsc::Sender<RealtimeMessage>>>,
    closed: AtomicBool,
}

impl InMemoryBackplane {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backplane for InMemoryBackplane {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn publish(&self, message: &RealtimeMessage) -> Result<(), BackplaneError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackplaneError::Closed);
        }
        let mut subs = self.subscribers.lock().map_err(|_| BackplaneError::Poisoned)?;

        // Drop any dead subscribers while publishing.
        subs.retain(|tx| tx.send(message.clone()).is_ok());

        Ok(())
    }

    fn subscribe(&self) -> Result<Subscription, BackplaneError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackplaneError::Closed);
        }
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .map_err(|_| BackplaneError::Poisoned)?
            .push(tx);
        Ok(Subscription::new(rx))
    }

    fn close(&self) -> Result<(), BackplaneError> {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers
            .lock()
            .map_err(|_| BackplaneError::Poisoned)?
            .clear();
        Ok(())
    }
}
