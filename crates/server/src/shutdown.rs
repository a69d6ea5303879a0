//! Two-stage interrupt handling.
//!
//! The first interrupt starts a graceful stop and arms a disarm window. A
//! second interrupt inside the window forces the process down. Once the
//! window lapses, the next interrupt arms it again.

use std::time::{Duration, Instant};

use tokio::signal;
use tokio::sync::mpsc;

pub const DISARM_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptOutcome {
    /// Begin (or keep going with) a graceful stop.
    Armed,
    /// Second interrupt inside the window: stop now.
    Force,
}

#[derive(Debug, Clone)]
pub struct DisarmWindow {
    window: Duration,
    armed_at: Option<Instant>,
}

impl DisarmWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            armed_at: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn on_interrupt(&mut self, now: Instant) -> InterruptOutcome {
        match self.armed_at {
            Some(armed_at) if now.saturating_duration_since(armed_at) < self.window => {
                InterruptOutcome::Force
            }
            _ => {
                self.armed_at = Some(now);
                InterruptOutcome::Armed
            }
        }
    }
}

impl Default for DisarmWindow {
    fn default() -> Self {
        Self::new(DISARM_WINDOW)
    }
}

/// Resolves on the next Ctrl-C. Never resolves if the handler cannot be
/// installed.
pub async fn interrupted() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for interrupts");
        std::future::pending::<()>().await;
    }
}

/// Stream of Ctrl-C presses for the lifetime of the process.
///
/// On Unix the handler is installed before this returns, so an interrupt
/// that arrives while workers are still being launched is queued instead of
/// killing the process.
pub fn interrupts() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();

    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
            Ok(mut sigint) => {
                tokio::spawn(async move {
                    while sigint.recv().await.is_some() {
                        if tx.send(()).is_err() {
                            break;
                        }
                    }
                });
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for interrupts"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            loop {
                interrupted().await;
                if tx.send(()).is_err() {
                    break;
                }
            }
        });
    }

    rx
}
