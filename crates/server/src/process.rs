//! Entry points for the three process roles.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use hive_auth::RbacSeed;

use crate::cluster::ClusterSupervisor;
use crate::context::{ProcessContext, ProcessRole};
use crate::launcher::{self, ControlLine, ProcessLauncher};
use crate::shutdown::{self, DisarmWindow, InterruptOutcome};
use crate::worker::{UrlConnector, Worker};

/// Run the process in whatever role `ctx` names and return its exit code.
pub async fn run(ctx: ProcessContext) -> anyhow::Result<i32> {
    match ctx.role() {
        ProcessRole::Supervisor { workers } => {
            ctx.config().check_shared_store(workers)?;
            if ctx.config().redis.starts_with("memory:") && workers > 1 {
                tracing::warn!("in-memory backplane: realtime events stay within each worker");
            }
            Ok(run_supervisor(workers).await)
        }
        ProcessRole::Main => {
            let seed = ctx.config().load_seed()?;
            Ok(run_main(ctx, seed).await)
        }
        ProcessRole::Worker { ordinal } => {
            let workers = ctx.config().cluster.resolve().unwrap_or(1).max(ordinal);
            ctx.config().check_shared_store(workers)?;
            let seed = ctx.config().load_seed()?;
            Ok(run_worker(ctx, seed).await)
        }
    }
}

/// Single process: serve until interrupted, then stop with the two-stage
/// protocol.
pub async fn run_main(ctx: ProcessContext, seed: RbacSeed) -> i32 {
    let interrupts = shutdown::interrupts();
    let mut worker = Worker::new(ctx, Arc::new(UrlConnector)).with_seed(seed);
    if worker.start().await.is_err() {
        worker.stop().await;
        return 1;
    }
    tracing::info!("Main process started");

    serve_until_stopped(worker, interrupts, DisarmWindow::default()).await
}

/// Wait for the first interrupt, then stop `worker` in the background.
/// Returns 0 once the stop completes, or 1 if a second interrupt lands
/// inside the disarm window first.
pub async fn serve_until_stopped(
    mut worker: Worker,
    mut interrupts: mpsc::UnboundedReceiver<()>,
    mut window: DisarmWindow,
) -> i32 {
    if interrupts.recv().await.is_none() {
        std::future::pending::<()>().await;
    }

    window.on_interrupt(Instant::now());
    tracing::info!(
        window_ms = window.window().as_millis() as u64,
        "Stopping, interrupt again to force"
    );

    let mut stopping = tokio::spawn(async move { worker.stop().await });
    loop {
        tokio::select! {
            joined = &mut stopping => {
                return match joined {
                    Ok(()) => {
                        tracing::info!("Stopped");
                        0
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "stop task failed");
                        1
                    }
                };
            }
            Some(()) = interrupts.recv() => match window.on_interrupt(Instant::now()) {
                InterruptOutcome::Force => {
                    tracing::warn!("Force stop!");
                    return 1;
                }
                InterruptOutcome::Armed => {
                    tracing::info!("Still stopping, interrupt again to force");
                }
            },
        }
    }
}

/// Launch the workers and supervise them until they have all exited.
pub async fn run_supervisor(workers: usize) -> i32 {
    let launcher = match ProcessLauncher::current() {
        Ok(launcher) => launcher,
        Err(e) => {
            tracing::error!(error = %e, "cannot launch workers");
            return 1;
        }
    };

    let interrupts = shutdown::interrupts();
    let mut supervisor = ClusterSupervisor::new(workers, launcher);
    if let Err(e) = supervisor.launch() {
        tracing::error!(error = %e, "cannot launch workers");
        return 1;
    }
    tracing::info!(workers, "Master started");

    supervisor.run(interrupts).await.exit_code
}

/// Serve until the supervisor disconnects us or we are interrupted.
pub async fn run_worker(ctx: ProcessContext, seed: RbacSeed) -> i32 {
    let mut worker = Worker::new(ctx, Arc::new(UrlConnector)).with_seed(seed);
    if worker.start().await.is_err() {
        worker.stop().await;
        return 1;
    }

    if let Err(e) = launcher::announce(ControlLine::Ready) {
        tracing::warn!(error = %e, "cannot report readiness to supervisor");
    }
    tracing::info!("Worker started");

    tokio::select! {
        _ = launcher::supervisor_disconnected() => {
            tracing::info!("Supervisor disconnected, stopping");
        }
        _ = shutdown::interrupted() => {
            tracing::info!("Interrupted, disconnecting");
            if let Err(e) = launcher::announce(ControlLine::Disconnecting) {
                tracing::warn!(error = %e, "cannot notify supervisor");
            }
        }
    }

    worker.stop().await;
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use async_trait::async_trait;
    use hive_auth::{BcryptHasher, StoreError};
    use hive_infra::backplane::{
        Backplane, BackplaneError, InMemoryBackplane, RealtimeMessage, Subscription,
    };
    use hive_infra::config::{Config, WorkerCount};
    use hive_infra::store::{InMemoryStore, StoreConnection};

    use crate::worker::ResourceConnector;

    /// Backplane whose `close` blocks long enough to keep a stop in flight.
    struct SlowClose(InMemoryBackplane);

    impl Backplane for SlowClose {
        fn backend(&self) -> &'static str {
            "memory"
        }

        fn publish(&self, message: &RealtimeMessage) -> Result<(), BackplaneError> {
            self.0.publish(message)
        }

        fn subscribe(&self) -> Result<Subscription, BackplaneError> {
            self.0.subscribe()
        }

        fn close(&self) -> Result<(), BackplaneError> {
            std::thread::sleep(Duration::from_secs(2));
            self.0.close()
        }
    }

    struct SlowStop;

    #[async_trait]
    impl ResourceConnector for SlowStop {
        async fn connect_store(&self, _url: &str) -> Result<Arc<dyn StoreConnection>, StoreError> {
            let store: Arc<dyn StoreConnection> = Arc::new(InMemoryStore::new());
            Ok(store)
        }

        async fn connect_backplane(&self, _url: &str) -> Result<Arc<dyn Backplane>, BackplaneError> {
            let backplane: Arc<dyn Backplane> = Arc::new(SlowClose(InMemoryBackplane::new()));
            Ok(backplane)
        }
    }

    async fn running_main(connector: Arc<dyn ResourceConnector>) -> Worker {
        let config = Config {
            port: None,
            ..Config::default()
        };
        let mut worker = Worker::new(ProcessContext::new(config, ProcessRole::Main), connector)
            .with_hasher(Arc::new(BcryptHasher::new(4)));
        worker.start().await.unwrap();
        worker
    }

    #[tokio::test]
    async fn one_interrupt_stops_main_cleanly() {
        let worker = running_main(Arc::new(UrlConnector)).await;
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(()).unwrap();

        let code = tokio::time::timeout(
            Duration::from_secs(10),
            serve_until_stopped(worker, rx, DisarmWindow::default()),
        )
        .await
        .unwrap();

        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn second_interrupt_during_a_slow_stop_forces_exit_one() {
        let worker = running_main(Arc::new(SlowStop)).await;
        let (tx, rx) = mpsc::unbounded_channel();
        let main = tokio::spawn(serve_until_stopped(worker, rx, DisarmWindow::default()));

        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();

        let code = tokio::time::timeout(Duration::from_secs(1), main)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, 1);
    }

    #[tokio::test]
    async fn interrupt_after_the_window_lapses_rearms_main() {
        let worker = running_main(Arc::new(SlowStop)).await;
        let (tx, rx) = mpsc::unbounded_channel();
        let window = DisarmWindow::new(Duration::from_millis(100));
        let main = tokio::spawn(serve_until_stopped(worker, rx, window));

        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!main.is_finished());

        tx.send(()).unwrap();
        let code = tokio::time::timeout(Duration::from_secs(1), main)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, 1);
    }

    #[tokio::test]
    async fn supervisor_refuses_a_cluster_on_the_in_memory_store() {
        let config = Config {
            cluster: WorkerCount::Fixed(2),
            ..Config::default()
        };
        let ctx = ProcessContext::new(config, ProcessRole::Supervisor { workers: 2 });

        let err = run(ctx).await.unwrap_err();
        assert!(err.to_string().contains("process-local store"));
    }

    #[tokio::test]
    async fn worker_refuses_the_in_memory_store_in_a_cluster() {
        let config = Config {
            cluster: WorkerCount::Fixed(2),
            port: Some(0),
            ..Config::default()
        };
        let ctx = ProcessContext::new(config, ProcessRole::Worker { ordinal: 2 });

        assert!(run(ctx).await.is_err());
    }
}
