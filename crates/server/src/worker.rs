//! Worker lifecycle: acquire resources, reconcile RBAC when elected, serve,
//! and release everything again on stop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use hive_auth::{BcryptHasher, PasswordHasher, RbacSeed, StoreError, TokenService};
use hive_infra::backplane::{self, Backplane, BackplaneError};
use hive_infra::bootstrap::{BootstrapError, BootstrapReport, BootstrapSynchronizer};
use hive_infra::store::{self, StoreConnection};

use crate::app::{self, services::AppServices};
use crate::context::ProcessContext;
use crate::realtime::{self, RealtimeHub};

/// How long `stop` waits for in-flight requests and open streams.
const SERVER_DRAIN: Duration = Duration::from_secs(10);
const FORWARDER_DRAIN: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Uninitialized,
    Starting,
    Running,
    Stopping,
    Stopped,
    /// Startup failed; resources acquired so far are still held until `stop`.
    Crashed,
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("resource unavailable: {0}")]
    Resource(String),

    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("worker cannot start from state {0:?}")]
    InvalidState(WorkerState),
}

/// Opens the external resources a worker depends on.
#[async_trait]
pub trait ResourceConnector: Send + Sync {
    async fn connect_store(&self, url: &str) -> Result<Arc<dyn StoreConnection>, StoreError>;

    async fn connect_backplane(&self, url: &str) -> Result<Arc<dyn Backplane>, BackplaneError>;
}

/// Connects by URL scheme (`memory://`, `postgres://`, `redis://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlConnector;

#[async_trait]
impl ResourceConnector for UrlConnector {
    async fn connect_store(&self, url: &str) -> Result<Arc<dyn StoreConnection>, StoreError> {
        store::connect(url).await
    }

    async fn connect_backplane(&self, url: &str) -> Result<Arc<dyn Backplane>, BackplaneError> {
        let url = url.to_string();
        tokio::task::spawn_blocking(move || backplane::connect(&url))
            .await
            .map_err(|e| BackplaneError::Connection(format!("connect task failed: {e}")))?
    }
}

struct ServerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
    local_addr: SocketAddr,
}

#[derive(Default)]
struct Resources {
    store: Option<Arc<dyn StoreConnection>>,
    backplane: Option<Arc<dyn Backplane>>,
    hub: Option<Arc<RealtimeHub>>,
    forwarder: Option<JoinHandle<()>>,
    server: Option<ServerHandle>,
}

/// One service instance: store, backplane, realtime hub and HTTP listener.
pub struct Worker {
    ctx: ProcessContext,
    connector: Arc<dyn ResourceConnector>,
    seed: RbacSeed,
    hasher: Arc<dyn PasswordHasher>,
    state: WorkerState,
    resources: Resources,
    bootstrap_report: Option<BootstrapReport>,
}

impl Worker {
    pub fn new(ctx: ProcessContext, connector: Arc<dyn ResourceConnector>) -> Self {
        Self {
            ctx,
            connector,
            seed: RbacSeed::builtin(),
            hasher: Arc::new(BcryptHasher::default()),
            state: WorkerState::Uninitialized,
            resources: Resources::default(),
            bootstrap_report: None,
        }
    }

    pub fn with_seed(mut self, seed: RbacSeed) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Address the HTTP listener is bound to, once running with a port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.resources.server.as_ref().map(|s| s.local_addr)
    }

    /// Set only on the bootstrap-elected worker after a successful start.
    pub fn bootstrap_report(&self) -> Option<&BootstrapReport> {
        self.bootstrap_report.as_ref()
    }

    /// Acquire resources and start serving.
    ///
    /// On failure the worker is `Crashed` and whatever was acquired stays
    /// held until [`Worker::stop`].
    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        if self.state != WorkerState::Uninitialized {
            return Err(LifecycleError::InvalidState(self.state));
        }
        self.state = WorkerState::Starting;

        match self.acquire().await {
            Ok(()) => {
                self.state = WorkerState::Running;
                Ok(())
            }
            Err(e) => {
                self.state = WorkerState::Crashed;
                tracing::error!(error = %e, "worker failed to start");
                Err(e)
            }
        }
    }

    async fn acquire(&mut self) -> Result<(), LifecycleError> {
        let config = self.ctx.config().clone();

        let store = self
            .connector
            .connect_store(&config.db)
            .await
            .map_err(|e| LifecycleError::Resource(format!("store: {e}")))?;
        self.resources.store = Some(Arc::clone(&store));
        tracing::info!(backend = store.backend(), "store connected");

        let backplane = self
            .connector
            .connect_backplane(&config.redis)
            .await
            .map_err(|e| LifecycleError::Resource(format!("backplane: {e}")))?;
        self.resources.backplane = Some(Arc::clone(&backplane));

        let subscription = {
            let backplane = Arc::clone(&backplane);
            tokio::task::spawn_blocking(move || backplane.subscribe())
                .await
                .map_err(|e| LifecycleError::Resource(format!("backplane subscribe task: {e}")))?
                .map_err(|e| LifecycleError::Resource(format!("backplane: {e}")))?
        };
        let hub = Arc::new(RealtimeHub::default());
        self.resources.forwarder = Some(realtime::spawn_forwarder(subscription, Arc::clone(&hub)));
        self.resources.hub = Some(Arc::clone(&hub));
        tracing::info!(backend = backplane.backend(), "backplane connected");

        if self.ctx.role().is_bootstrap_elected() {
            let report = BootstrapSynchronizer::new(Arc::clone(&store), Arc::clone(&self.hasher))
                .run(&self.seed)
                .await?;
            self.bootstrap_report = Some(report);
        }

        let Some(port) = config.port else {
            tracing::info!("no port configured; running without a listener");
            return Ok(());
        };

        let listener = TcpListener::bind((config.host.as_str(), port))
            .await
            .map_err(|e| LifecycleError::Resource(format!("bind {}:{port}: {e}", config.host)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| LifecycleError::Resource(format!("listener address: {e}")))?;

        let services = Arc::new(AppServices::new(
            store,
            backplane,
            hub,
            TokenService::hs256(config.jwt_secret.as_bytes()),
            Arc::clone(&self.hasher),
        ));
        let router = app::build_router(services);

        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = signal.await;
                })
                .await
        });

        self.resources.server = Some(ServerHandle {
            shutdown,
            task,
            local_addr,
        });
        tracing::info!(addr = %local_addr, site = %config.site(), "listening");
        Ok(())
    }

    /// Release everything in reverse dependency order.
    ///
    /// Best-effort: failures are logged and skipped. Safe to call in any
    /// state, including after a failed start. Always ends `Stopped`.
    pub async fn stop(&mut self) {
        if self.state == WorkerState::Stopped {
            return;
        }
        self.state = WorkerState::Stopping;

        if let Some(backplane) = self.resources.backplane.take() {
            match tokio::task::spawn_blocking(move || backplane.close()).await {
                Ok(Ok(())) => tracing::debug!("backplane closed"),
                Ok(Err(e)) => tracing::warn!(error = %e, "failed to close backplane"),
                Err(e) => tracing::warn!(error = %e, "backplane close task failed"),
            }
        }

        // Let the forwarder hand over what the backplane had buffered.
        if let Some(forwarder) = self.resources.forwarder.take() {
            if tokio::time::timeout(FORWARDER_DRAIN, forwarder).await.is_err() {
                tracing::warn!("realtime forwarder did not drain in time");
            }
        }

        if let Some(hub) = self.resources.hub.take() {
            hub.close();
        }

        if let Some(mut server) = self.resources.server.take() {
            let _ = server.shutdown.send(());
            match tokio::time::timeout(SERVER_DRAIN, &mut server.task).await {
                Ok(Ok(Ok(()))) => tracing::debug!("listener closed"),
                Ok(Ok(Err(e))) => tracing::warn!(error = %e, "server exited with error"),
                Ok(Err(e)) => tracing::warn!(error = %e, "server task failed"),
                Err(_) => {
                    tracing::warn!("server did not drain in time; aborting");
                    server.task.abort();
                }
            }
        }

        if let Some(store) = self.resources.store.take() {
            if let Err(e) = store.close().await {
                tracing::warn!(error = %e, "failed to close store");
            }
        }

        self.state = WorkerState::Stopped;
        tracing::info!("worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use hive_auth::UserStore;
    use hive_infra::backplane::InMemoryBackplane;
    use hive_infra::config::Config;
    use hive_infra::store::InMemoryStore;

    use crate::context::ProcessRole;

    /// Hands every worker the same store and backplane, like a shared
    /// database and Redis would.
    struct SharedConnector {
        store: Arc<InMemoryStore>,
        backplane: Arc<InMemoryBackplane>,
    }

    #[async_trait]
    impl ResourceConnector for SharedConnector {
        async fn connect_store(&self, _url: &str) -> Result<Arc<dyn StoreConnection>, StoreError> {
            let store: Arc<dyn StoreConnection> = self.store.clone();
            Ok(store)
        }

        async fn connect_backplane(&self, _url: &str) -> Result<Arc<dyn Backplane>, BackplaneError> {
            let backplane: Arc<dyn Backplane> = self.backplane.clone();
            Ok(backplane)
        }
    }

    struct UnreachableStore;

    #[async_trait]
    impl ResourceConnector for UnreachableStore {
        async fn connect_store(&self, url: &str) -> Result<Arc<dyn StoreConnection>, StoreError> {
            Err(StoreError::Unavailable(format!("connection refused: {url}")))
        }

        async fn connect_backplane(&self, _url: &str) -> Result<Arc<dyn Backplane>, BackplaneError> {
            Ok(Arc::new(InMemoryBackplane::new()))
        }
    }

    fn detached_config() -> Config {
        Config {
            port: None,
            ..Config::default()
        }
    }

    fn worker(role: ProcessRole, config: Config, connector: Arc<dyn ResourceConnector>) -> Worker {
        Worker::new(ProcessContext::new(config, role), connector)
            .with_hasher(Arc::new(BcryptHasher::new(4)))
    }

    #[tokio::test]
    async fn only_the_first_of_four_workers_bootstraps() {
        let connector = Arc::new(SharedConnector {
            store: Arc::new(InMemoryStore::new()),
            backplane: Arc::new(InMemoryBackplane::new()),
        });

        let mut workers: Vec<Worker> = (1..=4)
            .map(|ordinal| {
                worker(
                    ProcessRole::Worker { ordinal },
                    detached_config(),
                    connector.clone(),
                )
            })
            .collect();
        for w in &mut workers {
            w.start().await.unwrap();
            assert_eq!(w.state(), WorkerState::Running);
        }

        let reports: Vec<_> = workers.iter().map(|w| w.bootstrap_report().copied()).collect();
        assert!(reports[0].is_some());
        assert!(reports[1..].iter().all(Option::is_none));
        assert_eq!(reports[0].unwrap().writes() as u64, connector.store.writes());
        assert!(connector.store.find_live_user("superuser").await.unwrap().is_some());

        for w in &mut workers {
            w.stop().await;
            assert_eq!(w.state(), WorkerState::Stopped);
        }
    }

    #[tokio::test]
    async fn unreachable_store_crashes_the_worker() {
        let mut w = worker(ProcessRole::Main, detached_config(), Arc::new(UnreachableStore));

        let err = w.start().await.unwrap_err();
        assert!(matches!(err, LifecycleError::Resource(msg) if msg.contains("connection refused")));
        assert_eq!(w.state(), WorkerState::Crashed);

        w.stop().await;
        assert_eq!(w.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn bad_seed_crashes_the_elected_worker() {
        let connector = Arc::new(SharedConnector {
            store: Arc::new(InMemoryStore::new()),
            backplane: Arc::new(InMemoryBackplane::new()),
        });
        let mut seed = RbacSeed::builtin();
        seed.users[0].roles.push("no-such-role".to_string());

        let mut w = worker(ProcessRole::Main, detached_config(), connector).with_seed(seed);

        let err = w.start().await.unwrap_err();
        assert!(matches!(err, LifecycleError::Bootstrap(BootstrapError::Validation(_))));
        assert_eq!(w.state(), WorkerState::Crashed);
        w.stop().await;
    }

    #[tokio::test]
    async fn stop_before_start_is_harmless() {
        let mut w = worker(ProcessRole::Main, detached_config(), Arc::new(UrlConnector));
        w.stop().await;
        assert_eq!(w.state(), WorkerState::Stopped);
        assert!(matches!(w.start().await, Err(LifecycleError::InvalidState(WorkerState::Stopped))));
    }

    #[tokio::test]
    async fn running_worker_listens_and_releases_the_port() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: Some(0),
            ..Config::default()
        };
        let mut w = worker(ProcessRole::Main, config, Arc::new(UrlConnector));
        w.start().await.unwrap();

        let addr = w.local_addr().unwrap();
        assert!(tokio::net::TcpStream::connect(addr).await.is_ok());

        w.stop().await;
        assert_eq!(w.state(), WorkerState::Stopped);
        assert!(w.local_addr().is_none());
    }
}
