//! Supervisor for a fixed set of worker processes.
//!
//! Workers are launched once and never restarted. The supervisor only
//! watches them: it records readiness, classifies exits, and drives the
//! two-stage shutdown.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::shutdown::{DISARM_WINDOW, DisarmWindow, InterruptOutcome};

/// How long a forced stop waits for killed workers to be reaped.
const KILL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLiveness {
    Starting,
    Running,
    ExitedClean,
    ExitedCrashed,
}

impl NodeLiveness {
    pub fn is_live(&self) -> bool {
        matches!(self, NodeLiveness::Starting | NodeLiveness::Running)
    }
}

/// Supervisor-side view of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    /// 1-based launch position.
    pub ordinal: usize,
    pub pid: u32,
    pub liveness: NodeLiveness,
    pub bootstrap_elected: bool,
    /// The supervisor has asked this worker to disconnect (or killed it).
    pub disconnected: bool,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCommand {
    /// Ask the worker to stop gracefully.
    Disconnect,
    Kill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeExit {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    /// The worker announced it was disconnecting before it exited.
    pub worker_disconnected: bool,
}

pub type ExitFuture = Pin<Box<dyn Future<Output = NodeExit> + Send>>;

/// A worker that has been started by a [`NodeLauncher`].
pub struct LaunchedNode {
    pub pid: u32,
    pub control: mpsc::UnboundedSender<NodeCommand>,
    /// Resolves once the worker reports it is serving.
    pub ready: oneshot::Receiver<()>,
    pub exit: ExitFuture,
}

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("failed to launch worker {ordinal}: {message}")]
    Launch { ordinal: usize, message: String },

    #[error("cluster needs at least one worker")]
    Empty,
}

/// Starts worker processes. Must be called from within a Tokio runtime.
pub trait NodeLauncher: Send + Sync {
    fn launch(&self, ordinal: usize) -> Result<LaunchedNode, ClusterError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterReport {
    pub exit_code: i32,
    pub nodes: Vec<ClusterNode>,
}

pub struct ClusterSupervisor<L> {
    launcher: L,
    workers: usize,
    window: Duration,
    nodes: Vec<ClusterNode>,
    controls: HashMap<usize, mpsc::UnboundedSender<NodeCommand>>,
    exits: JoinSet<(usize, NodeExit)>,
    ready_watchers: JoinSet<()>,
    ready_tx: mpsc::UnboundedSender<usize>,
    ready_rx: mpsc::UnboundedReceiver<usize>,
}

impl<L: NodeLauncher> ClusterSupervisor<L> {
    pub fn new(workers: usize, launcher: L) -> Self {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        Self {
            launcher,
            workers,
            window: DISARM_WINDOW,
            nodes: Vec::new(),
            controls: HashMap::new(),
            exits: JoinSet::new(),
            ready_watchers: JoinSet::new(),
            ready_tx,
            ready_rx,
        }
    }

    pub fn with_disarm_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn nodes(&self) -> &[ClusterNode] {
        &self.nodes
    }

    /// Launch every worker. Ordinal 1 is the one elected to bootstrap.
    ///
    /// If any launch fails, the workers already started are killed.
    pub fn launch(&mut self) -> Result<(), ClusterError> {
        if self.workers == 0 {
            return Err(ClusterError::Empty);
        }

        for ordinal in 1..=self.workers {
            let node = match self.launcher.launch(ordinal) {
                Ok(node) => node,
                Err(e) => {
                    self.kill_all();
                    return Err(e);
                }
            };
            self.track(ordinal, node);
        }
        Ok(())
    }

    fn track(&mut self, ordinal: usize, node: LaunchedNode) {
        let LaunchedNode {
            pid,
            control,
            ready,
            exit,
        } = node;

        tracing::info!(ordinal, pid, "Worker {pid} launched");

        self.nodes.push(ClusterNode {
            ordinal,
            pid,
            liveness: NodeLiveness::Starting,
            bootstrap_elected: ordinal == 1,
            disconnected: false,
            exit_code: None,
        });
        self.controls.insert(ordinal, control);

        let ready_tx = self.ready_tx.clone();
        self.ready_watchers.spawn(async move {
            if ready.await.is_ok() {
                let _ = ready_tx.send(ordinal);
            }
        });
        self.exits.spawn(async move { (ordinal, exit.await) });
    }

    /// Watch the workers until all have exited, driving shutdown from
    /// `interrupts`. Returns the process exit code: 0 after a requested
    /// shutdown, 1 when forced or when every worker died on its own.
    pub async fn run(mut self, mut interrupts: mpsc::UnboundedReceiver<()>) -> ClusterReport {
        let mut window = DisarmWindow::new(self.window);
        let mut shutdown_requested = false;

        while !self.exits.is_empty() {
            tokio::select! {
                Some(joined) = self.exits.join_next() => match joined {
                    Ok((ordinal, exit)) => self.on_exit(ordinal, exit),
                    Err(e) => tracing::error!(error = %e, "worker monitor failed"),
                },
                Some(ordinal) = self.ready_rx.recv() => self.on_ready(ordinal),
                Some(()) = interrupts.recv() => match window.on_interrupt(Instant::now()) {
                    InterruptOutcome::Armed => {
                        shutdown_requested = true;
                        tracing::info!(
                            window_secs = window.window().as_secs(),
                            "Shutting down workers, interrupt again to force"
                        );
                        self.disconnect_all();
                    }
                    InterruptOutcome::Force => {
                        tracing::warn!("Force stop!");
                        self.kill_all();
                        self.reap(KILL_GRACE).await;
                        return self.finish(1).await;
                    }
                },
            }
        }

        let exit_code = if shutdown_requested { 0 } else { 1 };
        if exit_code != 0 {
            tracing::error!("all workers exited without a shutdown request");
        }
        self.finish(exit_code).await
    }

    fn on_ready(&mut self, ordinal: usize) {
        if let Some(node) = self.node_mut(ordinal) {
            if node.liveness == NodeLiveness::Starting {
                node.liveness = NodeLiveness::Running;
                tracing::info!(ordinal, pid = node.pid, "Worker {} ready", node.pid);
            }
        }
    }

    fn on_exit(&mut self, ordinal: usize, exit: NodeExit) {
        self.controls.remove(&ordinal);
        let Some(node) = self.node_mut(ordinal) else {
            return;
        };
        node.exit_code = exit.code;

        let code = exit
            .code
            .map_or_else(|| "signal".to_string(), |c| c.to_string());

        if node.disconnected || exit.worker_disconnected {
            node.liveness = NodeLiveness::ExitedClean;
            tracing::info!(ordinal, pid = node.pid, "Worker {} exited with code {}", node.pid, code);
        } else {
            node.liveness = NodeLiveness::ExitedCrashed;
            tracing::error!(
                ordinal,
                pid = node.pid,
                "Worker {} exited accidentally with code {}",
                node.pid,
                code
            );
        }
    }

    fn disconnect_all(&mut self) {
        for node in self.nodes.iter_mut().filter(|n| n.liveness.is_live() && !n.disconnected) {
            node.disconnected = true;
            if let Some(control) = self.controls.get(&node.ordinal) {
                let _ = control.send(NodeCommand::Disconnect);
            }
        }
    }

    fn kill_all(&mut self) {
        for node in self.nodes.iter_mut().filter(|n| n.liveness.is_live()) {
            node.disconnected = true;
            if let Some(control) = self.controls.get(&node.ordinal) {
                let _ = control.send(NodeCommand::Kill);
            }
        }
    }

    async fn reap(&mut self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        while !self.exits.is_empty() {
            match tokio::time::timeout_at(deadline, self.exits.join_next()).await {
                Ok(Some(Ok((ordinal, exit)))) => self.on_exit(ordinal, exit),
                Ok(Some(Err(e))) => tracing::error!(error = %e, "worker monitor failed"),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(remaining = self.exits.len(), "workers not reaped in time");
                    break;
                }
            }
        }
    }

    fn node_mut(&mut self, ordinal: usize) -> Option<&mut ClusterNode> {
        self.nodes.iter_mut().find(|n| n.ordinal == ordinal)
    }

    /// Drop readiness watchers of workers that never reported in.
    async fn finish(&mut self, exit_code: i32) -> ClusterReport {
        self.ready_watchers.shutdown().await;
        ClusterReport {
            exit_code,
            nodes: self.nodes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    /// How a fake worker reacts to a disconnect request.
    #[derive(Clone, Copy)]
    enum Behaviour {
        Obedient,
        Stubborn,
    }

    /// Launches in-process tasks that act like workers.
    struct FakeLauncher {
        behaviour: Behaviour,
        crash_triggers: Arc<Mutex<HashMap<usize, oneshot::Sender<i32>>>>,
    }

    impl FakeLauncher {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                crash_triggers: Arc::new(Mutex::new(HashMap::new())),
            }
        }
    }

    impl NodeLauncher for FakeLauncher {
        fn launch(&self, ordinal: usize) -> Result<LaunchedNode, ClusterError> {
            let (control, mut commands) = mpsc::unbounded_channel();
            let (ready_tx, ready) = oneshot::channel();
            let (exit_tx, exit_rx) = oneshot::channel();
            let (crash_tx, mut crash_rx) = oneshot::channel::<i32>();
            self.crash_triggers.lock().unwrap().insert(ordinal, crash_tx);

            let behaviour = self.behaviour;
            tokio::spawn(async move {
                let _ = ready_tx.send(());
                let exit = loop {
                    tokio::select! {
                        code = &mut crash_rx => {
                            break NodeExit { code: Some(code.unwrap_or(1)), worker_disconnected: false };
                        }
                        command = commands.recv() => match (command, behaviour) {
                            (Some(NodeCommand::Disconnect), Behaviour::Obedient) => {
                                break NodeExit { code: Some(0), worker_disconnected: true };
                            }
                            (Some(NodeCommand::Disconnect), Behaviour::Stubborn) => continue,
                            (Some(NodeCommand::Kill), _) | (None, _) => {
                                break NodeExit { code: None, worker_disconnected: false };
                            }
                        },
                    }
                };
                let _ = exit_tx.send(exit);
            });

            Ok(LaunchedNode {
                pid: 1000 + ordinal as u32,
                control,
                ready,
                exit: Box::pin(async move {
                    exit_rx.await.unwrap_or(NodeExit {
                        code: None,
                        worker_disconnected: false,
                    })
                }),
            })
        }
    }

    fn crash(triggers: &Arc<Mutex<HashMap<usize, oneshot::Sender<i32>>>>, ordinal: usize, code: i32) {
        let tx = triggers.lock().unwrap().remove(&ordinal).unwrap();
        tx.send(code).unwrap();
    }

    #[tokio::test]
    async fn launches_exactly_n_workers_with_one_elected() {
        let mut supervisor = ClusterSupervisor::new(4, FakeLauncher::new(Behaviour::Obedient));
        supervisor.launch().unwrap();

        let nodes = supervisor.nodes();
        assert_eq!(nodes.len(), 4);
        assert_eq!(
            nodes.iter().map(|n| n.ordinal).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        let elected: Vec<_> = nodes.iter().filter(|n| n.bootstrap_elected).collect();
        assert_eq!(elected.len(), 1);
        assert_eq!(elected[0].ordinal, 1);
    }

    #[tokio::test]
    async fn zero_workers_is_rejected() {
        let mut supervisor = ClusterSupervisor::new(0, FakeLauncher::new(Behaviour::Obedient));
        assert!(matches!(supervisor.launch(), Err(ClusterError::Empty)));
    }

    #[tokio::test]
    async fn single_interrupt_disconnects_everyone_and_exits_zero() {
        let mut supervisor = ClusterSupervisor::new(3, FakeLauncher::new(Behaviour::Obedient));
        supervisor.launch().unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(()).unwrap();

        let report = tokio::time::timeout(Duration::from_secs(5), supervisor.run(rx))
            .await
            .unwrap();

        assert_eq!(report.exit_code, 0);
        assert!(report.nodes.iter().all(|n| n.liveness == NodeLiveness::ExitedClean));
        assert!(report.nodes.iter().all(|n| n.disconnected));
    }

    #[tokio::test]
    async fn second_interrupt_inside_window_forces_exit_one() {
        let mut supervisor = ClusterSupervisor::new(2, FakeLauncher::new(Behaviour::Stubborn));
        supervisor.launch().unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(()).unwrap();
        tx.send(()).unwrap();

        let report = tokio::time::timeout(Duration::from_secs(5), supervisor.run(rx))
            .await
            .unwrap();

        assert_eq!(report.exit_code, 1);
        assert!(report.nodes.iter().all(|n| !n.liveness.is_live()));
    }

    #[tokio::test]
    async fn interrupt_after_the_window_lapses_rearms_instead_of_forcing() {
        let mut supervisor = ClusterSupervisor::new(2, FakeLauncher::new(Behaviour::Stubborn))
            .with_disarm_window(Duration::from_millis(100));
        supervisor.launch().unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let run = tokio::spawn(supervisor.run(rx));

        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!run.is_finished());

        tx.send(()).unwrap();
        let report = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.exit_code, 1);
        assert!(report.nodes.iter().all(|n| !n.liveness.is_live()));
    }

    /// Workers that never report ready and exit once disconnected.
    struct SilentLauncher {
        ready_senders: Arc<Mutex<Vec<oneshot::Sender<()>>>>,
    }

    impl NodeLauncher for SilentLauncher {
        fn launch(&self, ordinal: usize) -> Result<LaunchedNode, ClusterError> {
            let (control, mut commands) = mpsc::unbounded_channel();
            let (ready_tx, ready) = oneshot::channel();
            self.ready_senders.lock().unwrap().push(ready_tx);

            Ok(LaunchedNode {
                pid: 2000 + ordinal as u32,
                control,
                ready,
                exit: Box::pin(async move {
                    let _ = commands.recv().await;
                    NodeExit {
                        code: Some(0),
                        worker_disconnected: true,
                    }
                }),
            })
        }
    }

    #[tokio::test]
    async fn readiness_watchers_end_with_the_supervisor() {
        let ready_senders = Arc::new(Mutex::new(Vec::new()));
        let mut supervisor = ClusterSupervisor::new(
            3,
            SilentLauncher {
                ready_senders: Arc::clone(&ready_senders),
            },
        );
        supervisor.launch().unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(()).unwrap();
        let report = tokio::time::timeout(Duration::from_secs(5), supervisor.run(rx))
            .await
            .unwrap();

        assert_eq!(report.exit_code, 0);
        assert!(report.nodes.iter().all(|n| n.liveness == NodeLiveness::ExitedClean));
        let senders = ready_senders.lock().unwrap();
        assert_eq!(senders.len(), 3);
        assert!(senders.iter().all(|tx| tx.is_closed()));
    }

    #[tokio::test]
    async fn all_workers_crashing_exits_one() {
        let launcher = FakeLauncher::new(Behaviour::Obedient);
        let triggers = Arc::clone(&launcher.crash_triggers);
        let mut supervisor = ClusterSupervisor::new(2, launcher);
        supervisor.launch().unwrap();

        crash(&triggers, 1, 3);
        crash(&triggers, 2, 101);

        let (_tx, rx) = mpsc::unbounded_channel();
        let report = tokio::time::timeout(Duration::from_secs(5), supervisor.run(rx))
            .await
            .unwrap();

        assert_eq!(report.exit_code, 1);
        assert!(report.nodes.iter().all(|n| n.liveness == NodeLiveness::ExitedCrashed));
        assert_eq!(report.nodes[0].exit_code, Some(3));
        assert_eq!(report.nodes[1].exit_code, Some(101));
    }

    #[tokio::test]
    async fn crashed_worker_is_not_restarted_and_shutdown_still_succeeds() {
        let launcher = FakeLauncher::new(Behaviour::Obedient);
        let triggers = Arc::clone(&launcher.crash_triggers);
        let mut supervisor = ClusterSupervisor::new(2, launcher);
        supervisor.launch().unwrap();

        crash(&triggers, 2, 7);

        let (tx, rx) = mpsc::unbounded_channel();
        let run = tokio::spawn(supervisor.run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        let report = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.exit_code, 0);
        assert_eq!(report.nodes.len(), 2);
        assert_eq!(report.nodes[0].liveness, NodeLiveness::ExitedClean);
        assert_eq!(report.nodes[1].liveness, NodeLiveness::ExitedCrashed);
    }
}
