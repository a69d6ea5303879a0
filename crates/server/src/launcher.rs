//! Worker processes: the production [`NodeLauncher`] and the worker's side
//! of the supervisor link.
//!
//! The link is the child's standard streams. The supervisor closing a
//! worker's stdin means "disconnect". The worker writes control lines to
//! stdout. Logs go to stderr, which is inherited.

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};

use crate::cluster::{ClusterError, LaunchedNode, NodeCommand, NodeExit, NodeLauncher};
use crate::context::WORKER_ORDINAL_ENV;

/// Worker → supervisor messages, one per stdout line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlLine {
    Ready,
    Disconnecting,
}

impl ControlLine {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlLine::Ready => "ready",
            ControlLine::Disconnecting => "disconnecting",
        }
    }

    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "ready" => Some(ControlLine::Ready),
            "disconnecting" => Some(ControlLine::Disconnecting),
            _ => None,
        }
    }
}

/// Re-executes a binary (by default the current one, with the same
/// arguments) as a worker.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Launch copies of the running executable.
    pub fn current() -> Result<Self, ClusterError> {
        let program = std::env::current_exe().map_err(|e| ClusterError::Launch {
            ordinal: 0,
            message: format!("cannot locate current executable: {e}"),
        })?;
        Ok(Self::new(program, std::env::args_os().skip(1).collect()))
    }
}

impl NodeLauncher for ProcessLauncher {
    fn launch(&self, ordinal: usize) -> Result<LaunchedNode, ClusterError> {
        let launch_error = |message: String| ClusterError::Launch { ordinal, message };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(WORKER_ORDINAL_ENV, ordinal.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| launch_error(e.to_string()))?;

        let pid = child.id().unwrap_or_default();
        let mut stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| launch_error("worker stdout not captured".to_string()))?;

        let (ready_tx, ready) = oneshot::channel();
        let reader = tokio::spawn(read_control_lines(stdout, ready_tx));

        let (control, mut commands) = mpsc::unbounded_channel();
        let exit = Box::pin(async move {
            let mut commands_open = true;
            let status = loop {
                tokio::select! {
                    status = child.wait() => break status,
                    command = commands.recv(), if commands_open => match command {
                        // Closing stdin is the disconnect signal.
                        Some(NodeCommand::Disconnect) => drop(stdin.take()),
                        Some(NodeCommand::Kill) => {
                            if let Err(e) = child.start_kill() {
                                tracing::warn!(pid, error = %e, "failed to kill worker");
                            }
                        }
                        None => commands_open = false,
                    },
                }
            };

            let worker_disconnected = reader.await.unwrap_or(false);
            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!(pid, error = %e, "failed to wait for worker");
                    None
                }
            };
            NodeExit {
                code,
                worker_disconnected,
            }
        });

        Ok(LaunchedNode {
            pid,
            control,
            ready,
            exit,
        })
    }
}

/// Returns whether the worker announced it was disconnecting.
async fn read_control_lines(stdout: ChildStdout, ready: oneshot::Sender<()>) -> bool {
    let mut lines = BufReader::new(stdout).lines();
    let mut ready = Some(ready);
    let mut disconnecting = false;

    while let Ok(Some(line)) = lines.next_line().await {
        match ControlLine::parse(&line) {
            Some(ControlLine::Ready) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(());
                }
            }
            Some(ControlLine::Disconnecting) => disconnecting = true,
            None => tracing::debug!(line = %line, "ignoring worker output"),
        }
    }
    disconnecting
}

/// Tell the supervisor something (worker side).
pub fn announce(line: ControlLine) -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    writeln!(out, "{}", line.as_str())?;
    out.flush()
}

/// Resolves when the supervisor closes this worker's stdin, or exits.
pub async fn supervisor_disconnected() {
    let mut stdin = tokio::io::stdin();
    let mut buf = [0u8; 64];
    loop {
        match stdin.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_lines_round_trip_through_text() {
        for line in [ControlLine::Ready, ControlLine::Disconnecting] {
            assert_eq!(ControlLine::parse(line.as_str()), Some(line));
        }
        assert_eq!(ControlLine::parse("  ready\r"), Some(ControlLine::Ready));
        assert_eq!(ControlLine::parse("{\"level\":\"INFO\"}"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn closing_stdin_disconnects_a_child() {
        // `cat` exits once its stdin closes, like a worker would.
        let launcher = ProcessLauncher::new("cat", Vec::new());
        let node = launcher.launch(1).unwrap();
        assert!(node.pid > 0);

        node.control.send(NodeCommand::Disconnect).unwrap();
        let exit = tokio::time::timeout(std::time::Duration::from_secs(5), node.exit)
            .await
            .unwrap();
        assert_eq!(exit.code, Some(0));
        assert!(!exit.worker_disconnected);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_terminates_a_child() {
        let launcher = ProcessLauncher::new("sleep", vec!["30".into()]);
        let node = launcher.launch(2).unwrap();

        node.control.send(NodeCommand::Kill).unwrap();
        let exit = tokio::time::timeout(std::time::Duration::from_secs(5), node.exit)
            .await
            .unwrap();
        assert_eq!(exit.code, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ready_line_is_reported() {
        let launcher = ProcessLauncher::new("sh", vec!["-c".into(), "echo ready; echo disconnecting".into()]);
        let node = launcher.launch(3).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), node.ready)
            .await
            .unwrap()
            .unwrap();
        let exit = tokio::time::timeout(std::time::Duration::from_secs(5), node.exit)
            .await
            .unwrap();
        assert!(exit.worker_disconnected);
    }
}
