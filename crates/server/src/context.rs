use std::sync::Arc;

use hive_auth::User;
use hive_core::UserId;
use hive_infra::config::Config;

/// Set by the supervisor on every worker it launches (1-based).
pub const WORKER_ORDINAL_ENV: &str = "HIVE_WORKER_ORDINAL";

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("invalid HIVE_WORKER_ORDINAL value '{0}'")]
    InvalidOrdinal(String),
}

/// What this process is within a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// Single process serving requests itself.
    Main,
    /// Launches and monitors workers; serves nothing.
    Supervisor { workers: usize },
    Worker { ordinal: usize },
}

impl ProcessRole {
    /// Work out the role from the environment and the resolved worker count.
    pub fn detect(workers: Option<usize>) -> Result<Self, ContextError> {
        let ordinal = std::env::var(WORKER_ORDINAL_ENV).ok();
        Self::from_parts(ordinal.as_deref(), workers)
    }

    pub fn from_parts(ordinal: Option<&str>, workers: Option<usize>) -> Result<Self, ContextError> {
        if let Some(raw) = ordinal {
            return match raw.trim().parse::<usize>() {
                Ok(ordinal) if ordinal > 0 => Ok(ProcessRole::Worker { ordinal }),
                _ => Err(ContextError::InvalidOrdinal(raw.to_string())),
            };
        }
        Ok(match workers {
            Some(workers) => ProcessRole::Supervisor { workers },
            None => ProcessRole::Main,
        })
    }

    /// Exactly one process per deployment reconciles the RBAC seed.
    pub fn is_bootstrap_elected(&self) -> bool {
        matches!(self, ProcessRole::Main | ProcessRole::Worker { ordinal: 1 })
    }

    /// Log label, e.g. `"Worker 4242"`.
    pub fn label(&self, pid: u32) -> String {
        match self {
            ProcessRole::Main => format!("Main {pid}"),
            ProcessRole::Supervisor { .. } => format!("Master {pid}"),
            ProcessRole::Worker { .. } => format!("Worker {pid}"),
        }
    }
}

/// Configuration and role of the running process, threaded through
/// constructors instead of living in globals.
#[derive(Debug, Clone)]
pub struct ProcessContext {
    config: Arc<Config>,
    role: ProcessRole,
}

impl ProcessContext {
    pub fn new(config: Config, role: ProcessRole) -> Self {
        Self {
            config: Arc::new(config),
            role,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }
}

/// Authenticated caller of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct PrincipalContext {
    user: User,
}

impl PrincipalContext {
    pub fn new(user: User) -> Self {
        Self { user }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn user_id(&self) -> UserId {
        self.user.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinal_env_makes_a_worker() {
        let role = ProcessRole::from_parts(Some("3"), Some(4)).unwrap();
        assert_eq!(role, ProcessRole::Worker { ordinal: 3 });
        assert!(!role.is_bootstrap_elected());
        assert_eq!(role.label(77), "Worker 77");
    }

    #[test]
    fn only_first_worker_and_main_are_elected() {
        assert!(ProcessRole::Worker { ordinal: 1 }.is_bootstrap_elected());
        assert!(ProcessRole::Main.is_bootstrap_elected());
        assert!(!ProcessRole::Supervisor { workers: 4 }.is_bootstrap_elected());
    }

    #[test]
    fn worker_count_picks_supervisor_or_main() {
        assert_eq!(
            ProcessRole::from_parts(None, Some(2)).unwrap(),
            ProcessRole::Supervisor { workers: 2 }
        );
        assert_eq!(ProcessRole::from_parts(None, None).unwrap(), ProcessRole::Main);
        assert_eq!(ProcessRole::Supervisor { workers: 2 }.label(1), "Master 1");
    }

    #[test]
    fn bad_ordinals_are_rejected() {
        assert!(ProcessRole::from_parts(Some("0"), None).is_err());
        assert!(ProcessRole::from_parts(Some("first"), None).is_err());
    }
}
