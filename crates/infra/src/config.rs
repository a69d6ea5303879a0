//! Configuration loading and representation.
//!
//! Precedence, lowest first: built-in defaults, the JSON config file,
//! environment (`HIVE_JWT_SECRET`), command-line overrides.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use hive_auth::RbacSeed;

/// Secret used when none is configured. Only fit for local development.
pub const DEV_JWT_SECRET: &str = "dev-secret";

/// Environment variable overriding [`Config::jwt_secret`].
pub const JWT_SECRET_ENV: &str = "HIVE_JWT_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid worker count '{0}' (expected a number or \"auto\")")]
    InvalidWorkerCount(String),

    #[error("{workers} workers cannot share the process-local store '{db}'; configure a postgres:// store")]
    UnsharedStore { workers: usize, db: String },
}

/// How many worker processes to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerCount {
    /// Single process, no supervisor.
    #[default]
    Off,
    /// One worker per logical core.
    Auto,
    Fixed(usize),
}

impl WorkerCount {
    /// Number of workers to spawn, or `None` for single-process mode.
    pub fn resolve(self) -> Option<usize> {
        match self {
            WorkerCount::Off | WorkerCount::Fixed(0) => None,
            WorkerCount::Auto => Some(
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1),
            ),
            WorkerCount::Fixed(n) => Some(n),
        }
    }
}

impl FromStr for WorkerCount {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "true" => Ok(WorkerCount::Auto),
            "off" | "false" => Ok(WorkerCount::Off),
            other => other
                .parse::<usize>()
                .map(WorkerCount::Fixed)
                .map_err(|_| ConfigError::InvalidWorkerCount(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for WorkerCount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Count(usize),
            Named(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => Ok(WorkerCount::Auto),
            Raw::Flag(false) => Ok(WorkerCount::Off),
            Raw::Count(n) => Ok(WorkerCount::Fixed(n)),
            Raw::Named(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Process configuration, shared by supervisor and workers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub host: String,
    /// `None` runs the service detached from any listening socket.
    pub port: Option<u16>,
    /// Store connection string: `postgres://…` or `memory://`.
    pub db: String,
    /// Pub/sub connection string: `redis://…` or `memory://`.
    pub redis: String,
    pub cluster: WorkerCount,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub jwt_secret: String,
    /// JSON RBAC seed; the built-in seed is used when unset.
    pub rbac_seed: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: Some(8000),
            db: "memory://".to_string(),
            redis: "memory://".to_string(),
            cluster: WorkerCount::Off,
            log_level: "info".to_string(),
            log_file: None,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            rbac_seed: None,
        }
    }
}

/// Command-line overrides, applied last.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub cluster: Option<WorkerCount>,
    pub verbose: bool,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(port) = overrides.port {
            self.port = Some(port);
        }
        if let Some(host) = overrides.host {
            self.host = host;
        }
        if let Some(cluster) = overrides.cluster {
            self.cluster = cluster;
        }
        if overrides.verbose {
            self.log_level = "debug".to_string();
        }
    }

    pub fn apply_env(&mut self) {
        if let Ok(secret) = std::env::var(JWT_SECRET_ENV) {
            if !secret.is_empty() {
                self.jwt_secret = secret;
            }
        }
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }

    /// Public base URL of the service.
    pub fn site(&self) -> String {
        match self.port {
            Some(port) => format!("http://{}:{}", self.host, port),
            None => format!("http://{}", self.host),
        }
    }

    /// Every worker must see the same RBAC state, so a cluster needs a store
    /// that lives outside the worker processes.
    pub fn check_shared_store(&self, workers: usize) -> Result<(), ConfigError> {
        if workers > 1 && self.db.starts_with("memory:") {
            return Err(ConfigError::UnsharedStore {
                workers,
                db: self.db.clone(),
            });
        }
        Ok(())
    }

    pub fn load_seed(&self) -> Result<RbacSeed, ConfigError> {
        let Some(path) = &self.rbac_seed else {
            return Ok(RbacSeed::builtin());
        };
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.clone(),
            message: e.to_string(),
        })?;
        RbacSeed::from_json(&raw).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            message: e.to_string(),
        })
    }
}
