//! Tracing/logging initialization.
//!
//! JSON lines with timestamps go to stderr and, optionally, to an append-only
//! log file. `RUST_LOG` wins over the configured level when set.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `"info"`.
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    #[error("cannot open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(settings: &LogSettings) -> Result<(), ObservabilityError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let stderr = fmt::layer()
        .json()
        .with_timer(SystemTime)
        .with_target(false)
        .with_writer(std::io::stderr);

    let file = match &settings.file {
        Some(path) => {
            let handle = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| ObservabilityError::LogFile {
                    path: path.clone(),
                    source,
                })?;
            Some(
                fmt::layer()
                    .json()
                    .with_timer(SystemTime)
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(Mutex::new(handle)),
            )
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .try_init();
    Ok(())
}

/// Root span entered by every process, labelled e.g. `"Worker 4242"`.
pub fn process_span(label: &str) -> ::tracing::Span {
    ::tracing::info_span!("process", label = %label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sink_receives_json_lines() {
        let path = std::env::temp_dir().join(format!("hive-observability-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);

        init(&LogSettings {
            level: "info".to_string(),
            file: Some(path.clone()),
        })
        .unwrap();

        let span = process_span("Main 1");
        let _entered = span.enter();
        ::tracing::info!(marker = "file-sink-check", "hello from the test");

        let contents = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        let line = contents
            .lines()
            .find(|l| l.contains("file-sink-check"))
            .expect("event written to log file");
        assert!(line.contains("\"timestamp\""));
        assert!(line.contains("Main 1"));
    }

    #[test]
    fn unwritable_log_file_is_reported() {
        let dir = std::env::temp_dir();
        let err = init(&LogSettings {
            level: "info".to_string(),
            file: Some(dir),
        })
        .unwrap_err();
        assert!(matches!(err, ObservabilityError::LogFile { .. }));
    }
}
