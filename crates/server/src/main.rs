use std::path::PathBuf;

use clap::Parser;
use tracing::Instrument;

use hive_infra::config::{Config, ConfigOverrides, WorkerCount};
use hive_observability::LogSettings;
use hive_server::context::{ProcessContext, ProcessRole};

#[derive(Debug, Parser)]
#[command(name = "hive", version, about = "Clustered RBAC service host")]
struct Cli {
    /// Port to listen on.
    port: Option<u16>,

    /// Host to bind.
    host: Option<String>,

    /// JSON config file.
    #[arg(short, long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Run N workers, or one per core when N is omitted.
    #[arg(short = 'j', long, num_args = 0..=1, default_missing_value = "auto")]
    cluster: Option<WorkerCount>,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_overrides(ConfigOverrides {
        port: cli.port,
        host: cli.host,
        cluster: cli.cluster,
        verbose: cli.verbose,
    });
    config.apply_env();

    hive_observability::init(&LogSettings {
        level: config.log_level.clone(),
        file: config.log_file.clone(),
    })?;

    let role = ProcessRole::detect(config.cluster.resolve())?;
    let span = hive_observability::process_span(&role.label(std::process::id()));

    if config.uses_dev_secret() && !matches!(role, ProcessRole::Supervisor { .. }) {
        span.in_scope(|| {
            tracing::warn!("jwt secret not configured; using insecure dev default");
        });
    }

    let code = hive_server::process::run(ProcessContext::new(config, role))
        .instrument(span)
        .await?;
    std::process::exit(code);
}
