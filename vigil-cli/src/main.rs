//! Vigil daemon entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use vigil_config::Config;
use vigil_engine::command::SelfCheckCommand;
use vigil_engine::{Daemon, SystemClock};

#[derive(Parser)]
#[command(name = "vigil", version, about = "Distributed monitoring core")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "/etc/vigil/vigil.toml")]
    config: PathBuf,

    /// Log filter, overriding the configuration (tracing EnvFilter syntax)
    #[arg(long)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the configuration and exit
    CheckSyntax,
    /// Run the monitoring engine
    Daemon,
}

fn init_tracing(filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    let filter = cli
        .log_filter
        .clone()
        .unwrap_or_else(|| config.engine.log_filter.clone());
    init_tracing(&filter);

    match cli.command {
        Command::CheckSyntax => {
            println!("Configuration OK: {}", cli.config.display());
            Ok(())
        }
        Command::Daemon => run_daemon(config).await,
    }
}

async fn run_daemon(config: Config) -> Result<()> {
    let rt = vigil_config::build_runtime(&config, Arc::new(SystemClock))
        .context("failed to build runtime")?;

    // the engine's built-in self check is always available
    rt.register_check_command(Arc::new(SelfCheckCommand));

    let daemon = Daemon::new(rt.clone(), config.engine.concurrent_checks_max);
    daemon.start();

    tracing::info!(
        node = %rt.node_name(),
        checkables = rt.checkables_snapshot().len(),
        "vigil daemon running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for ctrl-c")?;

    tracing::info!("shutting down");
    daemon.shutdown().await;

    Ok(())
}
