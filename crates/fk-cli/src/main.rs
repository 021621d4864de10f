//! fwkeeper: keep declared Kubernetes port-forwards alive
//!
//! Loads the configuration, builds the cluster client, starts a supervisor
//! over every declared forward and then feeds it reload and shutdown
//! events until the process is asked to stop.

mod signals;
mod watcher;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fk_core::config::{load_config, LogsConfig};
use fk_core::RetryConfig;
use fk_kube::KubeClusterClient;
use fk_supervisor::{run_controller, Supervisor};

#[derive(Parser)]
#[command(name = "fwkeeper")]
#[command(about = "Port forwarding made easy")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "fwkeeper.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run fwkeeper in interactive mode
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => run(cli.config).await,
    }
}

async fn run(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;

    init_logging(&config.logs);
    banner();

    let (client, source) = KubeClusterClient::connect()
        .await
        .context("failed to initialize Kubernetes client")?;
    tracing::info!("Kubernetes config source: {source}");

    let supervisor = Arc::new(Supervisor::new(
        Arc::new(client),
        RetryConfig::default(),
    ));

    if let Err(err) = supervisor.start(&config.forwards) {
        supervisor.shutdown().await;
        anyhow::bail!("{err}");
    }

    let (event_tx, event_rx) = mpsc::unbounded_channel();

    // The watcher must stay alive for the lifetime of the controller loop
    let _watcher = watcher::watch_config(&config_path, event_tx.clone())?;
    signals::spawn_signal_handlers(event_tx);

    run_controller(&supervisor, &config_path, event_rx).await;

    tracing::info!("fwkeeper stopping...");
    supervisor.shutdown().await;
    tracing::info!("fwkeeper stopped");

    Ok(())
}

fn init_logging(logs: &LogsConfig) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| logs.effective_level().to_string()),
    );

    let registry = tracing_subscriber::registry().with(filter);
    if logs.pretty {
        registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn banner() {
    tracing::info!(r"----------------------------------------------");
    tracing::info!(r"   ___                                        ");
    tracing::info!(r"  / __\_      __/\ /\___  ___ _ __   ___ _ __ ");
    tracing::info!(r" / _\ \ \ /\ / / //_/ _ \/ _ \ '_ \ / _ \ '__|");
    tracing::info!(r"/ /    \ V  V / __ \  __/  __/ |_) |  __/ |   ");
    tracing::info!(r"\/      \_/\_/\/  \/\___|\___| .__/ \___|_|   ");
    tracing::info!(r"----------------------------------------------");
}
