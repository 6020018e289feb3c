//! droverd — the Drover daemon.
//!
//! # Usage
//!
//! ```text
//! droverd init --program /usr/local/bin/consumer
//! droverd check --config drover.toml
//! droverd probe --config drover.toml
//! droverd run --config drover.toml --listen 0.0.0.0:9464
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use drover_core::DroverConfig;
use drover_telemetry::{BrokerMonitor, ProcessingTimeTracker};
use droverd::Daemon;

const DEFAULT_FILTER: &str = "info,droverd=debug,drover=debug";

#[derive(Parser)]
#[command(name = "droverd", about = "Drover queue-driven worker autoscaler")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitor, the scaling controller, and the status API.
    Run {
        /// Path to drover.toml.
        #[arg(long, short, default_value = "drover.toml")]
        config: PathBuf,

        /// Address for the status API.
        #[arg(long, default_value = "0.0.0.0:9464")]
        listen: SocketAddr,

        /// Override scaler.max_workers.
        #[arg(long)]
        max_workers: Option<u32>,
    },

    /// Poll the broker once and print the resulting snapshot.
    Probe {
        #[arg(long, short, default_value = "drover.toml")]
        config: PathBuf,
    },

    /// Validate a config file and print it with defaults filled in.
    Check {
        #[arg(long, short, default_value = "drover.toml")]
        config: PathBuf,
    },

    /// Write a starter drover.toml.
    Init {
        /// Where to write the file.
        #[arg(long, default_value = "drover.toml")]
        path: PathBuf,

        /// Worker executable.
        #[arg(long)]
        program: String,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            config,
            listen,
            max_workers,
        } => run(&config, listen, max_workers).await,
        Command::Probe { config } => probe(&config).await,
        Command::Check { config } => check(&config),
        Command::Init {
            path,
            program,
            force,
        } => init(&path, &program, force),
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<DroverConfig> {
    DroverConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

async fn run(config_path: &Path, listen: SocketAddr, max_workers: Option<u32>) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "drover daemon starting");

    let mut config = load_config(config_path)?;
    if let Some(max) = max_workers {
        config.scaler.max_workers = max;
    }

    let daemon = Daemon::build(config)?;
    if let Err(e) = daemon.start() {
        daemon.shutdown().await;
        return Err(e);
    }

    let listener = match tokio::net::TcpListener::bind(listen).await {
        Ok(l) => l,
        Err(e) => {
            daemon.shutdown().await;
            return Err(e).with_context(|| format!("binding status API on {listen}"));
        }
    };
    info!(%listen, "status API listening");

    let served = axum::serve(listener, daemon.router())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    daemon.shutdown().await;
    served?;

    info!("drover daemon stopped");
    Ok(())
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

async fn probe(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    config.broker.validate()?;
    config.scaler.validate()?;

    let monitor = BrokerMonitor::new(
        config.broker.clone(),
        ProcessingTimeTracker::new(config.tracker.window_capacity),
        config.scaler.target_response_time,
    );
    let snapshot = monitor.poll().await;
    let required = drover_autoscale::calculate_required_workers(&snapshot, config.scaler.max_workers);

    let report = serde_json::json!({
        "snapshot": snapshot,
        "required_workers": required,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn check(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    config.validate()?;
    print!("{}", config.to_toml_string()?);
    info!(config = %config_path.display(), "configuration is valid");
    Ok(())
}

fn init(path: &Path, program: &str, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    DroverConfig::scaffold(program).write_to(path)?;
    info!(path = %path.display(), "wrote starter config");
    Ok(())
}
