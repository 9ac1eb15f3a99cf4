//! Learner CLI - tracks learned IR/RF codes into device and profile records.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use learner::server::{run_server, ServerState};
use learner::{DestinationHint, JsonOriginStore, Learner, LearnerConfig, OriginReader};

/// Learner - resolve asynchronously learned codes into their destinations.
#[derive(Parser)]
#[command(name = "learner")]
#[command(about = "Command learning reconciler")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory of controller storage files
    #[arg(long, global = true, env = "LEARNER_ORIGIN_DIR")]
    origin_dir: Option<PathBuf>,

    /// Device document
    #[arg(long, global = true, env = "LEARNER_DEVICES_FILE")]
    devices_file: Option<PathBuf>,

    /// Profile library root
    #[arg(long, global = true, env = "LEARNER_PROFILES_DIR")]
    profiles_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the reconciliation loop and the submission API
    Serve {
        /// Listen address
        #[arg(long, env = "LEARNER_BIND_ADDR")]
        bind: Option<String>,

        /// Seconds between origin scans
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Seconds after submission before the broadened search runs
        #[arg(long)]
        fallback_at: Option<u64>,

        /// Seconds after submission before an operation fails
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Print the current origin snapshot as JSON
    Scan,

    /// Show where a destination hint resolves to
    Resolve {
        /// Device id, or manufacturer and model of a profile
        hint: String,

        /// Restrict profile matching to one platform
        #[arg(long)]
        platform: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("learner=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("learner=info,warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let mut config = LearnerConfig::from_env();
    if let Some(dir) = cli.origin_dir {
        config.origin_dir = dir;
    }
    if let Some(file) = cli.devices_file {
        config.devices_file = file;
    }
    if let Some(dir) = cli.profiles_dir {
        config.profiles_dir = dir;
    }

    match cli.command {
        Commands::Serve {
            bind,
            poll_interval,
            fallback_at,
            timeout,
        } => {
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if let Some(secs) = poll_interval {
                config.timing.poll_interval = Duration::from_secs(secs);
            }
            if let Some(secs) = fallback_at {
                config.timing.fallback_at = Duration::from_secs(secs);
            }
            if let Some(secs) = timeout {
                config.timing.timeout = Duration::from_secs(secs);
            }
            run_serve(config).await
        }
        Commands::Scan => run_scan(&config).await,
        Commands::Resolve { hint, platform } => run_resolve(&config, hint, platform).await,
    }
}

async fn run_serve(config: LearnerConfig) -> Result<()> {
    config.validate().context("Invalid learner configuration")?;

    info!(
        origin_dir = %config.origin_dir.display(),
        devices_file = %config.devices_file.display(),
        profiles_dir = %config.profiles_dir.display(),
        bind_addr = %config.bind_addr,
        "Starting learner"
    );

    let learner = Learner::from_config(&config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconciler = learner.reconciler.clone();
    let mut loop_rx = shutdown_rx;
    let loop_handle = tokio::spawn(async move {
        reconciler
            .run(async move {
                let _ = loop_rx.changed().await;
            })
            .await;
    });

    let state = Arc::new(ServerState {
        service: learner.service,
    });
    let shutdown = async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    };

    run_server(state, &config.bind_addr, shutdown)
        .await
        .context("Learner server failed")?;
    loop_handle
        .await
        .context("Reconciliation loop panicked")?;

    Ok(())
}

async fn run_scan(config: &LearnerConfig) -> Result<()> {
    let reader = OriginReader::new(Arc::new(JsonOriginStore::new(&config.origin_dir)));
    let snapshot = reader.scan().await;
    println!(
        "{}",
        serde_json::to_string_pretty(&snapshot).context("Failed to serialize snapshot")?
    );
    Ok(())
}

async fn run_resolve(config: &LearnerConfig, hint: String, platform: Option<String>) -> Result<()> {
    let learner = Learner::from_config(config);
    let mut hint = DestinationHint::new(hint);
    hint.platform = platform;

    let resolution = learner
        .service
        .resolver()
        .resolve(&hint)
        .await
        .context("Failed to read destination stores")?;
    println!("{}", serde_json::to_string_pretty(&resolution)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
