//! sessionmond — polls HAProxy stats pages and forwards backend session
//! counts to the configured sinks.
//!
//! # Usage
//!
//! ```text
//! sessionmond --config /etc/sessionmon/sessionmon.toml
//! ```
//!
//! Exits with status 2 on configuration errors and 1 on any other startup
//! failure.

mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use sessionmon_core::Config;
use sessionmon_monitor::Supervisor;

#[derive(Parser)]
#[command(name = "sessionmond", version, about = "HAProxy session monitor")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "PATH")]
    config: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("sessionmond: {e}");
            return ExitCode::from(2);
        }
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("sessionmond: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn run(config: Config) -> anyhow::Result<()> {
    logging::init(&config.logging)?;
    info!(
        sinks = config.sinks.len(),
        servers = config.servers.len(),
        "sessionmond starting"
    );

    let supervisor = Supervisor::from_config(&config).await?;
    supervisor.run(shutdown_signal()).await;

    info!("sessionmond stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
