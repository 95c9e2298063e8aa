//! Jarvis - runtime kernel for a personal assistant
//!
//! Main entry point for the Jarvis CLI.

mod cli;
mod cmd_config;
mod cmd_queue;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use jarvis_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig};
use jarvis_core::{Kernel, KernelServices};

use cli::{Cli, Commands};
use cmd_config::handle_config_command;
use cmd_queue::handle_queue_command;

fn log_dir(config: &Config) -> PathBuf {
    config
        .logging
        .dir
        .clone()
        .unwrap_or_else(|| config.kernel.data_dir.join("logs"))
}

/// Initialize tracing with console and file output.
///
/// Log files are written to `<data_dir>/logs` with daily rotation.
fn init_tracing(logging: &LoggingConfig, log_dir: PathBuf) -> anyhow::Result<()> {
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("jarvis")
        .filename_suffix("log")
        .max_log_files(14)
        .build(&log_dir)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Keeps the writer flushing for the life of the process.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let file_layer = if logging.json {
        fmt::layer()
            .json()
            .with_writer(non_blocking)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .boxed()
    };
    let console_layer = logging
        .console
        .then(|| fmt::layer().with_target(true).with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load_or_default(cli.config.as_deref()).context("loading config")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            init_tracing(&config.logging, log_dir(&config))?;
            run_kernel(config).await
        }
        Commands::Config { action } => handle_config_command(action, &config),
        Commands::Queue { action } => handle_queue_command(action, &config).await,
    }
}

/// Run the kernel in the foreground until Ctrl-C.
async fn run_kernel(config: Config) -> anyhow::Result<()> {
    info!("Starting Jarvis v{}", env!("CARGO_PKG_VERSION"));

    let warnings = ConfigValidator::validate(&config)?.into_result()?;
    for warning in warnings {
        warn!("Config {}: {}", warning.path, warning.message);
    }
    info!("Data directory: {}", config.kernel.data_dir.display());

    let kernel = Kernel::new(config, KernelServices::default()).await?;
    kernel.start().await?;
    info!("Kernel running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Shutdown requested");

    if let Err(e) = kernel.stop().await {
        error!("Shutdown finished with errors: {}", e);
        return Err(e.into());
    }
    Ok(())
}
