//! CLI definitions for Jarvis.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Jarvis CLI.
#[derive(Parser)]
#[command(name = "jarvis")]
#[command(about = "Runtime kernel for the Jarvis personal assistant")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (default: ~/.jarvis/config.toml)
    #[arg(short, long, env = "JARVIS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the kernel in the foreground until interrupted (default)
    Run,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Inspect the durable offline queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Validate the configuration and print warnings
    Check,

    /// Print the effective configuration as TOML
    Show,
}

#[derive(Subcommand)]
pub(crate) enum QueueAction {
    /// Show operation counts by status
    Stats {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List queued operations
    List {
        /// Only operations with this status (pending, processing, completed, failed, cancelled)
        #[arg(long)]
        status: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}
