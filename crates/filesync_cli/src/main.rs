//! Filesync CLI
//!
//! Keeps a local directory and a filesync server in step, and runs the
//! server itself.
//!
//! # Commands
//!
//! - `sync` - Reconcile, then watch both sides until Enter is pressed
//! - `serve` - Run the HTTP server with its push event stream
//! - `init-config` - Write example configuration files

mod commands;
mod config;
mod http_client;
mod http_server;
mod prompt;

use clap::{Parser, Subcommand, ValueEnum};
use filesync_engine::LocalOnlyPolicy;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Bidirectional directory synchronization.
#[derive(Parser)]
#[command(name = "filesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the configuration files
    #[arg(global = true, short, long, default_value = config::DEFAULT_CONFIG_DIR)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize the configured directory with the server
    Sync {
        /// Override the configured handling of local-only files
        #[arg(short, long, value_enum)]
        policy: Option<PolicyArg>,
    },

    /// Run the sync server
    Serve,

    /// Write example configuration files
    InitConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    /// Ask for each file
    Prompt,
    /// Push every local-only file
    Push,
    /// Delete every local-only file
    Delete,
}

impl From<PolicyArg> for LocalOnlyPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Prompt => LocalOnlyPolicy::Prompt,
            PolicyArg::Push => LocalOnlyPolicy::Push,
            PolicyArg::Delete => LocalOnlyPolicy::Delete,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Sync { policy } => {
            commands::sync::run(&cli.config, policy.map(LocalOnlyPolicy::from))?;
        }
        Commands::Serve => commands::serve::run(&cli.config)?,
        Commands::InitConfig => commands::init_config::run(&cli.config)?,
    }

    Ok(())
}
