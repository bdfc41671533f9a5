//! CLI module for turnstream
//!
//! Provides commands:
//! - `serve`: Run the HTTP service (default)
//! - `watch`: Follow a session from a running service

use clap::{Parser, Subcommand, ValueEnum};

use crate::server::AppConfig;

pub mod watch;

/// Turnstream CLI
#[derive(Parser, Debug)]
#[command(name = "turnstream")]
#[command(about = "Session event streaming for analysis pipelines")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server (default)
    Serve,
    /// Print a session's events as they happen
    Watch {
        /// Session id
        session_id: String,
        /// Read path to start with
        #[arg(long, value_enum, default_value_t = WatchMode::Sse)]
        mode: WatchMode,
        /// Print what the trace holds now (short poll) and exit
        #[arg(long)]
        once: bool,
        /// Service URL (overrides relay.backend_url)
        #[arg(long)]
        backend: Option<String>,
    },
}

/// How `watch` reads a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WatchMode {
    /// Live stream first, trace polling after
    Sse,
    /// Trace polling only
    Trace,
}

/// Run the CLI command
pub async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    match cli.command {
        None | Some(Commands::Serve) => crate::server::run(config).await,
        Some(Commands::Watch {
            session_id,
            mode,
            once,
            backend,
        }) => {
            let options = watch::WatchOptions {
                backend_url: backend.unwrap_or_else(|| config.relay.backend_url.clone()),
                mode,
                once,
            };
            watch::run(&session_id, &options, &config.relay).await
        }
    }
}
