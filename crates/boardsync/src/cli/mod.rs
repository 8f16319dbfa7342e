//! Command dispatch for the `boardsync` binary.

/// Clap argument definitions
mod args;

/// Config command handlers
mod config;

/// `watch` command: live event stream
mod watch;

use clap::Parser;
use std::path::PathBuf;

use boardsync_core::config::RealtimeConfig;

pub use args::Cli;
use args::Commands;

/// Main entry point for the CLI
pub fn run_cli() {
    let cli = Cli::parse();

    let config_path = match resolve_config_path(cli.config) {
        Some(path) => path,
        None => {
            eprintln!("✗ Could not determine config directory; pass --config <path>");
            std::process::exit(1);
        }
    };

    let success = match cli.command {
        Commands::Watch {
            server,
            token,
            rooms,
            json,
        } => watch::handle_watch(&config_path, server, &token, &rooms, json),

        Commands::Config { command } => config::handle_config_command(command, &config_path),
    };

    if !success {
        std::process::exit(1);
    }
}

/// Explicit `--config` wins over the platform config directory.
fn resolve_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| RealtimeConfig::default_path(dirs::config_dir()).ok())
}
