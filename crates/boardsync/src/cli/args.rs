//! Command-line argument structures and enums

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "boardsync")]
#[command(version)]
#[command(about = "Follow real-time project board updates from the terminal", long_about = None)]
pub struct Cli {
    /// Override config file location
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect and print every event until Ctrl+C
    Watch {
        /// Server URL (overrides the config file)
        #[arg(short, long)]
        server: Option<String>,

        /// Bearer token used to authenticate the socket
        #[arg(short, long)]
        token: String,

        /// Room to join, as kind:id (e.g., "project:42"); repeatable
        #[arg(short, long = "room")]
        rooms: Vec<String>,

        /// Pretty-print entity records
        #[arg(long)]
        json: bool,
    },

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Write a config file with default timings
    Init {
        /// Server URL to store
        #[arg(short, long)]
        server: Option<String>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the config file location
    Path,
}
