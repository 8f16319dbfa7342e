#![doc = include_str!("../README.md")]

/// CLI module - command-line interface for boardsync
mod cli;

fn main() {
    env_logger::init();
    cli::run_cli();
}
