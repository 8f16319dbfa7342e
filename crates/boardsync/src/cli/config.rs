//! Config command handlers

use boardsync_core::config::RealtimeConfig;
use std::path::Path;

use crate::cli::args::ConfigCommands;

/// Returns true on success, false on error
pub fn handle_config_command(command: Option<ConfigCommands>, path: &Path) -> bool {
    match command {
        None | Some(ConfigCommands::Show) => {
            show_config(path);
            true
        }
        Some(ConfigCommands::Init { server, force }) => init_config(path, server, force),
        Some(ConfigCommands::Path) => {
            println!("{}", path.display());
            true
        }
    }
}

fn show_config(path: &Path) {
    let config = RealtimeConfig::load_from_or_default(path);

    println!("Boardsync Configuration");
    println!("=======================");
    if path.exists() {
        println!("Config file: {}", path.display());
    } else {
        println!("Config file: {} (not created, showing defaults)", path.display());
    }
    println!();
    println!("Server:              {}{}", config.server_url, config.endpoint_path);
    match config.heartbeat_interval() {
        Some(interval) => println!("Heartbeat interval:  {} ms", interval.as_millis()),
        None => println!("Heartbeat interval:  (disabled)"),
    }
    println!(
        "Reconnect:           {} ms, {:?}, up to {} attempts",
        config.reconnect_delay_ms, config.backoff, config.max_reconnect_attempts
    );
    println!("Max reconnect delay: {} ms", config.max_reconnect_delay_ms);
    println!("Duplicate window:    {} ms", config.duplicate_window_ms);
    match config.liveness_timeout() {
        Some(timeout) => println!("Liveness timeout:    {} ms", timeout.as_millis()),
        None => println!("Liveness timeout:    (disabled)"),
    }
    println!("Typing timeout:      {} ms", config.typing_timeout_ms);
}

fn init_config(path: &Path, server: Option<String>, force: bool) -> bool {
    if path.exists() && !force {
        eprintln!("✗ Config already exists at {}", path.display());
        eprintln!("  Use --force to overwrite it.");
        return false;
    }

    let config = match server {
        Some(server) => RealtimeConfig::new(server),
        None => RealtimeConfig::default(),
    };

    match config.save_to(path) {
        Ok(()) => {
            println!("✓ Wrote config to {}", path.display());
            println!("  Server: {}", config.server_url);
            true
        }
        Err(e) => {
            eprintln!("✗ Error writing config: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boardsync").join("config.toml");

        assert!(init_config(&path, Some("wss://boards.test".to_string()), false));
        let loaded = RealtimeConfig::load_from(&path).unwrap();
        assert_eq!(loaded.server_url, "wss://boards.test");
        assert_eq!(loaded.max_reconnect_attempts, 5);
    }

    #[test]
    fn test_init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        assert!(init_config(&path, None, false));
        assert!(!init_config(&path, Some("wss://other.test".to_string()), false));
        assert!(init_config(&path, Some("wss://other.test".to_string()), true));
        assert_eq!(
            RealtimeConfig::load_from(&path).unwrap().server_url,
            "wss://other.test"
        );
    }
}
