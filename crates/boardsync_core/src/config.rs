//! Configuration types for the realtime client.
//!
//! This module provides the [`RealtimeConfig`] struct which holds the server
//! endpoint and every timing constant used by the connection scheduler and the
//! reconciliation engine. Configuration is persisted as TOML (typically at
//! `~/.config/boardsync/config.toml` on Unix systems).
//!
//! # Key Configuration Fields
//!
//! - `server_url` / `endpoint_path`: where the WebSocket lives
//! - `heartbeat_interval_ms`: how often a `ping` heartbeat is sent (0 disables)
//! - `reconnect_*` / `backoff`: reconnection policy after an abnormal close
//! - `duplicate_window_ms`: suppression window for redundant pushes
//! - `liveness_timeout_ms`: silence after which the socket is considered dead
//!
//! # Example
//!
//! ```ignore
//! use boardsync_core::config::RealtimeConfig;
//!
//! let config = RealtimeConfig::new("ws://localhost:8005");
//! assert_eq!(config.max_reconnect_attempts, 5);
//!
//! let config = RealtimeConfig::load_from(std::path::Path::new("config.toml"))?;
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Default WebSocket endpoint path appended to `server_url`.
pub const DEFAULT_ENDPOINT_PATH: &str = "/ws/connect";

/// Reconnection delay policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Wait `reconnect_delay_ms` before every attempt.
    #[default]
    Fixed,
    /// Double the delay on every attempt, capped at `max_reconnect_delay_ms`.
    Exponential,
}

/// Everything the realtime client lets the user configure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Base WebSocket URL (e.g., "wss://boards.example.com")
    pub server_url: String,

    /// Path of the WebSocket endpoint on the server
    pub endpoint_path: String,

    /// Interval between outbound `ping` heartbeats while connected (0 disables)
    pub heartbeat_interval_ms: u64,

    /// Base delay before a reconnection attempt
    pub reconnect_delay_ms: u64,

    /// Attempts allowed before the connection is marked as failed
    pub max_reconnect_attempts: u32,

    /// How the reconnection delay evolves between attempts
    pub backoff: BackoffPolicy,

    /// Upper bound for the exponential policy
    pub max_reconnect_delay_ms: u64,

    /// Window in which a repeated (entity, update type) push is discarded.
    /// Zero disables suppression.
    pub duplicate_window_ms: u64,

    /// Inbound silence tolerated before the socket is force-closed.
    /// Zero disables the liveness check.
    pub liveness_timeout_ms: u64,

    /// Delay after which a local typing indicator is automatically stopped
    pub typing_timeout_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8005".to_string(),
            endpoint_path: DEFAULT_ENDPOINT_PATH.to_string(),
            heartbeat_interval_ms: 25_000,
            reconnect_delay_ms: 3_000,
            max_reconnect_attempts: 5,
            backoff: BackoffPolicy::Fixed,
            max_reconnect_delay_ms: 30_000,
            duplicate_window_ms: 100,
            liveness_timeout_ms: 60_000,
            typing_timeout_ms: 3_000,
        }
    }
}

impl RealtimeConfig {
    /// Create a config with default timings for the given server
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Heartbeat interval, or `None` when heartbeats are disabled
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    /// Duplicate suppression window as a [`Duration`]
    pub fn duplicate_window(&self) -> Duration {
        Duration::from_millis(self.duplicate_window_ms)
    }

    /// Liveness timeout, or `None` when the check is disabled
    pub fn liveness_timeout(&self) -> Option<Duration> {
        (self.liveness_timeout_ms > 0).then(|| Duration::from_millis(self.liveness_timeout_ms))
    }

    /// Typing auto-stop delay as a [`Duration`]
    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }

    /// Delay before reconnection attempt number `attempt` (1-based).
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let base = self.reconnect_delay_ms;
        let millis = match self.backoff {
            BackoffPolicy::Fixed => base,
            BackoffPolicy::Exponential => {
                let shift = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1u64 << shift)
                    .min(self.max_reconnect_delay_ms.max(base))
            }
        };
        Duration::from_millis(millis)
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| SyncError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Load config from a path, returning defaults if it is missing or invalid.
    pub fn load_from_or_default(path: &Path) -> Self {
        match Self::load_from(path) {
            Ok(config) => config,
            Err(e) => {
                log::debug!("[Config] Using defaults ({})", e);
                Self::default()
            }
        }
    }

    /// Save config to a specific path, creating the parent directory if needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(|e| SyncError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Default config file location for the given application directory name.
    pub fn default_path(config_dir: Option<PathBuf>) -> Result<PathBuf> {
        config_dir
            .map(|dir| dir.join("boardsync").join("config.toml"))
            .ok_or(SyncError::NoConfigDir)
    }
}
