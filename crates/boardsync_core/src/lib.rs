#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Callback registry shared by handlers and subscribers
pub mod callback_registry;

/// Client (the handle the UI layer holds)
pub mod client;

/// Configuration options
pub mod config;

/// Error (common error types)
pub mod error;

/// Presence (online users and typing indicators)
pub mod presence;

/// Protocol (envelope, message types, control frames)
pub mod protocol;

/// Reconciliation (entity stores, optimistic mutations, REST seam)
pub mod reconcile;

/// Rooms (identifiers and the subscription tracker)
pub mod rooms;

/// Router (validation and per-type dispatch)
pub mod router;

/// Heartbeat and reconnection scheduling
pub mod scheduler;

/// Transport (the single physical connection)
pub mod transport;

/// Native tokio driver
#[cfg(all(feature = "native-sync", not(target_arch = "wasm32")))]
pub mod native;

mod locks;

pub use client::{ClientEvent, RealtimeClient};
pub use config::RealtimeConfig;
pub use error::{Result, SyncError};
