//! # DevEnv Monitor - Remote Development Environment Backend
//!
//! Samples host CPU, memory and disk utilization on a fixed interval, keeps a
//! bounded history of snapshots, and pushes every snapshot live to dashboard
//! clients over WebSocket. Pull endpoints expose the latest snapshot, recent
//! history, Docker/SSH reachability and the `config.env` key-value store.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                            DEVENV MONITOR                                │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  TICK → SNAPSHOT PROVIDER → HISTORY BUFFER → EVENT BUS → SUBSCRIBERS     │
//! │                                   ↑                                      │
//! │               GATEWAY (HTTP pulls, WebSocket pushes, config store)       │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

pub mod broadcaster;
pub mod cli;
pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod history;
pub mod logging;
pub mod probe;
pub mod provider;
pub mod service;
pub mod snapshot;
pub mod store;

pub use broadcaster::{Broadcaster, BroadcasterHandle, BroadcasterMonitor, BroadcasterState, BroadcasterStats};
pub use config::Settings;
pub use error::{DevenvError, DevenvResult};
pub use event::{Event, EventBus};
pub use history::HistoryBuffer;
pub use provider::{HostProvider, SnapshotProvider};
pub use snapshot::{DiskUsage, MemoryUsage, Snapshot, Timestamp};
pub use store::ConfigStore;

// ============================================================================
// CONSTANTS & VERSION INFORMATION
// ============================================================================

/// Service version - follows semantic versioning
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SERVICE_NAME: &str = "devenv-monitor";
pub const SERVICE_FULL_NAME: &str = "DevEnv Monitor";

// ----------------------------------------------------------------------------
// History
// ----------------------------------------------------------------------------

/// Default number of snapshots retained in memory
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Default number of entries returned by the history endpoint
pub const DEFAULT_HISTORY_QUERY_LIMIT: usize = 20;

// ----------------------------------------------------------------------------
// Timing & Intervals
// ----------------------------------------------------------------------------

/// Default pause between successful broadcaster cycles (seconds)
pub const DEFAULT_BROADCAST_INTERVAL_SECS: u64 = 10;

/// Default pause after a failed cycle (seconds), 3x the normal interval
pub const DEFAULT_BACKOFF_SECS: u64 = 30;

/// Upper bound for a single capture before the cycle counts as failed (seconds)
pub const DEFAULT_CAPTURE_TIMEOUT_SECS: u64 = 15;

/// Window between the two CPU counter reads (milliseconds)
pub const DEFAULT_CPU_WINDOW_MS: u64 = 1000;

/// Minimum allowed broadcaster interval (milliseconds)
pub const MIN_BROADCAST_INTERVAL_MS: u64 = 100;

/// Timeout for the `docker ps` probe (seconds)
pub const DOCKER_PROBE_TIMEOUT_SECS: u64 = 5;

/// Timeout for the SSH host ping probe (seconds)
pub const PING_PROBE_TIMEOUT_SECS: u64 = 3;

/// Grace period for the broadcaster to stop after shutdown (seconds)
pub const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

// ----------------------------------------------------------------------------
// Network & Protocol
// ----------------------------------------------------------------------------

/// Default HTTP/WebSocket port (`API_PORT` in the env file)
pub const DEFAULT_API_PORT: u16 = 5001;

/// Capacity of the push channel; slower subscribers skip missed frames
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Default settings file
pub const DEFAULT_SETTINGS_PATH: &str = "devenv.toml";

/// Default env-file holding the dashboard key-value configuration
pub const DEFAULT_ENV_FILE: &str = "config.env";

/// Environment prefix for settings overrides
pub const SETTINGS_ENV_PREFIX: &str = "DEVENV_";
