// src/config.rs
//
// =============================================================================
// WORKCELL CORE: CONFIGURATION
// =============================================================================
//
// Layered config: environment first (for worker processes launched by a
// dispatcher with no CLI), overridable by explicit CLI flags in main.rs.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Cooperative poll granularity used while waiting on a lock timeout
    /// (spec §5 — "a cooperative poll; no blocking call into the store").
    pub lock_poll_interval: Duration,

    /// Default `timeout_seconds` for `acquire_asset_lock` when the caller
    /// doesn't supply one explicitly.
    pub default_lock_timeout: Option<Duration>,

    /// Capacity of the in-memory log ring buffer.
    pub log_buffer_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("workcell.db"),
            lock_poll_interval: Duration::from_millis(200),
            default_lock_timeout: None,
            log_buffer_capacity: 500,
        }
    }
}

impl CoreConfig {
    /// Loads configuration from `WORKCELL_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(path) = std::env::var("WORKCELL_DATABASE_PATH") {
            cfg.database_path = PathBuf::from(path);
        }
        if let Ok(ms) = std::env::var("WORKCELL_LOCK_POLL_INTERVAL_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                cfg.lock_poll_interval = Duration::from_millis(ms);
            }
        }
        if let Ok(secs) = std::env::var("WORKCELL_DEFAULT_LOCK_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                cfg.default_lock_timeout = Some(Duration::from_secs(secs));
            }
        }
        if let Ok(cap) = std::env::var("WORKCELL_LOG_BUFFER_CAPACITY") {
            if let Ok(cap) = cap.parse::<usize>() {
                cfg.log_buffer_capacity = cap;
            }
        }

        cfg
    }
}
