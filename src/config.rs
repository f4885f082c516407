//! Configuration for the sync engine.
//!
//! # Example
//!
//! ```
//! use habit_sync::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.connectivity_interval_secs, 30);
//!
//! // Full config
//! let config = SyncConfig {
//!     db_path: Some("habit_sync.db".into()),
//!     connectivity_interval_secs: 10,
//!     sweep_interval_secs: 30,
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;

/// Configuration for the sync engine.
///
/// All fields have sensible defaults. Configure `db_path` for persistence
/// across restarts; without it the engine runs memory-only (useful in tests).
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// SQLite file backing the persisted cache tier and operation queue.
    /// `None` means memory-only operation (no durability across restarts).
    #[serde(default)]
    pub db_path: Option<String>,

    /// Connectivity poll interval in seconds (default: 30)
    #[serde(default = "default_connectivity_interval_secs")]
    pub connectivity_interval_secs: u64,

    /// Cache expiry sweep interval in seconds (default: 60)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// How many days of completion history a full resync pulls
    #[serde(default = "default_resync_window_days")]
    pub resync_window_days: u32,
}

fn default_connectivity_interval_secs() -> u64 { 30 }
fn default_sweep_interval_secs() -> u64 { 60 }
fn default_resync_window_days() -> u32 { 90 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            connectivity_interval_secs: default_connectivity_interval_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            resync_window_days: default_resync_window_days(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(config.db_path.is_none());
        assert_eq!(config.connectivity_interval_secs, 30);
        assert_eq!(config.sweep_interval_secs, 60);
        assert_eq!(config.resync_window_days, 90);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"db_path": "sync.db", "connectivity_interval_secs": 5}"#)
                .unwrap();
        assert_eq!(config.db_path.as_deref(), Some("sync.db"));
        assert_eq!(config.connectivity_interval_secs, 5);
        // Unspecified fields fall back to defaults
        assert_eq!(config.sweep_interval_secs, 60);
    }
}
