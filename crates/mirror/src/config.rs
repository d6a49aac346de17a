//! Sync engine configuration
//!
//! One explicit [`SyncConfig`] value is constructed at startup and passed
//! into the engine. Nothing here is process-global or mutable; callers
//! that want file-backed settings go through [`SyncConfig::load`], which
//! reads `~/.config/mailvault/sync.json` when present.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Settings filename in the mailvault config directory
const CONFIG_FILE: &str = "sync.json";

/// Tuning knobs for sync runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Number of UIDs fetched per chunk.
    pub chunk_size: usize,
    /// Records processed between checkpoint flushes in the attachment
    /// extraction pass (fetch modes flush once per chunk).
    pub emails_per_flush: usize,
    /// Attempts per message before its UID is recorded as failed.
    pub max_fetch_retries: u32,
    /// Base delay for per-message retry backoff; doubles per attempt.
    pub retry_base_delay_ms: u64,
    /// Message count at which UID listing switches to date-based chunks.
    pub large_mailbox_threshold: u32,
    /// First year covered by date-based listing.
    pub date_chunk_start_year: i32,
    /// How many times a failing chunk is subdivided before its member
    /// UIDs are recorded as failed.
    pub max_split_depth: u32,
    /// Directory holding per-(mailbox, mode) checkpoint files.
    pub checkpoint_dir: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: 250,
            emails_per_flush: 20,
            max_fetch_retries: 3,
            retry_base_delay_ms: 1000,
            large_mailbox_threshold: 10_000,
            date_chunk_start_year: 2004,
            max_split_depth: 3,
            checkpoint_dir: config::config_path("checkpoints")
                .unwrap_or_else(|| PathBuf::from("checkpoints")),
        }
    }
}

impl SyncConfig {
    /// Load settings from ~/.config/mailvault/sync.json, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self> {
        config::load_json_or_default(CONFIG_FILE)
    }

    /// Backoff delay before the given retry attempt (0-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms << attempt.min(6))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.chunk_size, 250);
        assert_eq!(cfg.max_fetch_retries, 3);
        assert_eq!(cfg.large_mailbox_threshold, 10_000);
        assert!(cfg.max_split_depth > 0);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let cfg: SyncConfig = serde_json::from_str(r#"{ "chunk_size": 50 }"#).unwrap();
        assert_eq!(cfg.chunk_size, 50);
        assert_eq!(cfg.max_fetch_retries, SyncConfig::default().max_fetch_retries);
    }

    #[test]
    fn test_retry_delay_doubles() {
        let cfg = SyncConfig {
            retry_base_delay_ms: 100,
            ..Default::default()
        };
        assert_eq!(cfg.retry_delay(0), Duration::from_millis(100));
        assert_eq!(cfg.retry_delay(1), Duration::from_millis(200));
        assert_eq!(cfg.retry_delay(2), Duration::from_millis(400));
    }
}
