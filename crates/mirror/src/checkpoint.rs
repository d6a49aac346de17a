//! Durable per-(mailbox, mode) checkpoints
//!
//! One JSON file per (mailbox, mode) pair under a configured directory.
//! Saves go through a temporary sibling followed by a rename, so an
//! interrupted write never corrupts the previous valid checkpoint. A
//! sibling lock marker gives one in-flight run exclusive ownership of
//! the key; a second run against the same key fails fast before any
//! network activity.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::Context;

use crate::error::{Result, SyncError};
use crate::models::{MailboxState, SyncMode};

/// File-backed checkpoint persistence.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Create a store rooted at `dir`. The directory is created lazily
    /// on first save or lock.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load the state for a (mailbox, mode) pair, or an initial empty
    /// state when no checkpoint exists yet. A checkpoint file that
    /// exists but cannot be parsed is a storage error, never silently
    /// replaced with an empty state.
    pub fn load(&self, mailbox: &str, mode: SyncMode) -> Result<MailboxState> {
        let path = self.state_path(mailbox, mode);
        if !path.exists() {
            return Ok(MailboxState::new(mailbox, mode));
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
        let state = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse checkpoint {}", path.display()))?;
        Ok(state)
    }

    /// Persist a state atomically: serialize to a temporary sibling,
    /// then rename over the previous file.
    pub fn save(&self, state: &MailboxState) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create checkpoint dir {}", self.dir.display()))?;

        let path = self.state_path(&state.mailbox, state.mode);
        let tmp_path = path.with_extension("tmp");

        let content = serde_json::to_string_pretty(state)
            .context("Failed to serialize checkpoint state")?;
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write checkpoint {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to replace checkpoint {}", path.display()))?;

        Ok(())
    }

    /// Claim exclusive run ownership of a (mailbox, mode) pair.
    ///
    /// Fails with [`SyncError::ConcurrentRun`] when the marker already
    /// exists. The marker is removed when the returned guard drops.
    pub fn lock(&self, mailbox: &str, mode: SyncMode) -> Result<RunLock> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create checkpoint dir {}", self.dir.display()))?;

        let path = self.lock_path(mailbox, mode);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => Ok(RunLock { path }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(SyncError::ConcurrentRun {
                mailbox: mailbox.to_string(),
                mode,
            }),
            Err(e) => Err(SyncError::Storage(anyhow::Error::new(e).context(format!(
                "Failed to create run lock {}",
                path.display()
            )))),
        }
    }

    fn state_path(&self, mailbox: &str, mode: SyncMode) -> PathBuf {
        self.dir
            .join(format!("{}.{}.json", sanitize(mailbox), mode.as_str()))
    }

    fn lock_path(&self, mailbox: &str, mode: SyncMode) -> PathBuf {
        self.dir
            .join(format!("{}.{}.lock", sanitize(mailbox), mode.as_str()))
    }
}

/// Exclusive run ownership of one (mailbox, mode) pair.
///
/// Dropping the guard releases the on-disk marker.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!(
                "[CHECKPOINT] Failed to remove run lock {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

/// Mailbox names like "[Gmail]/All Mail" must become single path
/// components.
fn sanitize(mailbox: &str) -> String {
    mailbox
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncStatus;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_returns_empty_state() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let state = store.load("INBOX", SyncMode::Headers).unwrap();
        assert_eq!(state.last_uid, 0);
        assert!(state.failed_uids.is_empty());
        assert!(state.start_time.is_none());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let mut state = MailboxState::new("INBOX", SyncMode::Headers);
        state.mark_started();
        state.record_success(5);
        state.record_failure(3);
        state.finish(SyncStatus::Completed, "processed 4");
        store.save(&state).unwrap();

        let loaded = store.load("INBOX", SyncMode::Headers).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let state = MailboxState::new("INBOX", SyncMode::Full);
        store.save(&state).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_states_keyed_by_mailbox_and_mode() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let mut headers = MailboxState::new("INBOX", SyncMode::Headers);
        headers.record_success(10);
        store.save(&headers).unwrap();

        let full = store.load("INBOX", SyncMode::Full).unwrap();
        assert_eq!(full.last_uid, 0);

        let other = store.load("Sent", SyncMode::Headers).unwrap();
        assert_eq!(other.last_uid, 0);

        assert_eq!(store.load("INBOX", SyncMode::Headers).unwrap().last_uid, 10);
    }

    #[test]
    fn test_corrupt_checkpoint_is_an_error() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let state = MailboxState::new("INBOX", SyncMode::Headers);
        store.save(&state).unwrap();

        let path = store.state_path("INBOX", SyncMode::Headers);
        fs::write(&path, "{ not json").unwrap();

        let err = store.load("INBOX", SyncMode::Headers).unwrap_err();
        assert!(matches!(err, SyncError::Storage(_)));
    }

    #[test]
    fn test_lock_conflict_fails_fast() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let _held = store.lock("INBOX", SyncMode::Headers).unwrap();
        let err = store.lock("INBOX", SyncMode::Headers).unwrap_err();
        assert!(matches!(err, SyncError::ConcurrentRun { .. }));

        // A different mode is an independent key.
        let _other = store.lock("INBOX", SyncMode::Full).unwrap();
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        {
            let _held = store.lock("INBOX", SyncMode::Headers).unwrap();
        }
        store.lock("INBOX", SyncMode::Headers).unwrap();
    }

    #[test]
    fn test_sanitized_mailbox_names() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let mut state = MailboxState::new("[Gmail]/All Mail", SyncMode::Headers);
        state.record_success(7);
        store.save(&state).unwrap();

        let loaded = store.load("[Gmail]/All Mail", SyncMode::Headers).unwrap();
        assert_eq!(loaded.last_uid, 7);
        assert_eq!(loaded.mailbox, "[Gmail]/All Mail");
    }
}
