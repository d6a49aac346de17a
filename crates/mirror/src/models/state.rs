//! Per-(mailbox, mode) sync progress state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// What a sync run mirrors for a mailbox.
///
/// A closed set handled by exhaustive matching; checkpoint files and the
/// run audit log use the lowercase names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Mirror envelope headers only.
    Headers,
    /// Mirror complete raw messages.
    Full,
    /// Extract attachments from already-mirrored full messages.
    Attachments,
}

impl SyncMode {
    /// Stable name used in checkpoint file names and audit rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Headers => "headers",
            SyncMode::Full => "full",
            SyncMode::Attachments => "attachments",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "headers" => Ok(SyncMode::Headers),
            "full" => Ok(SyncMode::Full),
            "attachments" => Ok(SyncMode::Attachments),
            other => Err(format!("unknown sync mode: {other}")),
        }
    }
}

/// Outcome of a run as persisted in the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Started,
    Completed,
    Error,
    Interrupted,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Started => "STARTED",
            SyncStatus::Completed => "COMPLETED",
            SyncStatus::Error => "ERROR",
            SyncStatus::Interrupted => "INTERRUPTED",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(SyncStatus::Started),
            "COMPLETED" => Ok(SyncStatus::Completed),
            "ERROR" => Ok(SyncStatus::Error),
            "INTERRUPTED" => Ok(SyncStatus::Interrupted),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// Durable progress for one (mailbox, mode) pair.
///
/// Created on the first run, mutated throughout, persisted at bounded
/// intervals; never deleted, only overwritten.
///
/// `last_uid` advances to the highest successfully processed UID; failed
/// UIDs are tracked independently in `failed_uids` and never gate
/// advancement. A consumer reading `last_uid` alone sees high-water
/// progress and must consult `failed_uids` for gaps below it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailboxState {
    pub mailbox: String,
    pub mode: SyncMode,
    pub last_uid: u32,
    pub failed_uids: BTreeSet<u32>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub message: String,
}

impl MailboxState {
    /// Empty state for a pair that has never synced.
    pub fn new(mailbox: impl Into<String>, mode: SyncMode) -> Self {
        Self {
            mailbox: mailbox.into(),
            mode,
            last_uid: 0,
            failed_uids: BTreeSet::new(),
            start_time: None,
            end_time: None,
            status: SyncStatus::Started,
            message: String::new(),
        }
    }

    /// Mark the start of a run.
    pub fn mark_started(&mut self) {
        self.status = SyncStatus::Started;
        self.start_time = Some(Utc::now());
        self.end_time = None;
        self.message.clear();
    }

    /// Mark the end of a run with its terminal status.
    pub fn finish(&mut self, status: SyncStatus, message: impl Into<String>) {
        self.status = status;
        self.end_time = Some(Utc::now());
        self.message = message.into();
    }

    /// A UID was fetched and persisted. Clears any earlier failure and
    /// advances the high-water mark.
    pub fn record_success(&mut self, uid: u32) {
        self.failed_uids.remove(&uid);
        if uid > self.last_uid {
            self.last_uid = uid;
        }
    }

    /// A UID could not be processed. The high-water mark is unchanged so
    /// the UID stays visible to the next run's diff.
    pub fn record_failure(&mut self, uid: u32) {
        self.failed_uids.insert(uid);
    }

    /// Whether a previous run ended without reaching a terminal status.
    pub fn was_interrupted(&self) -> bool {
        self.status == SyncStatus::Started && self.end_time.is_none() && self.start_time.is_some()
    }
}

/// One row of the append-only run audit log.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRun {
    pub id: i64,
    pub mailbox: String,
    pub mode: SyncMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: Option<SyncStatus>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_advances_high_water_mark() {
        let mut state = MailboxState::new("INBOX", SyncMode::Headers);
        state.record_success(5);
        state.record_success(3);
        assert_eq!(state.last_uid, 5);
    }

    #[test]
    fn test_failure_does_not_advance() {
        let mut state = MailboxState::new("INBOX", SyncMode::Full);
        state.record_success(2);
        state.record_failure(9);
        assert_eq!(state.last_uid, 2);
        assert!(state.failed_uids.contains(&9));
    }

    #[test]
    fn test_success_clears_failure() {
        let mut state = MailboxState::new("INBOX", SyncMode::Headers);
        state.record_failure(3);
        state.record_success(3);
        assert!(state.failed_uids.is_empty());
        assert_eq!(state.last_uid, 3);
    }

    #[test]
    fn test_serialization_layout() {
        let mut state = MailboxState::new("INBOX", SyncMode::Headers);
        state.record_failure(3);
        state.record_success(5);

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["last_uid"], 5);
        assert_eq!(json["failed_uids"], serde_json::json!([3]));
        assert_eq!(json["status"], "STARTED");
        assert_eq!(json["mode"], "headers");

        let back: MailboxState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_interrupted_detection() {
        let mut state = MailboxState::new("INBOX", SyncMode::Headers);
        assert!(!state.was_interrupted());
        state.mark_started();
        assert!(state.was_interrupted());
        state.finish(SyncStatus::Completed, "done");
        assert!(!state.was_interrupted());
    }
}
