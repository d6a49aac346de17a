//! Error taxonomy for sync runs
//!
//! The engine's control flow hangs off these variants: transient errors
//! are retried, protocol errors abort the run, parse errors are recorded
//! per message, storage errors are fatal, and a held run lock aborts
//! before any network activity.

use crate::models::SyncMode;

/// Errors surfaced by the connector, checkpoint store, and engine.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Network hiccup worth retrying (timeout, dropped connection).
    #[error("transient network error: {0}")]
    Transient(String),

    /// The server rejected the operation outright (e.g. unknown mailbox).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// One message's bytes could not be parsed.
    #[error("parse error for UID {uid}: {reason}")]
    Parse { uid: u32, reason: String },

    /// Checkpoint or record persistence failed. Fatal to the run; the
    /// prior valid checkpoint remains authoritative.
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),

    /// Another run already holds the lock for this (mailbox, mode).
    #[error("sync already running for {mailbox} ({mode})")]
    ConcurrentRun { mailbox: String, mode: SyncMode },
}

impl SyncError {
    /// Whether the engine may retry the failed operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::Storage(err)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
