//! Sync engine
//!
//! Provides idempotent, resumable sync runs that can be safely retried:
//! the engine state machine, the attachment extraction pass, and a
//! parallel driver for independent (mailbox, mode) pairs.

mod attachments;
mod engine;

pub use attachments::{ExtractedPart, Extraction, extract_parts};
pub use engine::SyncEngine;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use rayon::prelude::*;

use crate::checkpoint::CheckpointStore;
use crate::config::SyncConfig;
use crate::connector::MailboxConnector;
use crate::error::Result;
use crate::models::{SyncMode, SyncStatus};
use crate::storage::RecordStore;

/// Statistics from one sync run.
#[derive(Debug, Clone)]
pub struct SyncStats {
    pub mailbox: String,
    pub mode: SyncMode,
    /// UIDs (or, for attachments, messages) attempted this run.
    pub processed: usize,
    /// New records or links written.
    pub saved: usize,
    /// Work skipped: records already present, or malformed/empty parts.
    pub skipped: usize,
    /// Failures recorded against the checkpoint this run.
    pub failed: usize,
    /// Date ranges the listing phase gave up on (their messages will be
    /// seen again next run).
    pub uncovered_ranges: usize,
    /// Terminal status of the run.
    pub status: SyncStatus,
    pub duration_ms: u64,
}

impl SyncStats {
    pub(crate) fn new(mailbox: &str, mode: SyncMode) -> Self {
        Self {
            mailbox: mailbox.to_string(),
            mode,
            processed: 0,
            saved: 0,
            skipped: 0,
            failed: 0,
            uncovered_ranges: 0,
            status: SyncStatus::Started,
            duration_ms: 0,
        }
    }

    /// Counts line used for checkpoint and audit messages.
    pub fn summary(&self) -> String {
        format!(
            "processed {}, saved {}, skipped {}, failed {}",
            self.processed, self.saved, self.skipped, self.failed
        )
    }
}

/// Run several (mailbox, mode) pairs, each against its own connector
/// and its own checkpoint key.
///
/// Parallelism exists only across pairs; within a pair every operation
/// stays ordered on one logical connection. One pair failing does not
/// cancel the others. Results come back in input order.
pub fn sync_mailboxes<F>(
    make_connector: F,
    store: &dyn RecordStore,
    checkpoints: &CheckpointStore,
    config: &SyncConfig,
    cancel: Arc<AtomicBool>,
    pairs: &[(String, SyncMode)],
) -> Vec<Result<SyncStats>>
where
    F: Fn(&str) -> Result<Box<dyn MailboxConnector>> + Sync,
{
    pairs
        .par_iter()
        .map(|(mailbox, mode)| {
            let connector = make_connector(mailbox)?;
            let engine = SyncEngine::new(
                connector.as_ref(),
                store,
                checkpoints,
                config,
                cancel.clone(),
            );
            engine.run(mailbox, *mode)
        })
        .collect()
}
