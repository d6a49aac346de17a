//! Sync run state machine
//!
//! One run drives a single (mailbox, mode) pair through
//! INIT -> DIFFING -> FETCHING -> PERSISTING, looping until the planned
//! chunks are exhausted, then lands on COMPLETED, ERROR, or INTERRUPTED.
//! Completion is defined by coverage of the work set, not by a moving
//! pointer alone: the failed-UID set can reintroduce UIDs below
//! last_uid.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;

use crate::checkpoint::CheckpointStore;
use crate::chunk::{self, Chunk};
use crate::config::SyncConfig;
use crate::connector::{MailboxConnector, SearchCriteria};
use crate::error::{Result, SyncError};
use crate::models::{EmailHeaderRecord, FullEmailRecord, MailboxState, SyncMode, SyncStatus};
use crate::storage::RecordStore;
use crate::sync::{SyncStats, attachments};

/// The two modes that pull data off the wire. Attachments runs as a
/// store-only pass and never reaches the fetch path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    Headers,
    Full,
}

impl FetchKind {
    fn mode(self) -> SyncMode {
        match self {
            FetchKind::Headers => SyncMode::Headers,
            FetchKind::Full => SyncMode::Full,
        }
    }
}

/// Orchestrates sync runs over one connector, one record store, and one
/// checkpoint directory.
pub struct SyncEngine<'a> {
    connector: &'a dyn MailboxConnector,
    store: &'a dyn RecordStore,
    checkpoints: &'a CheckpointStore,
    config: &'a SyncConfig,
    cancel: Arc<AtomicBool>,
}

impl<'a> SyncEngine<'a> {
    /// Build an engine. `cancel` is observed between chunks: setting it
    /// flushes the checkpoint and ends the run as INTERRUPTED.
    pub fn new(
        connector: &'a dyn MailboxConnector,
        store: &'a dyn RecordStore,
        checkpoints: &'a CheckpointStore,
        config: &'a SyncConfig,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            connector,
            store,
            checkpoints,
            config,
            cancel,
        }
    }

    /// Run one (mailbox, mode) sync to a terminal status.
    ///
    /// Safely re-invocable: the work set is re-derived from the
    /// persisted checkpoint, already-stored records are skipped, and a
    /// second concurrent run against the same key fails fast before any
    /// network activity.
    pub fn run(&self, mailbox: &str, mode: SyncMode) -> Result<SyncStats> {
        let started = std::time::Instant::now();
        let _lock = self.checkpoints.lock(mailbox, mode)?;

        let mut state = self.checkpoints.load(mailbox, mode)?;
        if state.was_interrupted() {
            log::info!("[SYNC] Previous {mode} run for {mailbox} did not finish; resuming");
        }
        state.mark_started();
        self.checkpoints.save(&state)?;

        let run_id = self
            .store
            .log_run_start(mailbox, mode, &format!("Starting {mode} sync for {mailbox}"))
            .map_err(SyncError::from)?;

        let outcome = match mode {
            SyncMode::Headers => self.run_fetch(mailbox, FetchKind::Headers, &mut state),
            SyncMode::Full => self.run_fetch(mailbox, FetchKind::Full, &mut state),
            SyncMode::Attachments => attachments::extract_mailbox(
                self.store,
                self.checkpoints,
                self.config,
                &self.cancel,
                mailbox,
                &mut state,
            ),
        };

        match outcome {
            Ok(mut stats) => {
                stats.duration_ms = started.elapsed().as_millis() as u64;
                let message = stats.summary();
                state.finish(stats.status, message.clone());
                self.checkpoints.save(&state)?;
                self.store
                    .log_run_end(run_id, stats.status, &message)
                    .map_err(SyncError::from)?;
                log::info!(
                    "[SYNC] {mode} sync for {mailbox} finished {}: {message}",
                    stats.status
                );
                Ok(stats)
            }
            Err(err) => {
                let message: String = err.to_string().chars().take(200).collect();
                state.finish(SyncStatus::Error, message.clone());
                // Best effort from here: the original error stays
                // authoritative, and the last flushed checkpoint is
                // already valid.
                if let Err(save_err) = self.checkpoints.save(&state) {
                    log::warn!("[SYNC] Failed to save checkpoint after error: {save_err}");
                }
                if let Err(log_err) = self.store.log_run_end(run_id, SyncStatus::Error, &message) {
                    log::warn!("[SYNC] Failed to finalise run log: {log_err}");
                }
                Err(err)
            }
        }
    }

    fn run_fetch(
        &self,
        mailbox: &str,
        kind: FetchKind,
        state: &mut MailboxState,
    ) -> Result<SyncStats> {
        let mode = kind.mode();
        let mut stats = SyncStats::new(mailbox, mode);

        // INIT -> DIFFING: cheap count first, full listing only when
        // feasible.
        let status = self.connector.mailbox_status(mailbox)?;
        if status.exists == 0 {
            log::info!("[SYNC] {mailbox} is empty");
            stats.status = SyncStatus::Completed;
            return Ok(stats);
        }

        // UIDNEXT bounds the listing: nothing new above the checkpoint
        // and no failures to retry means no listing at all.
        if let Some(uid_next) = status.uid_next
            && uid_next.saturating_sub(1) <= state.last_uid
            && state.failed_uids.is_empty()
        {
            log::info!("[SYNC] No UIDs above {} in {mailbox}", state.last_uid);
            stats.status = SyncStatus::Completed;
            return Ok(stats);
        }

        let remote = self.list_remote_uids(mailbox, status.exists, &mut stats)?;
        let work = compute_work_set(&remote, state);
        if work.is_empty() {
            log::info!("[SYNC] Nothing to fetch for {mailbox} ({mode})");
            stats.status = SyncStatus::Completed;
            return Ok(stats);
        }
        log::info!(
            "[SYNC] {} UIDs to attempt for {mailbox} ({mode}), resuming from UID > {}",
            work.len(),
            state.last_uid
        );

        // FETCHING / PERSISTING, one chunk at a time. Subdivided halves
        // go back on the front of the queue, so visitation order is not
        // monotonic; coverage is.
        let mut queue: VecDeque<(Chunk, u32)> = chunk::uid_chunks(&work, self.config.chunk_size)
            .into_iter()
            .map(|c| (c, 0))
            .collect();

        while let Some((next, depth)) = queue.pop_front() {
            // Cancellation is observed between chunks only; at most the
            // unflushed tail of the current chunk is re-attempted later.
            if self.cancel.load(Ordering::SeqCst) {
                log::info!("[SYNC] Stop signal observed; flushing checkpoint for {mailbox}");
                self.checkpoints.save(state)?;
                stats.status = SyncStatus::Interrupted;
                return Ok(stats);
            }

            let Chunk::Uids(uids) = next else { continue };
            let can_split = depth < self.config.max_split_depth;
            if let Some((a, b)) =
                self.process_uid_chunk(mailbox, kind, &uids, can_split, state, &mut stats)?
            {
                queue.push_front((b, depth + 1));
                queue.push_front((a, depth + 1));
                continue;
            }
            // Flush cadence is once per chunk, not per record.
            self.checkpoints.save(state)?;
        }

        stats.status = SyncStatus::Completed;
        Ok(stats)
    }

    /// Remote UID listing: flat search for ordinary mailboxes,
    /// month-chunked search for large ones, with the flat path falling
    /// back to date chunks when the server rejects it.
    fn list_remote_uids(
        &self,
        mailbox: &str,
        exists: u32,
        stats: &mut SyncStats,
    ) -> Result<BTreeSet<u32>> {
        if exists >= self.config.large_mailbox_threshold {
            log::info!("[SYNC] Large mailbox ({exists} messages); listing {mailbox} by date");
            return self.list_by_date(mailbox, stats);
        }

        match self.connector.search_uids(mailbox, &SearchCriteria::All) {
            Ok(uids) => Ok(uids.into_iter().collect()),
            Err(err) if err.is_transient() => {
                log::warn!(
                    "[SYNC] Flat listing failed for {mailbox} ({err}); falling back to date chunks"
                );
                self.list_by_date(mailbox, stats)
            }
            Err(err) => Err(err),
        }
    }

    fn list_by_date(&self, mailbox: &str, stats: &mut SyncStats) -> Result<BTreeSet<u32>> {
        let today = Utc::now().date_naive();
        let mut queue: VecDeque<(Chunk, u32)> =
            chunk::month_chunks(self.config.date_chunk_start_year, today)
                .into_iter()
                .map(|c| (c, 0))
                .collect();

        let mut uids = BTreeSet::new();
        while let Some((range, depth)) = queue.pop_front() {
            let Chunk::DateRange { since, before } = range else {
                continue;
            };
            let criteria = SearchCriteria::DateRange { since, before };
            match self.connector.search_uids(mailbox, &criteria) {
                Ok(found) => uids.extend(found),
                Err(err) if err.is_transient() => {
                    let range = Chunk::DateRange { since, before };
                    match range.subdivide() {
                        Some((a, b)) if depth < self.config.max_split_depth => {
                            log::warn!(
                                "[SYNC] Search failed for {mailbox} {since}..{before} ({err}); subdividing"
                            );
                            queue.push_front((b, depth + 1));
                            queue.push_front((a, depth + 1));
                        }
                        _ => {
                            // No enumerable members to record as failed;
                            // the range is surfaced in the stats and
                            // retried wholesale next run.
                            log::warn!(
                                "[SYNC] Giving up on {mailbox} range {since}..{before}: {err}"
                            );
                            stats.uncovered_ranges += 1;
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Ok(uids)
    }

    /// Fetch and persist one UID chunk. Returns the two halves to
    /// requeue when the whole chunk failed transiently and may still be
    /// subdivided; at the depth limit the members are recorded as
    /// failed instead.
    fn process_uid_chunk(
        &self,
        mailbox: &str,
        kind: FetchKind,
        uids: &[u32],
        can_split: bool,
        state: &mut MailboxState,
        stats: &mut SyncStats,
    ) -> Result<Option<(Chunk, Chunk)>> {
        // Records already in the store still advance the checkpoint.
        let mut to_fetch = Vec::with_capacity(uids.len());
        for &uid in uids {
            if self.record_exists(kind, uid, mailbox)? {
                stats.skipped += 1;
                state.record_success(uid);
            } else {
                to_fetch.push(uid);
            }
        }
        if to_fetch.is_empty() {
            return Ok(None);
        }

        let fetched = match self.fetch_batch(mailbox, kind, &to_fetch) {
            Ok(fetched) => fetched,
            Err(err) if err.is_transient() => {
                if can_split && let Some(halves) = Chunk::Uids(to_fetch.clone()).subdivide() {
                    log::warn!(
                        "[SYNC] Chunk of {} failed for {mailbox} ({err}); subdividing",
                        to_fetch.len()
                    );
                    return Ok(Some(halves));
                }
                log::warn!(
                    "[SYNC] Chunk of {} failed beyond split depth for {mailbox}: {err}",
                    to_fetch.len()
                );
                for uid in to_fetch {
                    state.record_failure(uid);
                    stats.failed += 1;
                }
                return Ok(None);
            }
            // A permanent protocol failure aborts the run.
            Err(err) => return Err(err),
        };

        let mut by_uid: BTreeMap<u32, Vec<u8>> = fetched.into_iter().collect();

        // Ascending UID order within the chunk.
        for &uid in &to_fetch {
            let raw = match by_uid.remove(&uid) {
                Some(raw) => Some(raw),
                None => self.fetch_single_with_retry(mailbox, kind, uid)?,
            };
            stats.processed += 1;

            let Some(raw) = raw else {
                state.record_failure(uid);
                stats.failed += 1;
                continue;
            };

            match self.persist(kind, mailbox, uid, raw) {
                Ok(true) => {
                    state.record_success(uid);
                    stats.saved += 1;
                }
                Ok(false) => {
                    state.record_success(uid);
                    stats.skipped += 1;
                }
                Err(SyncError::Parse { reason, .. }) => {
                    // One bad message never blocks the rest of the chunk.
                    log::warn!("[SYNC] UID {uid} in {mailbox} failed to parse: {reason}");
                    state.record_failure(uid);
                    stats.failed += 1;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(None)
    }

    /// Transient per-message failures get bounded retries with backoff
    /// before the UID is recorded as failed.
    fn fetch_single_with_retry(
        &self,
        mailbox: &str,
        kind: FetchKind,
        uid: u32,
    ) -> Result<Option<Vec<u8>>> {
        for attempt in 0..self.config.max_fetch_retries.max(1) {
            if attempt > 0 {
                std::thread::sleep(self.config.retry_delay(attempt - 1));
            }
            match self.fetch_batch(mailbox, kind, &[uid]) {
                Ok(mut fetched) => return Ok(fetched.pop().map(|(_, raw)| raw)),
                Err(err) if err.is_transient() => {
                    log::debug!(
                        "[SYNC] Retry {}/{} for UID {uid} in {mailbox}: {err}",
                        attempt + 1,
                        self.config.max_fetch_retries
                    );
                }
                Err(err) => return Err(err),
            }
        }
        log::warn!("[SYNC] UID {uid} in {mailbox} exhausted retries");
        Ok(None)
    }

    fn fetch_batch(
        &self,
        mailbox: &str,
        kind: FetchKind,
        uids: &[u32],
    ) -> Result<Vec<(u32, Vec<u8>)>> {
        match kind {
            FetchKind::Headers => self.connector.fetch_headers(mailbox, uids),
            FetchKind::Full => self.connector.fetch_full(mailbox, uids),
        }
    }

    fn record_exists(&self, kind: FetchKind, uid: u32, mailbox: &str) -> Result<bool> {
        let exists = match kind {
            FetchKind::Headers => self.store.has_header(uid, mailbox),
            FetchKind::Full => self.store.has_full_email(uid, mailbox),
        };
        exists.map_err(SyncError::from)
    }

    fn persist(&self, kind: FetchKind, mailbox: &str, uid: u32, raw: Vec<u8>) -> Result<bool> {
        match kind {
            FetchKind::Headers => {
                let record = EmailHeaderRecord::parse(uid, mailbox, &raw)?;
                self.store.insert_header(&record).map_err(SyncError::from)
            }
            FetchKind::Full => {
                let record = FullEmailRecord::from_raw(uid, mailbox, raw, Utc::now());
                self.store
                    .insert_full_email(&record)
                    .map_err(SyncError::from)
            }
        }
    }
}

/// Work set for one run: remote UIDs above the checkpoint's high-water
/// mark, plus previously failed UIDs that still exist remotely.
fn compute_work_set(remote: &BTreeSet<u32>, state: &MailboxState) -> Vec<u32> {
    let mut work: Vec<u32> = remote
        .iter()
        .copied()
        .filter(|&uid| uid > state.last_uid)
        .collect();
    work.extend(
        state
            .failed_uids
            .iter()
            .copied()
            .filter(|uid| remote.contains(uid)),
    );
    work.sort_unstable();
    work.dedup();
    work
}
