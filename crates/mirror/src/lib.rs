//! mirror - incremental mailbox mirroring engine
//!
//! Pulls a remote mailbox into a local SQLite store without
//! re-downloading already-synced data, surviving crashes, network
//! flakiness, and very large mailboxes. This crate provides:
//! - Domain records (headers, full messages, content-addressed attachments)
//! - A MailboxConnector seam with an IMAP implementation
//! - Chunked fetch planning with bounded subdivision on failure
//! - Crash-safe file checkpoints keyed by (mailbox, mode)
//! - An idempotent, resumable sync engine and attachment extraction pass
//!
//! Authentication, CLI parsing, and the SQL presentation layer live
//! outside this crate: the engine receives an already-authenticated
//! session, and logging goes through the `log` facade with no backend
//! chosen here.

pub mod checkpoint;
pub mod chunk;
pub mod config;
pub mod connector;
pub mod error;
pub mod models;
pub mod storage;
pub mod sync;

pub use checkpoint::{CheckpointStore, RunLock};
pub use chunk::Chunk;
pub use config::SyncConfig;
pub use connector::{ImapConnector, MailboxConnector, MailboxStatus, SearchCriteria, TlsSession};
pub use error::{Result, SyncError};
pub use models::{
    AttachmentBlob, EmailAttachmentLink, EmailHeaderRecord, FullEmailRecord, MailboxState,
    SyncMode, SyncRun, SyncStatus,
};
pub use storage::{RecordStore, SqliteRecordStore};
pub use sync::{ExtractedPart, Extraction, SyncEngine, SyncStats, extract_parts, sync_mailboxes};
