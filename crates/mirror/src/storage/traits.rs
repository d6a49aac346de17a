//! Record storage trait definitions

use anyhow::Result;

use crate::models::{
    AttachmentBlob, EmailAttachmentLink, EmailHeaderRecord, FullEmailRecord, SyncMode, SyncRun,
    SyncStatus,
};

/// Trait for durable record storage.
///
/// All inserts are idempotent: a record already present under its key is
/// left untouched and the insert reports `false`. Header and full-email
/// records are therefore never overwritten by a later run of the same
/// mode, and re-linking an attachment is a no-op.
pub trait RecordStore: Send + Sync {
    /// Insert a header record unless one exists for (uid, mailbox).
    /// Returns whether a new row was written.
    fn insert_header(&self, record: &EmailHeaderRecord) -> Result<bool>;

    /// Check if a header record exists for (uid, mailbox).
    fn has_header(&self, uid: u32, mailbox: &str) -> Result<bool>;

    /// Load one header record.
    fn get_header(&self, uid: u32, mailbox: &str) -> Result<Option<EmailHeaderRecord>>;

    /// Count header records in a mailbox.
    fn header_count(&self, mailbox: &str) -> Result<usize>;

    /// Insert a full-email record unless one exists for (uid, mailbox).
    /// Returns whether a new row was written.
    fn insert_full_email(&self, record: &FullEmailRecord) -> Result<bool>;

    /// Check if a full-email record exists for (uid, mailbox).
    fn has_full_email(&self, uid: u32, mailbox: &str) -> Result<bool>;

    /// Load one full-email record, raw bytes included.
    fn get_full_email(&self, uid: u32, mailbox: &str) -> Result<Option<FullEmailRecord>>;

    /// Count full-email records in a mailbox.
    fn full_email_count(&self, mailbox: &str) -> Result<usize>;

    /// Insert an attachment blob unless its hash is already present.
    /// Returns whether a new row was written.
    fn insert_attachment_blob(&self, blob: &AttachmentBlob) -> Result<bool>;

    /// Check if a blob with this hash exists.
    fn has_attachment_blob(&self, sha256: &str) -> Result<bool>;

    /// Insert a message-to-blob link unless an identical one exists.
    /// Returns whether a new row was written.
    fn insert_attachment_link(&self, link: &EmailAttachmentLink) -> Result<bool>;

    /// UIDs of full emails flagged as carrying attachments that have no
    /// link rows yet, ascending.
    fn pending_attachment_uids(&self, mailbox: &str) -> Result<Vec<u32>>;

    /// Count of distinct attachment blobs across the whole store.
    fn unique_blob_count(&self) -> Result<usize>;

    /// Count of attachment links for a mailbox.
    fn attachment_link_count(&self, mailbox: &str) -> Result<usize>;

    /// Append a run audit row; returns its id.
    fn log_run_start(&self, mailbox: &str, mode: SyncMode, message: &str) -> Result<i64>;

    /// Finalise a run audit row.
    fn log_run_end(&self, run_id: i64, status: SyncStatus, message: &str) -> Result<()>;

    /// Most recent run audit rows, newest first.
    fn recent_runs(&self, limit: usize) -> Result<Vec<SyncRun>>;
}
