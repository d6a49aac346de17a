//! SQLite-based record storage with zstd-compressed raw messages

use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::traits::RecordStore;
use crate::models::{
    AttachmentBlob, EmailAttachmentLink, EmailHeaderRecord, FullEmailRecord, SyncMode, SyncRun,
    SyncStatus,
};

/// zstd level for raw message bytes (speed over ratio)
const COMPRESSION_LEVEL: i32 = 3;

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks
/// which migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Envelope headers, one row per (uid, mailbox)
            CREATE TABLE email_headers (
                uid INTEGER NOT NULL,
                mailbox TEXT NOT NULL,
                msg_from TEXT NOT NULL DEFAULT '',
                msg_to TEXT NOT NULL DEFAULT '',
                msg_cc TEXT NOT NULL DEFAULT '',
                subject TEXT NOT NULL DEFAULT '',
                msg_date TEXT,
                PRIMARY KEY (uid, mailbox)
            );

            CREATE INDEX idx_email_headers_mailbox ON email_headers(mailbox);
            CREATE INDEX idx_email_headers_from ON email_headers(msg_from);
            CREATE INDEX idx_email_headers_date ON email_headers(msg_date);

            -- Complete raw messages with metadata derived once at insert
            CREATE TABLE full_emails (
                uid INTEGER NOT NULL,
                mailbox TEXT NOT NULL,
                raw_email BLOB NOT NULL,  -- zstd compressed
                fetched_at TEXT NOT NULL,
                has_attachments INTEGER NOT NULL DEFAULT 0,
                size_kb INTEGER NOT NULL DEFAULT 0,
                is_html INTEGER NOT NULL DEFAULT 0,
                is_plain_text INTEGER NOT NULL DEFAULT 0,
                has_images INTEGER NOT NULL DEFAULT 0,
                in_reply_to TEXT,
                message_id TEXT,
                PRIMARY KEY (uid, mailbox)
            );

            CREATE INDEX idx_full_emails_mailbox ON full_emails(mailbox);
            CREATE INDEX idx_full_emails_has_attachments
                ON full_emails(has_attachments);
            CREATE INDEX idx_full_emails_size ON full_emails(size_kb);
            CREATE INDEX idx_full_emails_message_id ON full_emails(message_id);
            CREATE INDEX idx_full_emails_in_reply_to ON full_emails(in_reply_to);

            -- Content-addressed attachment bodies
            CREATE TABLE attachment_blobs (
                sha256 TEXT PRIMARY KEY,
                content BLOB NOT NULL,
                size INTEGER NOT NULL,
                fetched_at TEXT NOT NULL
            );

            CREATE INDEX idx_attachment_blobs_size ON attachment_blobs(size);

            -- Message-part to blob links (many links per blob)
            CREATE TABLE email_attachments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uid INTEGER NOT NULL,
                mailbox TEXT NOT NULL,
                sha256 TEXT NOT NULL REFERENCES attachment_blobs(sha256),
                filename TEXT NOT NULL DEFAULT '',
                fetched_at TEXT NOT NULL,
                UNIQUE (uid, mailbox, sha256, filename)
            );

            CREATE INDEX idx_email_attachments_uid_mailbox
                ON email_attachments(uid, mailbox);
            CREATE INDEX idx_email_attachments_sha256
                ON email_attachments(sha256);

            -- Append-only run audit log
            CREATE TABLE sync_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mailbox TEXT NOT NULL,
                mode TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                status TEXT,
                message TEXT NOT NULL DEFAULT ''
            );
            "#,
        ),
        // Migration 2: Reporting view joining links, blobs, and headers
        M::up(
            r#"
            CREATE VIEW attachment_info AS
            SELECT ea.id, ea.uid, ea.mailbox, ea.filename,
                   ab.size, ab.sha256, ea.fetched_at,
                   eh.msg_date, eh.msg_from, eh.msg_to, eh.subject
            FROM email_attachments ea
            JOIN attachment_blobs ab ON ea.sha256 = ab.sha256
            LEFT JOIN email_headers eh
                ON ea.uid = eh.uid AND ea.mailbox = eh.mailbox;
            "#,
        ),
    ])
}

/// SQLite-backed record store.
///
/// Raw message bytes are compressed with zstd on the way in and
/// decompressed transparently on the way out; everything queryable stays
/// in plain columns.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open (or create) the store at `db_path` and bring the schema to
    /// the latest migration.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL keeps readers unblocked during sync writes; NORMAL sync is
        // safe under WAL. foreign_keys must be ON for the blob reference
        // on email_attachments.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl RecordStore for SqliteRecordStore {
    fn insert_header(&self, record: &EmailHeaderRecord) -> Result<bool> {
        let conn = self.conn.lock().unwrap();

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO email_headers
             (uid, mailbox, msg_from, msg_to, msg_cc, subject, msg_date)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                record.uid as i64,
                record.mailbox,
                record.from,
                record.to,
                record.cc,
                record.subject,
                record.date,
            ],
        )?;

        Ok(inserted > 0)
    }

    fn has_header(&self, uid: u32, mailbox: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM email_headers WHERE uid = ? AND mailbox = ?",
            params![uid as i64, mailbox],
            |row| row.get(0),
        )?;

        Ok(count > 0)
    }

    fn get_header(&self, uid: u32, mailbox: &str) -> Result<Option<EmailHeaderRecord>> {
        let conn = self.conn.lock().unwrap();

        let row: Option<(String, String, String, String, Option<String>)> = conn
            .query_row(
                "SELECT msg_from, msg_to, msg_cc, subject, msg_date
                 FROM email_headers WHERE uid = ? AND mailbox = ?",
                params![uid as i64, mailbox],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(from, to, cc, subject, date)| EmailHeaderRecord {
            uid,
            mailbox: mailbox.to_string(),
            from,
            to,
            cc,
            subject,
            date,
        }))
    }

    fn header_count(&self, mailbox: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM email_headers WHERE mailbox = ?",
            [mailbox],
            |row| row.get(0),
        )?;

        Ok(count as usize)
    }

    fn insert_full_email(&self, record: &FullEmailRecord) -> Result<bool> {
        let compressed = zstd::encode_all(record.raw_bytes.as_slice(), COMPRESSION_LEVEL)
            .context("Failed to compress raw message")?;

        let conn = self.conn.lock().unwrap();

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO full_emails
             (uid, mailbox, raw_email, fetched_at, has_attachments, size_kb,
              is_html, is_plain_text, has_images, in_reply_to, message_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.uid as i64,
                record.mailbox,
                compressed,
                record.fetched_at.to_rfc3339(),
                record.has_attachments,
                record.size_kb as i64,
                record.is_html,
                record.is_plain_text,
                record.has_images,
                record.in_reply_to,
                record.message_id,
            ],
        )?;

        Ok(inserted > 0)
    }

    fn has_full_email(&self, uid: u32, mailbox: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM full_emails WHERE uid = ? AND mailbox = ?",
            params![uid as i64, mailbox],
            |row| row.get(0),
        )?;

        Ok(count > 0)
    }

    fn get_full_email(&self, uid: u32, mailbox: &str) -> Result<Option<FullEmailRecord>> {
        let conn = self.conn.lock().unwrap();

        let row: Option<(
            Vec<u8>,
            String,
            bool,
            i64,
            bool,
            bool,
            bool,
            Option<String>,
            Option<String>,
        )> = conn
            .query_row(
                "SELECT raw_email, fetched_at, has_attachments, size_kb,
                        is_html, is_plain_text, has_images, in_reply_to, message_id
                 FROM full_emails WHERE uid = ? AND mailbox = ?",
                params![uid as i64, mailbox],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            compressed,
            fetched_at_str,
            has_attachments,
            size_kb,
            is_html,
            is_plain_text,
            has_images,
            in_reply_to,
            message_id,
        )) = row
        else {
            return Ok(None);
        };

        let raw_bytes = zstd::decode_all(compressed.as_slice())
            .context("Failed to decompress raw message")?;

        let fetched_at = DateTime::parse_from_rfc3339(&fetched_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        // Derived fields come back from their columns, not from a fresh
        // parse of raw_bytes.
        Ok(Some(FullEmailRecord {
            uid,
            mailbox: mailbox.to_string(),
            raw_bytes,
            fetched_at,
            has_attachments,
            size_kb: size_kb as u32,
            is_html,
            is_plain_text,
            has_images,
            in_reply_to,
            message_id,
        }))
    }

    fn full_email_count(&self, mailbox: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM full_emails WHERE mailbox = ?",
            [mailbox],
            |row| row.get(0),
        )?;

        Ok(count as usize)
    }

    fn insert_attachment_blob(&self, blob: &AttachmentBlob) -> Result<bool> {
        let conn = self.conn.lock().unwrap();

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO attachment_blobs (sha256, content, size, fetched_at)
             VALUES (?, ?, ?, ?)",
            params![
                blob.sha256,
                blob.content,
                blob.size as i64,
                blob.fetched_at.to_rfc3339(),
            ],
        )?;

        Ok(inserted > 0)
    }

    fn has_attachment_blob(&self, sha256: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM attachment_blobs WHERE sha256 = ?",
            [sha256],
            |row| row.get(0),
        )?;

        Ok(count > 0)
    }

    fn insert_attachment_link(&self, link: &EmailAttachmentLink) -> Result<bool> {
        let conn = self.conn.lock().unwrap();

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO email_attachments
             (uid, mailbox, sha256, filename, fetched_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                link.uid as i64,
                link.mailbox,
                link.sha256,
                link.filename,
                link.fetched_at.to_rfc3339(),
            ],
        )?;

        Ok(inserted > 0)
    }

    fn pending_attachment_uids(&self, mailbox: &str) -> Result<Vec<u32>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT fe.uid FROM full_emails fe
             WHERE fe.mailbox = ?
               AND fe.has_attachments = 1
               AND NOT EXISTS (
                   SELECT 1 FROM email_attachments ea
                   WHERE ea.uid = fe.uid AND ea.mailbox = fe.mailbox
               )
             ORDER BY fe.uid",
        )?;

        let uids = stmt
            .query_map([mailbox], |row| row.get::<_, i64>(0).map(|uid| uid as u32))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(uids)
    }

    fn unique_blob_count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();

        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM attachment_blobs", [], |row| row.get(0))?;

        Ok(count as usize)
    }

    fn attachment_link_count(&self, mailbox: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM email_attachments WHERE mailbox = ?",
            [mailbox],
            |row| row.get(0),
        )?;

        Ok(count as usize)
    }

    fn log_run_start(&self, mailbox: &str, mode: SyncMode, message: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO sync_runs (mailbox, mode, started_at, status, message)
             VALUES (?, ?, ?, 'STARTED', ?)",
            params![mailbox, mode.as_str(), Utc::now().to_rfc3339(), message],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn log_run_end(&self, run_id: i64, status: SyncStatus, message: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "UPDATE sync_runs SET finished_at = ?, status = ?, message = ? WHERE id = ?",
            params![Utc::now().to_rfc3339(), status.as_str(), message, run_id],
        )?;

        Ok(())
    }

    fn recent_runs(&self, limit: usize) -> Result<Vec<SyncRun>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, mailbox, mode, started_at, finished_at, status, message
             FROM sync_runs ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut runs = Vec::with_capacity(rows.len());
        for (id, mailbox, mode_str, started_str, finished_str, status_str, message) in rows {
            let mode = SyncMode::from_str(&mode_str)
                .map_err(|e| anyhow::anyhow!("sync_runs row {id}: {e}"))?;
            let status = status_str
                .as_deref()
                .map(SyncStatus::from_str)
                .transpose()
                .map_err(|e| anyhow::anyhow!("sync_runs row {id}: {e}"))?;

            let started_at = DateTime::parse_from_rfc3339(&started_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            let finished_at = finished_str.as_deref().and_then(|s| {
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
            });

            runs.push(SyncRun {
                id,
                mailbox,
                mode,
                started_at,
                finished_at,
                status,
                message,
            });
        }

        Ok(runs)
    }
}
