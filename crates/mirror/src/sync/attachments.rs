//! Content-addressed attachment extraction
//!
//! A separate pass over already-mirrored full messages; it never touches
//! the network. Identical content anywhere in the corpus lands in
//! exactly one blob row, however many messages reference it.

use std::sync::atomic::{AtomicBool, Ordering};

use mailparse::{DispositionType, ParsedMail};

use crate::checkpoint::CheckpointStore;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::models::{AttachmentBlob, EmailAttachmentLink, MailboxState, SyncMode, SyncStatus};
use crate::storage::RecordStore;
use crate::sync::SyncStats;

/// One qualifying MIME part, transfer-decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPart {
    pub filename: String,
    pub content: Vec<u8>,
}

/// Parts extracted from one message, plus the count of parts skipped as
/// malformed or empty.
#[derive(Debug, Default)]
pub struct Extraction {
    pub parts: Vec<ExtractedPart>,
    pub skipped_parts: usize,
}

/// Extract qualifying attachment parts from raw message bytes.
///
/// A part qualifies if it carries an attachment content-disposition, or
/// is inline with both a filename and a non-text content type. Parts
/// whose content cannot be decoded are skipped and counted, never
/// failing the enclosing message.
pub fn extract_parts(uid: u32, raw: &[u8]) -> Result<Extraction> {
    let parsed = mailparse::parse_mail(raw).map_err(|e| SyncError::Parse {
        uid,
        reason: e.to_string(),
    })?;

    let mut extraction = Extraction::default();
    walk(&parsed, &mut extraction);
    Ok(extraction)
}

fn walk(part: &ParsedMail<'_>, out: &mut Extraction) {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            walk(sub, out);
        }
        return;
    }

    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned());
    let is_text = part.ctype.mimetype.to_ascii_lowercase().starts_with("text/");

    let qualifies = match disposition.disposition {
        DispositionType::Attachment => true,
        DispositionType::Inline => filename.is_some() && !is_text,
        _ => false,
    };
    if !qualifies {
        return;
    }

    match part.get_body_raw() {
        Ok(content) if content.is_empty() => out.skipped_parts += 1,
        Ok(content) => out.parts.push(ExtractedPart {
            filename: filename.unwrap_or_default(),
            content,
        }),
        Err(e) => {
            log::debug!("[ATTACH] Skipping undecodable part: {e}");
            out.skipped_parts += 1;
        }
    }
}

/// Run the extraction pass over every stored full email in `mailbox`
/// flagged as carrying attachments and not yet linked, plus any UIDs
/// that failed to parse in earlier passes.
pub(crate) fn extract_mailbox(
    store: &dyn RecordStore,
    checkpoints: &CheckpointStore,
    config: &SyncConfig,
    cancel: &AtomicBool,
    mailbox: &str,
    state: &mut MailboxState,
) -> Result<SyncStats> {
    let mut stats = SyncStats::new(mailbox, SyncMode::Attachments);

    let mut uids = store
        .pending_attachment_uids(mailbox)
        .map_err(SyncError::from)?;
    uids.extend(state.failed_uids.iter().copied());
    uids.sort_unstable();
    uids.dedup();

    if uids.is_empty() {
        stats.status = SyncStatus::Completed;
        return Ok(stats);
    }
    log::info!("[ATTACH] {} messages to scan in {mailbox}", uids.len());

    let mut since_flush = 0usize;
    for uid in uids {
        if cancel.load(Ordering::SeqCst) {
            checkpoints.save(state)?;
            stats.status = SyncStatus::Interrupted;
            return Ok(stats);
        }

        let Some(record) = store
            .get_full_email(uid, mailbox)
            .map_err(SyncError::from)?
        else {
            // A failed UID from an earlier run whose record never landed;
            // the full-mode sync owns re-fetching it.
            continue;
        };

        stats.processed += 1;
        match extract_parts(uid, &record.raw_bytes) {
            Ok(extraction) => {
                stats.skipped += extraction.skipped_parts;
                for part in extraction.parts {
                    let blob = AttachmentBlob::from_content(part.content);
                    let sha256 = blob.sha256.clone();
                    // Content is only written when the hash is new.
                    if !store
                        .has_attachment_blob(&sha256)
                        .map_err(SyncError::from)?
                    {
                        store.insert_attachment_blob(&blob).map_err(SyncError::from)?;
                    }

                    let link = EmailAttachmentLink::new(uid, mailbox, sha256, part.filename);
                    if store.insert_attachment_link(&link).map_err(SyncError::from)? {
                        stats.saved += 1;
                    }
                }
                state.record_success(uid);
            }
            Err(SyncError::Parse { reason, .. }) => {
                log::warn!("[ATTACH] UID {uid} in {mailbox} failed to parse: {reason}");
                state.record_failure(uid);
                stats.failed += 1;
            }
            Err(err) => return Err(err),
        }

        since_flush += 1;
        if since_flush >= config.emails_per_flush.max(1) {
            checkpoints.save(state)?;
            since_flush = 0;
        }
    }

    checkpoints.save(state)?;
    log::info!(
        "[ATTACH] {mailbox} pass done: {} new links, {} unique blobs in store",
        stats.saved,
        store.unique_blob_count().map_err(SyncError::from)?
    );
    stats.status = SyncStatus::Completed;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multipart_with_attachment(filename: &str, body_b64: &str) -> Vec<u8> {
        format!(
            "From: a@b.c\r\n\
Content-Type: multipart/mixed; boundary=\"B\"\r\n\r\n\
--B\r\n\
Content-Type: text/plain\r\n\r\n\
see attached\r\n\
--B\r\n\
Content-Type: application/octet-stream\r\n\
Content-Disposition: attachment; filename=\"{filename}\"\r\n\
Content-Transfer-Encoding: base64\r\n\r\n\
{body_b64}\r\n\
--B--\r\n"
        )
        .into_bytes()
    }

    #[test]
    fn test_extracts_attachment_part() {
        // "hello world" base64-encoded.
        let raw = multipart_with_attachment("greeting.bin", "aGVsbG8gd29ybGQ=");
        let extraction = extract_parts(1, &raw).unwrap();
        assert_eq!(extraction.parts.len(), 1);
        assert_eq!(extraction.parts[0].filename, "greeting.bin");
        assert_eq!(extraction.parts[0].content, b"hello world");
        assert_eq!(extraction.skipped_parts, 0);
    }

    #[test]
    fn test_text_body_does_not_qualify() {
        let raw = b"From: a@b.c\r\nContent-Type: text/plain\r\n\r\njust a body\r\n";
        let extraction = extract_parts(1, raw).unwrap();
        assert!(extraction.parts.is_empty());
    }

    #[test]
    fn test_inline_named_non_text_qualifies() {
        let raw = b"From: a@b.c\r\n\
Content-Type: multipart/mixed; boundary=\"B\"\r\n\r\n\
--B\r\n\
Content-Type: image/png; name=\"logo.png\"\r\n\
Content-Disposition: inline; filename=\"logo.png\"\r\n\
Content-Transfer-Encoding: base64\r\n\r\n\
iVBORw0KGgo=\r\n\
--B--\r\n";
        let extraction = extract_parts(1, raw).unwrap();
        assert_eq!(extraction.parts.len(), 1);
        assert_eq!(extraction.parts[0].filename, "logo.png");
    }

    #[test]
    fn test_inline_text_with_filename_does_not_qualify() {
        let raw = b"From: a@b.c\r\n\
Content-Type: multipart/mixed; boundary=\"B\"\r\n\r\n\
--B\r\n\
Content-Type: text/plain; name=\"notes.txt\"\r\n\
Content-Disposition: inline; filename=\"notes.txt\"\r\n\r\n\
inline notes\r\n\
--B--\r\n";
        let extraction = extract_parts(1, raw).unwrap();
        assert!(extraction.parts.is_empty());
    }

    #[test]
    fn test_empty_part_skipped_and_counted() {
        let raw = multipart_with_attachment("empty.bin", "");
        let extraction = extract_parts(1, &raw).unwrap();
        assert!(extraction.parts.is_empty());
        assert_eq!(extraction.skipped_parts, 1);
    }

    #[test]
    fn test_unnamed_attachment_still_extracted() {
        let raw = b"From: a@b.c\r\n\
Content-Type: multipart/mixed; boundary=\"B\"\r\n\r\n\
--B\r\n\
Content-Type: application/octet-stream\r\n\
Content-Disposition: attachment\r\n\
Content-Transfer-Encoding: base64\r\n\r\n\
AAEC\r\n\
--B--\r\n";
        let extraction = extract_parts(1, raw).unwrap();
        assert_eq!(extraction.parts.len(), 1);
        assert_eq!(extraction.parts[0].filename, "");
        assert_eq!(extraction.parts[0].content, vec![0u8, 1, 2]);
    }
}
