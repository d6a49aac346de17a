//! Full raw message record with derived metadata

use chrono::{DateTime, Utc};
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};

/// One complete raw message, keyed by (uid, mailbox).
///
/// The derived fields are computed exactly once, from `raw_bytes`, when
/// the record is built; they are never recomputed in place. Immutable
/// once written, like [`super::EmailHeaderRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct FullEmailRecord {
    pub uid: u32,
    pub mailbox: String,
    pub raw_bytes: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
    pub has_attachments: bool,
    pub size_kb: u32,
    pub is_html: bool,
    pub is_plain_text: bool,
    pub has_images: bool,
    pub in_reply_to: Option<String>,
    pub message_id: Option<String>,
}

#[derive(Default)]
struct Derived {
    has_attachments: bool,
    is_html: bool,
    is_plain_text: bool,
    has_images: bool,
    in_reply_to: Option<String>,
    message_id: Option<String>,
}

impl FullEmailRecord {
    /// Build a record from raw message bytes, computing the derived
    /// fields. Unparsable bytes still produce a record (the raw content
    /// is what gets mirrored); the derived flags just stay unset.
    pub fn from_raw(
        uid: u32,
        mailbox: &str,
        raw_bytes: Vec<u8>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let mut derived = Derived::default();
        match mailparse::parse_mail(&raw_bytes) {
            Ok(parsed) => {
                derived.in_reply_to = parsed.headers.get_first_value("In-Reply-To");
                derived.message_id = parsed.headers.get_first_value("Message-ID");
                scan_part(&parsed, &mut derived);
            }
            Err(e) => {
                log::debug!("[MODEL] UID {uid} in {mailbox} did not parse as MIME: {e}");
            }
        }

        Self {
            uid,
            mailbox: mailbox.to_string(),
            size_kb: (raw_bytes.len() / 1024) as u32,
            raw_bytes,
            fetched_at,
            has_attachments: derived.has_attachments,
            is_html: derived.is_html,
            is_plain_text: derived.is_plain_text,
            has_images: derived.has_images,
            in_reply_to: derived.in_reply_to,
            message_id: derived.message_id,
        }
    }
}

/// Walk the MIME tree collecting the derived flags.
///
/// `has_attachments` is deliberately broad (any attachment disposition,
/// any named part, any non-text media leaf): it gates which records the
/// attachment extraction pass even looks at, so it must never be false
/// for a message the extractor would accept.
fn scan_part(part: &ParsedMail<'_>, derived: &mut Derived) {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            scan_part(sub, derived);
        }
        return;
    }

    let mime = part.ctype.mimetype.to_ascii_lowercase();
    if mime.starts_with("text/html") {
        derived.is_html = true;
    }
    if mime.starts_with("text/plain") {
        derived.is_plain_text = true;
    }
    if mime.starts_with("image/") {
        derived.has_images = true;
    }

    let disposition = part.get_content_disposition();
    let named = disposition.params.contains_key("filename")
        || part.ctype.params.contains_key("name");
    let media = mime.starts_with("image/")
        || mime.starts_with("application/")
        || mime.starts_with("audio/")
        || mime.starts_with("video/");

    if matches!(disposition.disposition, DispositionType::Attachment) || named || media {
        derived.has_attachments = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTIPART: &[u8] = b"Message-ID: <msg-1@example.com>\r\n\
In-Reply-To: <msg-0@example.com>\r\n\
From: alice@example.com\r\n\
Subject: fixture\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain\r\n\
\r\n\
Hello\r\n\
--XYZ\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>Hello</p>\r\n\
--XYZ\r\n\
Content-Type: image/png\r\n\
Content-Disposition: attachment; filename=\"pixel.png\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
iVBORw0KGgo=\r\n\
--XYZ--\r\n";

    #[test]
    fn test_derived_fields_from_multipart() {
        let record =
            FullEmailRecord::from_raw(7, "INBOX", MULTIPART.to_vec(), Utc::now());
        assert!(record.is_plain_text);
        assert!(record.is_html);
        assert!(record.has_images);
        assert!(record.has_attachments);
        assert_eq!(record.message_id.as_deref(), Some("<msg-1@example.com>"));
        assert_eq!(record.in_reply_to.as_deref(), Some("<msg-0@example.com>"));
    }

    #[test]
    fn test_plain_message_has_no_attachments() {
        let raw = b"From: a@b.c\r\nContent-Type: text/plain\r\n\r\nJust text\r\n";
        let record = FullEmailRecord::from_raw(1, "INBOX", raw.to_vec(), Utc::now());
        assert!(record.is_plain_text);
        assert!(!record.is_html);
        assert!(!record.has_attachments);
        assert!(!record.has_images);
        assert!(record.message_id.is_none());
    }

    #[test]
    fn test_size_kb_from_raw_length() {
        let raw = vec![b'x'; 3 * 1024 + 100];
        let record = FullEmailRecord::from_raw(1, "INBOX", raw, Utc::now());
        assert_eq!(record.size_kb, 3);
    }

    #[test]
    fn test_inline_named_part_counts_as_attachment() {
        let raw = b"From: a@b.c\r\n\
Content-Type: multipart/mixed; boundary=\"B\"\r\n\r\n\
--B\r\n\
Content-Type: application/pdf; name=\"doc.pdf\"\r\n\
Content-Disposition: inline; filename=\"doc.pdf\"\r\n\r\n\
%PDF-1.4\r\n\
--B--\r\n";
        let record = FullEmailRecord::from_raw(1, "INBOX", raw.to_vec(), Utc::now());
        assert!(record.has_attachments);
    }
}
