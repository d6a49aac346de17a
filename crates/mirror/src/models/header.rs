//! Envelope header record parsed from fetched header bytes

use chrono::{DateTime, Utc};
use mailparse::MailHeaderMap;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Envelope fields for one message, keyed by (uid, mailbox).
///
/// Immutable once written: a later run of the same mode never overwrites
/// an existing record. Header values are RFC 2047-decoded at parse time;
/// `date` is normalised to RFC 3339 where the Date header is parseable
/// and kept verbatim otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailHeaderRecord {
    pub uid: u32,
    pub mailbox: String,
    pub from: String,
    pub to: String,
    pub cc: String,
    pub subject: String,
    pub date: Option<String>,
}

impl EmailHeaderRecord {
    /// Parse a record from the raw header bytes of a FETCH response.
    pub fn parse(uid: u32, mailbox: &str, raw: &[u8]) -> Result<Self, SyncError> {
        let (headers, _) = mailparse::parse_headers(raw).map_err(|e| SyncError::Parse {
            uid,
            reason: e.to_string(),
        })?;

        let field = |name: &str| headers.get_first_value(name).unwrap_or_default();

        Ok(Self {
            uid,
            mailbox: mailbox.to_string(),
            from: field("From"),
            to: field("To"),
            cc: field("Cc"),
            subject: field("Subject"),
            date: headers
                .get_first_value("Date")
                .map(|raw_date| normalize_date(&raw_date)),
        })
    }
}

/// Date header text to RFC 3339, falling back to the raw text when the
/// header is not a parseable date.
fn normalize_date(raw: &str) -> String {
    match mailparse::dateparse(raw) {
        Ok(epoch) => DateTime::<Utc>::from_timestamp(epoch, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| raw.to_string()),
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &[u8] = b"From: Alice Example <alice@example.com>\r\n\
To: bob@example.com\r\n\
Cc: carol@example.com\r\n\
Subject: Quarterly report\r\n\
Date: Tue, 1 Jul 2025 09:30:00 +0000\r\n\r\n";

    #[test]
    fn test_parse_basic_headers() {
        let record = EmailHeaderRecord::parse(42, "INBOX", RAW).unwrap();
        assert_eq!(record.uid, 42);
        assert_eq!(record.mailbox, "INBOX");
        assert_eq!(record.from, "Alice Example <alice@example.com>");
        assert_eq!(record.to, "bob@example.com");
        assert_eq!(record.cc, "carol@example.com");
        assert_eq!(record.subject, "Quarterly report");
    }

    #[test]
    fn test_date_normalized_to_rfc3339() {
        let record = EmailHeaderRecord::parse(1, "INBOX", RAW).unwrap();
        assert_eq!(record.date.as_deref(), Some("2025-07-01T09:30:00+00:00"));
    }

    #[test]
    fn test_unparseable_date_kept_verbatim() {
        let raw = b"From: a@b.c\r\nDate: sometime last week\r\n\r\n";
        let record = EmailHeaderRecord::parse(1, "INBOX", raw).unwrap();
        assert_eq!(record.date.as_deref(), Some("sometime last week"));
    }

    #[test]
    fn test_rfc2047_subject_decoded() {
        let raw = b"From: a@b.c\r\nSubject: =?UTF-8?B?SMOpbGxv?=\r\n\r\n";
        let record = EmailHeaderRecord::parse(1, "INBOX", raw).unwrap();
        assert_eq!(record.subject, "H\u{e9}llo");
    }

    #[test]
    fn test_missing_fields_default_empty() {
        let raw = b"Subject: only a subject\r\n\r\n";
        let record = EmailHeaderRecord::parse(1, "INBOX", raw).unwrap();
        assert_eq!(record.from, "");
        assert_eq!(record.to, "");
        assert!(record.date.is_none());
    }
}
