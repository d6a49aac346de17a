//! Content-addressed attachment entities

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// One unique attachment body, keyed by the SHA-256 of its bytes.
///
/// Created at most once per distinct content, no matter how many
/// messages carry it.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentBlob {
    pub sha256: String,
    pub content: Vec<u8>,
    pub size: usize,
    pub fetched_at: DateTime<Utc>,
}

impl AttachmentBlob {
    /// Build a blob from decoded attachment bytes.
    pub fn from_content(content: Vec<u8>) -> Self {
        let sha256 = format!("{:x}", Sha256::digest(&content));
        Self {
            sha256,
            size: content.len(),
            content,
            fetched_at: Utc::now(),
        }
    }
}

/// Link from one message part to an [`AttachmentBlob`].
///
/// Many links may point at one blob; (uid, mailbox) points back at the
/// owning full-email record. `id` is assigned by the record store.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailAttachmentLink {
    pub id: Option<i64>,
    pub uid: u32,
    pub mailbox: String,
    pub sha256: String,
    pub filename: String,
    pub fetched_at: DateTime<Utc>,
}

impl EmailAttachmentLink {
    pub fn new(uid: u32, mailbox: impl Into<String>, sha256: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            id: None,
            uid,
            mailbox: mailbox.into(),
            sha256: sha256.into(),
            filename: filename.into(),
            fetched_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        let blob = AttachmentBlob::from_content(b"abc".to_vec());
        assert_eq!(
            blob.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(blob.size, 3);
    }

    #[test]
    fn test_identical_content_same_key() {
        let a = AttachmentBlob::from_content(b"same bytes".to_vec());
        let b = AttachmentBlob::from_content(b"same bytes".to_vec());
        assert_eq!(a.sha256, b.sha256);
    }

    #[test]
    fn test_distinct_content_distinct_key() {
        let a = AttachmentBlob::from_content(b"one".to_vec());
        let b = AttachmentBlob::from_content(b"two".to_vec());
        assert_ne!(a.sha256, b.sha256);
    }
}
