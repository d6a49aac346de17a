//! Mailbox access seam
//!
//! The engine talks to the remote mailbox exclusively through
//! [`MailboxConnector`], so tests can drive it with an in-memory fake
//! and production uses the IMAP implementation. A connector wraps one
//! stateful session: all calls for a given mailbox are ordered, there is
//! no intra-mailbox parallelism.

mod imap;

pub use imap::{ImapConnector, TlsSession};

use chrono::NaiveDate;

use crate::error::Result;

/// Message counts reported by the server for one mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxStatus {
    /// Number of messages currently in the mailbox.
    pub exists: u32,
    /// Next UID the server will assign, when reported.
    pub uid_next: Option<u32>,
}

/// What to search for when listing UIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchCriteria {
    /// Every message in the mailbox.
    All,
    /// Messages whose internal date falls in [since, before).
    DateRange { since: NaiveDate, before: NaiveDate },
}

impl SearchCriteria {
    /// Render as an IMAP SEARCH query.
    pub fn to_imap_query(&self) -> String {
        match self {
            SearchCriteria::All => "ALL".to_string(),
            SearchCriteria::DateRange { since, before } => format!(
                "SINCE {} BEFORE {}",
                since.format("%d-%b-%Y"),
                before.format("%d-%b-%Y")
            ),
        }
    }
}

/// Network access to a remote mailbox.
///
/// Errors distinguish transient failures (worth retrying or
/// subdividing) from permanent protocol failures via
/// [`crate::SyncError`].
pub trait MailboxConnector: Send + Sync {
    /// Names of all mailboxes on the server.
    fn list_mailboxes(&self) -> Result<Vec<String>>;

    /// Message count and UIDNEXT for one mailbox.
    fn mailbox_status(&self, mailbox: &str) -> Result<MailboxStatus>;

    /// UIDs matching the criteria, ascending.
    fn search_uids(&self, mailbox: &str, criteria: &SearchCriteria) -> Result<Vec<u32>>;

    /// Raw header bytes for each UID the server returned data for.
    /// UIDs missing from the result were not supplied by the server.
    fn fetch_headers(&self, mailbox: &str, uids: &[u32]) -> Result<Vec<(u32, Vec<u8>)>>;

    /// Complete raw message bytes for each UID the server returned data
    /// for.
    fn fetch_full(&self, mailbox: &str, uids: &[u32]) -> Result<Vec<(u32, Vec<u8>)>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_query() {
        assert_eq!(SearchCriteria::All.to_imap_query(), "ALL");
    }

    #[test]
    fn test_date_range_query() {
        let criteria = SearchCriteria::DateRange {
            since: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            before: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        };
        assert_eq!(
            criteria.to_imap_query(),
            "SINCE 01-Jan-2024 BEFORE 01-Feb-2024"
        );
    }
}
