//! IMAP-backed mailbox connector
//!
//! Wraps an already-authenticated `imap::Session`; authentication is the
//! caller's concern. The session is selected lazily and re-selected only
//! when the target mailbox changes.

use std::sync::Mutex;

use super::{MailboxConnector, MailboxStatus, SearchCriteria};
use crate::error::{Result, SyncError};

/// The session type produced by `imap::ClientBuilder` connects.
pub type TlsSession = imap::Session<imap::Connection>;

struct SessionState {
    session: TlsSession,
    selected: Option<String>,
}

/// [`MailboxConnector`] over one IMAP session.
pub struct ImapConnector {
    state: Mutex<SessionState>,
}

impl ImapConnector {
    /// Wrap an authenticated session.
    pub fn new(session: TlsSession) -> Self {
        Self {
            state: Mutex::new(SessionState {
                session,
                selected: None,
            }),
        }
    }

    /// Select `mailbox` read-only unless it is already selected.
    fn select(state: &mut SessionState, mailbox: &str) -> Result<()> {
        if state.selected.as_deref() == Some(mailbox) {
            return Ok(());
        }
        state
            .session
            .examine(quote_mailbox(mailbox))
            .map_err(map_imap_err)?;
        state.selected = Some(mailbox.to_string());
        Ok(())
    }

    fn fetch_bytes(
        &self,
        mailbox: &str,
        uids: &[u32],
        query: &str,
        take: fn(&imap::types::Fetch) -> Option<Vec<u8>>,
    ) -> Result<Vec<(u32, Vec<u8>)>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let mut state = self.state.lock().unwrap();
        Self::select(&mut state, mailbox)?;

        let uid_set = uids
            .iter()
            .map(|uid| uid.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let fetches = state
            .session
            .uid_fetch(uid_set, query)
            .map_err(map_imap_err)?;

        let mut results = Vec::with_capacity(uids.len());
        for fetch in fetches.iter() {
            let Some(uid) = fetch.uid else { continue };
            if let Some(bytes) = take(fetch) {
                results.push((uid, bytes));
            }
        }
        results.sort_unstable_by_key(|(uid, _)| *uid);
        Ok(results)
    }
}

impl MailboxConnector for ImapConnector {
    fn list_mailboxes(&self) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        let names = state.session.list(None, Some("*")).map_err(map_imap_err)?;
        Ok(names.iter().map(|name| name.name().to_string()).collect())
    }

    fn mailbox_status(&self, mailbox: &str) -> Result<MailboxStatus> {
        let mut state = self.state.lock().unwrap();
        let status = state
            .session
            .status(quote_mailbox(mailbox), "(MESSAGES UIDNEXT)")
            .map_err(map_imap_err)?;
        Ok(MailboxStatus {
            exists: status.exists,
            uid_next: status.uid_next,
        })
    }

    fn search_uids(&self, mailbox: &str, criteria: &SearchCriteria) -> Result<Vec<u32>> {
        let mut state = self.state.lock().unwrap();
        Self::select(&mut state, mailbox)?;

        let uids = state
            .session
            .uid_search(criteria.to_imap_query())
            .map_err(map_imap_err)?;

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    fn fetch_headers(&self, mailbox: &str, uids: &[u32]) -> Result<Vec<(u32, Vec<u8>)>> {
        self.fetch_bytes(mailbox, uids, "(UID BODY.PEEK[HEADER])", |fetch| {
            fetch.header().map(|bytes| bytes.to_vec())
        })
    }

    fn fetch_full(&self, mailbox: &str, uids: &[u32]) -> Result<Vec<(u32, Vec<u8>)>> {
        self.fetch_bytes(mailbox, uids, "(UID BODY.PEEK[])", |fetch| {
            fetch.body().map(|bytes| bytes.to_vec())
        })
    }
}

/// Mailbox names containing spaces or slashes must be quoted on the
/// wire.
fn quote_mailbox(mailbox: &str) -> String {
    let already_quoted = mailbox.starts_with('"') && mailbox.ends_with('"');
    if !already_quoted && (mailbox.contains(' ') || mailbox.contains('/')) {
        format!("\"{mailbox}\"")
    } else {
        mailbox.to_string()
    }
}

/// IO-level failures are retryable; a NO or BAD from the server is not.
fn map_imap_err(err: imap::Error) -> SyncError {
    match &err {
        imap::Error::No(_) | imap::Error::Bad(_) => SyncError::Protocol(err.to_string()),
        _ => SyncError::Transient(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_mailbox_plain() {
        assert_eq!(quote_mailbox("INBOX"), "INBOX");
    }

    #[test]
    fn test_quote_mailbox_with_space_and_slash() {
        assert_eq!(
            quote_mailbox("[Gmail]/All Mail"),
            "\"[Gmail]/All Mail\""
        );
    }

    #[test]
    fn test_quote_mailbox_already_quoted() {
        assert_eq!(quote_mailbox("\"Archive 2024\""), "\"Archive 2024\"");
    }
}
