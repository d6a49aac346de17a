//! Domain models for mirrored mail entities

mod attachment;
mod full_email;
mod header;
mod state;

pub use attachment::{AttachmentBlob, EmailAttachmentLink};
pub use full_email::FullEmailRecord;
pub use header::EmailHeaderRecord;
pub use state::{MailboxState, SyncMode, SyncRun, SyncStatus};
