//! Record storage
//!
//! The trait-based seam allows the engine and the attachment pass to be
//! exercised against any backend; the shipped implementation is SQLite.

mod sqlite;
mod traits;

pub use sqlite::SqliteRecordStore;
pub use traits::RecordStore;
