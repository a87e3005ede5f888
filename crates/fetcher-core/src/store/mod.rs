//! Reconciliation store: file path → content hash and catalog identity.
//!
//! A single flat `file_hashes` table in an embedded SQLite file. The
//! synchronizer keeps it aligned with the files on disk and with identities
//! resolved from the catalog.

mod sqlite;
mod traits;

pub use sqlite::SqliteHashStore;
pub use traits::{FileHashRecord, HashStore};
