//! Hash store trait and record type.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row of the reconciliation store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHashRecord {
    /// Full path of the model file (primary key).
    pub path: String,
    /// Content digest, absent until computed.
    pub content_hash: Option<String>,
    /// Catalog model id, absent until resolved.
    pub model_id: Option<u64>,
    /// Catalog model-version id, absent until resolved.
    pub model_version_id: Option<u64>,
}

impl FileHashRecord {
    /// The resolved `(model_id, model_version_id)` pair.
    ///
    /// Half-resolved rows are treated as unresolved.
    pub fn identity(&self) -> Option<(u64, u64)> {
        match (self.model_id, self.model_version_id) {
            (Some(model_id), Some(version_id)) => Some((model_id, version_id)),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.identity().is_some()
    }
}

/// Durable path → {hash, model id, version id} mapping.
///
/// Every mutation is its own unit of durability: once a call returns `Ok`,
/// the change survives the process being killed.
pub trait HashStore: Send + Sync {
    /// Full snapshot keyed by path.
    fn get_all(&self) -> Result<BTreeMap<String, FileHashRecord>>;

    /// Look up a single path.
    fn get(&self, path: &str) -> Result<Option<FileHashRecord>>;

    /// Insert the path if absent, then set its hash. Identity is untouched.
    fn upsert_hash(&self, path: &str, hash: &str) -> Result<()>;

    /// Set both identity fields on an existing row.
    ///
    /// Fails with `IntegrityViolation` if no row exists for `path`.
    fn set_identity(&self, path: &str, model_id: u64, model_version_id: u64) -> Result<()>;

    /// Delete a row. Returns whether a row was removed.
    fn remove(&self, path: &str) -> Result<bool>;
}
