//! Per-run accounting of what the synchronizer did and what went wrong.

use crate::error::FetcherError;
use crate::store::FileHashRecord;
use serde::Serialize;
use tracing::{error, info, warn};

/// A non-fatal failure tied to one item (path, hash, or model id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub item: String,
    pub message: String,
}

impl ItemFailure {
    pub fn new(item: impl Into<String>, error: &FetcherError) -> Self {
        Self {
            item: item.into(),
            message: error.to_string(),
        }
    }
}

/// Outcome counters and per-item problems for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// Paths whose hash was computed this run.
    pub hashed: Vec<String>,
    /// Store rows deleted because the file is gone.
    pub removed: Vec<FileHashRecord>,
    /// Files excluded because their header could not be read.
    pub unreadable: Vec<String>,
    pub hash_failures: Vec<ItemFailure>,
    /// Paths whose identity was resolved this run.
    pub resolved: Vec<String>,
    /// Paths whose hash the catalog does not know.
    pub models_not_found: Vec<String>,
    /// Version ids returned without a parent model id.
    pub orphan_versions: Vec<u64>,
    pub lookup_failures: Vec<ItemFailure>,
    pub integrity_violations: Vec<ItemFailure>,
    /// Model ids the catalog (or the cache, when fetching is off) lacks.
    pub missing_models: Vec<u64>,
    pub model_failures: Vec<ItemFailure>,
    /// Number of `lookup_version_by_hash` calls made.
    pub remote_lookups: usize,
    /// Number of `fetch_model` calls made.
    pub remote_model_fetches: usize,
}

impl SyncReport {
    /// Whether anything failed, as opposed to merely being unknown to the catalog.
    pub fn has_problems(&self) -> bool {
        !self.hash_failures.is_empty()
            || !self.lookup_failures.is_empty()
            || !self.integrity_violations.is_empty()
            || !self.model_failures.is_empty()
    }

    pub fn has_integrity_violations(&self) -> bool {
        !self.integrity_violations.is_empty()
    }

    /// Log a summary line plus every recorded problem.
    pub fn log_summary(&self) {
        info!(
            "Sync finished: {} hashed, {} removed, {} resolved, {} not found, {} orphan versions, {} missing models ({} lookups, {} model fetches)",
            self.hashed.len(),
            self.removed.len(),
            self.resolved.len(),
            self.models_not_found.len(),
            self.orphan_versions.len(),
            self.missing_models.len(),
            self.remote_lookups,
            self.remote_model_fetches,
        );

        for path in &self.unreadable {
            warn!("Unreadable model file skipped: {}", path);
        }
        for failure in &self.hash_failures {
            warn!("Hash failed for {}: {}", failure.item, failure.message);
        }
        for failure in &self.lookup_failures {
            warn!("Lookup failed for {}: {}", failure.item, failure.message);
        }
        for failure in &self.model_failures {
            warn!("Model {} unavailable: {}", failure.item, failure.message);
        }
        for failure in &self.integrity_violations {
            error!("Integrity violation for {}: {}", failure.item, failure.message);
        }
    }
}
