//! Remote model catalog (Civitai).
//!
//! The synchronizer depends only on [`CatalogClient`]; [`CivitaiClient`] is
//! the HTTP implementation and also provides resumable file downloads.

mod client;
mod download;
mod types;

pub use client::CivitaiClient;
pub use download::content_disposition_filename;
pub use types::{
    decode_record, CatalogCreator, CatalogFile, CatalogImage, CatalogRecord, CatalogStats,
    FileHashes, FileMetadata, ModelRecord, ModelVersionRecord,
};

use crate::error::Result;
use async_trait::async_trait;

/// Read-only access to the catalog.
///
/// `Ok(None)` means the catalog has no such record. Transient transport
/// failures are retried inside the implementation and never surface here.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Resolve a file content hash to the model version that publishes it.
    async fn lookup_version_by_hash(&self, hash: &str) -> Result<Option<ModelVersionRecord>>;

    /// Fetch a model with all of its versions.
    async fn fetch_model(&self, model_id: u64) -> Result<Option<ModelRecord>>;
}
