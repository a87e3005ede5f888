//! Catalog record types.
//!
//! Field names follow the Civitai REST API (camelCase) so the same structs
//! decode API responses and round-trip through the local JSON cache.

use crate::error::{FetcherError, Result};
use crate::hashing::HashAlgorithm;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Model author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogCreator {
    pub username: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// Aggregate counters for a model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogStats {
    pub download_count: u64,
    pub favorite_count: u64,
    pub thumbs_up_count: u64,
    pub thumbs_down_count: u64,
    pub comment_count: u64,
    pub rating_count: u64,
    pub rating: f64,
    pub tipped_amount_count: u64,
}

/// Format details of a downloadable file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// `SafeTensor`, `PickleTensor` or `Other`.
    #[serde(default)]
    pub format: Option<String>,
    /// `full` or `pruned`.
    #[serde(default)]
    pub size: Option<String>,
    /// `fp16` or `fp32`.
    #[serde(default)]
    pub fp: Option<String>,
}

/// Per-algorithm digests published for a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileHashes {
    #[serde(rename = "AutoV1", default, skip_serializing_if = "Option::is_none")]
    pub auto_v1: Option<String>,
    #[serde(rename = "AutoV2", default, skip_serializing_if = "Option::is_none")]
    pub auto_v2: Option<String>,
    #[serde(rename = "AutoV3", default, skip_serializing_if = "Option::is_none")]
    pub auto_v3: Option<String>,
    #[serde(rename = "SHA256", default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(rename = "CRC32", default, skip_serializing_if = "Option::is_none")]
    pub crc32: Option<String>,
    #[serde(rename = "BLAKE3", default, skip_serializing_if = "Option::is_none")]
    pub blake3: Option<String>,
}

/// One downloadable file of a model version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogFile {
    pub id: u64,
    #[serde(rename = "sizeKB")]
    pub size_kb: f64,
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: String,
    pub download_url: String,
    #[serde(default)]
    pub metadata: FileMetadata,
    #[serde(default)]
    pub hashes: FileHashes,
}

impl CatalogFile {
    /// The published digest for `algorithm`, lowercased.
    pub fn hash_for(&self, algorithm: HashAlgorithm) -> Option<String> {
        let hash = match algorithm {
            HashAlgorithm::Sha256 => self.hashes.sha256.as_ref(),
            HashAlgorithm::Blake3 => self.hashes.blake3.as_ref(),
        };
        hash.map(|h| h.to_lowercase())
    }

    fn validate(&self, version_id: u64) -> Result<()> {
        let kind = ModelVersionRecord::KIND;
        if self.name.trim().is_empty() {
            return Err(FetcherError::malformed(
                kind,
                Some(version_id),
                format!("file {} has an empty name", self.id),
            ));
        }
        if self.download_url.trim().is_empty() {
            return Err(FetcherError::malformed(
                kind,
                Some(version_id),
                format!("file {} has no downloadUrl", self.name),
            ));
        }
        if !self.size_kb.is_finite() || self.size_kb < 0.0 {
            return Err(FetcherError::malformed(
                kind,
                Some(version_id),
                format!("file {} has invalid sizeKB {}", self.name, self.size_kb),
            ));
        }
        Ok(())
    }
}

/// Sample image attached to a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogImage {
    pub url: String,
    #[serde(default)]
    pub nsfw_level: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// One version of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelVersionRecord {
    pub id: u64,
    /// Parent model. Present on by-hash responses, absent inside a model's
    /// own `modelVersions` list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<u64>,
    /// Position within the parent's `modelVersions` (0 = newest).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    pub name: String,
    pub base_model: String,
    #[serde(default)]
    pub base_model_type: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub availability: Option<String>,
    #[serde(default)]
    pub nsfw_level: u32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub trained_words: Option<Vec<String>>,
    #[serde(default)]
    pub files: Vec<CatalogFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<CatalogImage>,
    /// Set by the synchronizer for versions backed by a file on disk.
    #[serde(default)]
    pub present_locally: bool,
}

impl ModelVersionRecord {
    /// The file entry whose name matches `file_name`.
    pub fn file_named(&self, file_name: &str) -> Option<&CatalogFile> {
        self.files.iter().find(|f| f.name == file_name)
    }

    /// Same base model family and type as `other`.
    pub fn same_base(&self, other: &ModelVersionRecord) -> bool {
        self.base_model == other.base_model && self.base_model_type == other.base_model_type
    }
}

/// A model and its versions, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub model_type: String,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub stats: CatalogStats,
    #[serde(default)]
    pub creator: Option<CatalogCreator>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub model_versions: Vec<ModelVersionRecord>,
}

impl ModelRecord {
    /// Position of the version with `version_id` in `model_versions`.
    pub fn version_position(&self, version_id: u64) -> Option<usize> {
        self.model_versions.iter().position(|v| v.id == version_id)
    }

    pub fn present_versions(&self) -> impl Iterator<Item = &ModelVersionRecord> {
        self.model_versions.iter().filter(|v| v.present_locally)
    }
}

/// Post-decode checks shared by every catalog record.
pub trait CatalogRecord: DeserializeOwned + Send {
    /// Human-readable record kind used in error messages.
    const KIND: &'static str;

    fn record_id(&self) -> u64;

    /// Reject records that decoded but are unusable.
    fn validate(&self) -> Result<()>;
}

impl CatalogRecord for ModelVersionRecord {
    const KIND: &'static str = "model version";

    fn record_id(&self) -> u64 {
        self.id
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(FetcherError::malformed(Self::KIND, Some(self.id), "empty name"));
        }
        if self.base_model.trim().is_empty() {
            return Err(FetcherError::malformed(
                Self::KIND,
                Some(self.id),
                "empty baseModel",
            ));
        }
        for file in &self.files {
            file.validate(self.id)?;
        }
        Ok(())
    }
}

impl CatalogRecord for ModelRecord {
    const KIND: &'static str = "model";

    fn record_id(&self) -> u64 {
        self.id
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(FetcherError::malformed(Self::KIND, Some(self.id), "empty name"));
        }
        for version in &self.model_versions {
            if let Some(parent) = version.model_id {
                if parent != self.id {
                    return Err(FetcherError::malformed(
                        Self::KIND,
                        Some(self.id),
                        format!("version {} claims parent model {}", version.id, parent),
                    ));
                }
            }
            version.validate()?;
        }
        Ok(())
    }
}

/// Decode and validate a catalog record from JSON text.
///
/// Decoding failures of required fields surface as `MalformedRecord`.
pub fn decode_record<T: CatalogRecord>(body: &str) -> Result<T> {
    let record: T = serde_json::from_str(body)
        .map_err(|e| FetcherError::malformed(T::KIND, None, e.to_string()))?;
    record.validate()?;
    Ok(record)
}
