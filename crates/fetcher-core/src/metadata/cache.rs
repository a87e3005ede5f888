//! On-disk cache of catalog records.
//!
//! Layout under the cache directory:
//! - `modelversion-<id>.json`
//! - `model-<id>.json`

use super::atomic::{read_json, write_json_atomic};
use crate::catalog::{CatalogRecord, ModelRecord, ModelVersionRecord};
use crate::error::{FetcherError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// JSON cache for model and model-version records.
#[derive(Debug, Clone)]
pub struct MetadataCache {
    dir: PathBuf,
}

impl MetadataCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn version_path(&self, version_id: u64) -> PathBuf {
        self.dir.join(format!("modelversion-{}.json", version_id))
    }

    pub fn model_path(&self, model_id: u64) -> PathBuf {
        self.dir.join(format!("model-{}.json", model_id))
    }

    pub fn has_version(&self, version_id: u64) -> bool {
        self.version_path(version_id).is_file()
    }

    pub fn has_model(&self, model_id: u64) -> bool {
        self.model_path(model_id).is_file()
    }

    pub fn read_version(&self, version_id: u64) -> Result<Option<ModelVersionRecord>> {
        Self::read_record(&self.version_path(version_id), version_id)
    }

    pub fn write_version(&self, version: &ModelVersionRecord) -> Result<PathBuf> {
        Self::write_record(self.version_path(version.id), version)
    }

    pub fn read_model(&self, model_id: u64) -> Result<Option<ModelRecord>> {
        Self::read_record(&self.model_path(model_id), model_id)
    }

    pub fn write_model(&self, model: &ModelRecord) -> Result<PathBuf> {
        Self::write_record(self.model_path(model.id), model)
    }

    fn read_record<T: CatalogRecord>(path: &Path, expected_id: u64) -> Result<Option<T>> {
        let record: Option<T> = read_json(path).map_err(|e| match e {
            FetcherError::Json { message, .. } => {
                FetcherError::malformed(T::KIND, Some(expected_id), message)
            }
            other => other,
        })?;

        match record {
            Some(record) => {
                if record.record_id() != expected_id {
                    return Err(FetcherError::malformed(
                        T::KIND,
                        Some(expected_id),
                        format!(
                            "{} holds record {} instead",
                            path.display(),
                            record.record_id()
                        ),
                    ));
                }
                record.validate()?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn write_record<T: Serialize>(path: PathBuf, record: &T) -> Result<PathBuf> {
        write_json_atomic(&path, record)?;
        Ok(path)
    }
}
