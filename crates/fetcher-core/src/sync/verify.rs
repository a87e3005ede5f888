//! Checksum verification of local files against catalog hashes.

use super::{LocalFile, SyncOutcome};
use crate::catalog::{CatalogFile, ModelVersionRecord};
use crate::error::FetcherError;
use crate::hashing::{verify_file_hash, HashAlgorithm};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerifyStatus {
    Verified,
    Mismatch { expected: String, actual: String },
    /// The catalog publishes no digest for the configured algorithm.
    NoCatalogHash,
    /// No file of the version matches the local file.
    FileNotListed,
    /// The version record is not part of this run's outcome.
    VersionUnknown,
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyEntry {
    pub path: PathBuf,
    pub version_id: u64,
    pub status: VerifyStatus,
}

/// Pick the catalog file entry describing `local`.
///
/// Matches on file name; a version with a single file matches regardless of
/// name, since users often rename downloads.
fn catalog_file_for<'a>(version: &'a ModelVersionRecord, local: &LocalFile) -> Option<&'a CatalogFile> {
    let name = local.path.file_name()?.to_str()?;
    version.file_named(name).or(match version.files.as_slice() {
        [only] => Some(only),
        _ => None,
    })
}

/// Re-hash every resolved local file and compare with the catalog digest.
pub fn verify_local_files(outcome: &SyncOutcome, algorithm: HashAlgorithm) -> Vec<VerifyEntry> {
    outcome
        .local_files
        .iter()
        .map(|local| {
            let status = match outcome.find_version(local.version_id) {
                None => VerifyStatus::VersionUnknown,
                Some(version) => match catalog_file_for(version, local) {
                    None => VerifyStatus::FileNotListed,
                    Some(file) => match file.hash_for(algorithm) {
                        None => VerifyStatus::NoCatalogHash,
                        Some(expected) => match verify_file_hash(&local.path, algorithm, &expected) {
                            Ok(()) => VerifyStatus::Verified,
                            Err(FetcherError::HashMismatch { expected, actual }) => {
                                VerifyStatus::Mismatch { expected, actual }
                            }
                            Err(e) => VerifyStatus::Failed {
                                message: e.to_string(),
                            },
                        },
                    },
                },
            };

            match &status {
                VerifyStatus::Verified => info!("Verified {}", local.path.display()),
                VerifyStatus::Mismatch { expected, actual } => warn!(
                    "Checksum mismatch for {}: catalog {}, local {}",
                    local.path.display(),
                    expected,
                    actual
                ),
                other => warn!("Could not verify {}: {:?}", local.path.display(), other),
            }

            VerifyEntry {
                path: local.path.clone(),
                version_id: local.version_id,
                status,
            }
        })
        .collect()
}
