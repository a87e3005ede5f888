//! Metadata synchronizer.
//!
//! One run walks four phases in order:
//!
//! 1. Reconcile the hash store with the files on disk (hash new files,
//!    drop rows for vanished ones).
//! 2. Resolve unresolved hashes to catalog versions and cache them.
//! 3. Fetch each parent model once and cache it.
//! 4. Merge local versions into their models.
//!
//! Each store mutation commits on its own, so an interrupted run resumes
//! where it stopped: resolved files are neither re-hashed nor looked up
//! again.

mod merge;
mod report;
mod verify;

pub use merge::{merge_catalog, merge_local_versions, newer_versions, MergeResult};
pub use report::{ItemFailure, SyncReport};
pub use verify::{verify_local_files, VerifyEntry, VerifyStatus};

use crate::catalog::{CatalogClient, ModelRecord, ModelVersionRecord};
use crate::config::FetcherConfig;
use crate::error::{FetcherError, Result};
use crate::hashing::compute_file_hash;
use crate::metadata::MetadataCache;
use crate::scanner::{path_key, scan};
use crate::store::{HashStore, SqliteHashStore};
use crate::validator::can_read_safetensors_header;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// A file on disk with a resolved catalog identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub content_hash: String,
    pub model_id: u64,
    pub version_id: u64,
}

/// Everything one run produced.
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    /// Fetched models with local versions merged in, ordered by id.
    pub models: Vec<ModelRecord>,
    /// Local versions whose model could not be fetched.
    pub unattached_versions: Vec<ModelVersionRecord>,
    /// Versions the catalog returned without a parent model id.
    pub orphan_versions: Vec<ModelVersionRecord>,
    pub local_files: Vec<LocalFile>,
    pub report: SyncReport,
}

impl SyncOutcome {
    /// Find a version among merged models and unattached versions.
    pub fn find_version(&self, version_id: u64) -> Option<&ModelVersionRecord> {
        self.models
            .iter()
            .flat_map(|m| m.model_versions.iter())
            .chain(self.unattached_versions.iter())
            .find(|v| v.id == version_id)
    }

    pub fn find_model(&self, model_id: u64) -> Option<&ModelRecord> {
        self.models.iter().find(|m| m.id == model_id)
    }
}

/// Result of phase 2.
#[derive(Default)]
struct ResolvedVersions {
    versions: BTreeMap<u64, ModelVersionRecord>,
    orphans: BTreeMap<u64, ModelVersionRecord>,
    files: Vec<LocalFile>,
}

/// Keeps the hash store, metadata cache and catalog in agreement with the
/// model files on disk.
pub struct MetadataSynchronizer<S: HashStore, C: CatalogClient> {
    config: FetcherConfig,
    store: S,
    catalog: C,
    cache: MetadataCache,
}

impl<C: CatalogClient> MetadataSynchronizer<SqliteHashStore, C> {
    /// Open the SQLite store under the configured working directory.
    pub fn open(config: FetcherConfig, catalog: C) -> Result<Self> {
        config.validate()?;
        let store = SqliteHashStore::open(config.database_path())?;
        Self::new(config, store, catalog)
    }
}

impl<S: HashStore, C: CatalogClient> MetadataSynchronizer<S, C> {
    /// Create a synchronizer. Fails before touching the store if the
    /// configuration is unusable.
    pub fn new(config: FetcherConfig, store: S, catalog: C) -> Result<Self> {
        config.validate()?;
        let cache = MetadataCache::new(config.cache_dir());
        Ok(Self {
            config,
            store,
            catalog,
            cache,
        })
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// Run all four phases.
    ///
    /// Per-item problems end up in the returned report. Errors are returned
    /// only for run-level failures (scan root vanished, store unusable).
    pub async fn run(&self) -> Result<SyncOutcome> {
        let mut report = SyncReport::default();

        let excluded = self.reconcile_store(&mut report)?;
        let resolved = self.resolve_identities(&excluded, &mut report).await?;
        let models = self.resolve_models(&resolved.versions, &mut report).await;
        let merged = merge_catalog(models, resolved.versions.into_values());

        report.log_summary();

        Ok(SyncOutcome {
            models: merged.models,
            unattached_versions: merged.unattached,
            orphan_versions: resolved.orphans.into_values().collect(),
            local_files: resolved.files,
            report,
        })
    }

    fn validates_headers(&self) -> bool {
        self.config.validate_headers && self.config.is_safetensors()
    }

    /// Phase 1: align store rows with the files on disk.
    ///
    /// Returns the store keys excluded from resolution: unreadable files and
    /// rows under directories that could not be listed.
    fn reconcile_store(&self, report: &mut SyncReport) -> Result<BTreeSet<String>> {
        let disk = scan(&self.config.model_dirs, &self.config.extension)?;
        let snapshot = self.store.get_all()?;
        let validate = self.validates_headers();
        info!(
            "Found {} model files on disk, {} rows in store",
            disk.files.len(),
            snapshot.len()
        );

        let mut on_disk = BTreeSet::new();
        let mut excluded = BTreeSet::new();

        for path in disk.files.values() {
            let key = path_key(path);
            on_disk.insert(key.clone());

            if validate && !can_read_safetensors_header(path) {
                warn!("Cannot read safetensors header of {}, skipping", key);
                report.unreadable.push(key.clone());
                excluded.insert(key);
                continue;
            }

            let existing = snapshot.get(&key);
            let has_hash = existing.is_some_and(|r| r.content_hash.is_some());
            if has_hash && !self.config.force_rehash {
                continue;
            }

            match compute_file_hash(path, self.config.hash_algorithm) {
                Ok(hash) => {
                    if let Some(record) = existing {
                        if let (Some(old), Some((model_id, version_id))) =
                            (record.content_hash.as_deref(), record.identity())
                        {
                            if old != hash {
                                warn!(
                                    "Content of {} changed; keeping identity model {} version {}",
                                    key, model_id, version_id
                                );
                            }
                        }
                    }
                    self.store.upsert_hash(&key, &hash)?;
                    report.hashed.push(key);
                }
                Err(e) => {
                    warn!("Failed to hash {}: {}", key, e);
                    report.hash_failures.push(ItemFailure::new(key, &e));
                }
            }
        }

        for (key, record) in snapshot {
            if on_disk.contains(&key) {
                continue;
            }
            if disk.is_unlisted(Path::new(&key)) {
                warn!("Keeping {} in store: its directory could not be listed", key);
                excluded.insert(key);
                continue;
            }

            if self.store.remove(&key)? {
                match record.identity() {
                    Some((model_id, version_id)) => warn!(
                        "Removed {} from store (file gone); discarded identity model {} version {}",
                        key, model_id, version_id
                    ),
                    None => warn!("Removed {} from store (file gone)", key),
                }
                report.removed.push(record);
            }
        }

        Ok(excluded)
    }

    /// Phase 2: map every stored hash to a version record.
    async fn resolve_identities(
        &self,
        excluded: &BTreeSet<String>,
        report: &mut SyncReport,
    ) -> Result<ResolvedVersions> {
        let snapshot = self.store.get_all()?;
        let mut resolved = ResolvedVersions::default();

        for (path, record) in snapshot {
            if excluded.contains(&path) {
                continue;
            }
            let Some(hash) = record.content_hash.clone() else {
                continue;
            };

            if let Some((model_id, version_id)) = record.identity() {
                match self.cache.read_version(version_id) {
                    Ok(Some(version)) => {
                        resolved.files.push(LocalFile {
                            path: PathBuf::from(&path),
                            content_hash: hash,
                            model_id,
                            version_id,
                        });
                        resolved.versions.insert(version.id, version);
                    }
                    Ok(None) => {
                        let violation = FetcherError::IntegrityViolation {
                            path: path.clone(),
                            message: format!(
                                "resolved to version {} but {} is missing",
                                version_id,
                                self.cache.version_path(version_id).display()
                            ),
                        };
                        error!("{}", violation);
                        report
                            .integrity_violations
                            .push(ItemFailure::new(path, &violation));
                    }
                    Err(e) => {
                        warn!("Cannot load cached version {} for {}: {}", version_id, path, e);
                        report.lookup_failures.push(ItemFailure::new(path, &e));
                    }
                }
                continue;
            }

            if self.config.skip_remote_fetch {
                debug!("Skipping lookup for {} (remote fetch disabled)", path);
                continue;
            }

            report.remote_lookups += 1;
            let version = match self.catalog.lookup_version_by_hash(&hash).await {
                Ok(Some(version)) => version,
                Ok(None) => {
                    info!("No catalog version for {} ({})", path, hash);
                    report.models_not_found.push(path);
                    continue;
                }
                Err(e) => {
                    warn!("Lookup failed for {}: {}", path, e);
                    report.lookup_failures.push(ItemFailure::new(path, &e));
                    continue;
                }
            };

            // Cache first so a stored identity always has its version file
            if let Err(e) = self.cache.write_version(&version) {
                warn!("Failed to cache version {}: {}", version.id, e);
                report.lookup_failures.push(ItemFailure::new(path, &e));
                continue;
            }

            let Some(model_id) = version.model_id else {
                warn!(
                    "Version {} for {} has no parent model; cached but not stored",
                    version.id, path
                );
                report.orphan_versions.push(version.id);
                resolved.orphans.insert(version.id, version);
                continue;
            };

            match self.store.set_identity(&path, model_id, version.id) {
                Ok(()) => {}
                Err(e @ FetcherError::IntegrityViolation { .. }) => {
                    error!("{}", e);
                    report.integrity_violations.push(ItemFailure::new(path, &e));
                    continue;
                }
                Err(e) => return Err(e),
            }

            info!(
                "Resolved {} to model {} version {} ({})",
                path, model_id, version.id, version.name
            );
            resolved.files.push(LocalFile {
                path: PathBuf::from(&path),
                content_hash: hash,
                model_id,
                version_id: version.id,
            });
            report.resolved.push(path);
            resolved.versions.insert(version.id, version);
        }

        Ok(resolved)
    }

    /// Phase 3: load each distinct parent model once.
    async fn resolve_models(
        &self,
        versions: &BTreeMap<u64, ModelVersionRecord>,
        report: &mut SyncReport,
    ) -> BTreeMap<u64, ModelRecord> {
        let model_ids: BTreeSet<u64> = versions.values().filter_map(|v| v.model_id).collect();
        let mut models = BTreeMap::new();

        for model_id in model_ids {
            if let Some(model) = self.load_model(model_id, report).await {
                models.insert(model_id, model);
            }
        }

        models
    }

    async fn load_model(&self, model_id: u64, report: &mut SyncReport) -> Option<ModelRecord> {
        if self.config.skip_remote_fetch {
            return match self.cache.read_model(model_id) {
                Ok(Some(model)) => Some(model),
                Ok(None) => {
                    info!("Model {} not cached (remote fetch disabled)", model_id);
                    report.missing_models.push(model_id);
                    None
                }
                Err(e) => {
                    warn!("Cannot load cached model {}: {}", model_id, e);
                    report
                        .model_failures
                        .push(ItemFailure::new(model_id.to_string(), &e));
                    None
                }
            };
        }

        report.remote_model_fetches += 1;
        match self.catalog.fetch_model(model_id).await {
            Ok(Some(model)) => {
                if let Err(e) = self.cache.write_model(&model) {
                    warn!("Failed to cache model {}: {}", model_id, e);
                }
                Some(model)
            }
            Ok(None) => {
                warn!("Model {} not found in catalog", model_id);
                report.missing_models.push(model_id);
                None
            }
            Err(e) => match self.cache.read_model(model_id) {
                Ok(Some(model)) => {
                    warn!(
                        "Fetching model {} failed ({}); using cached copy",
                        model_id, e
                    );
                    Some(model)
                }
                _ => {
                    warn!("Fetching model {} failed: {}", model_id, e);
                    report
                        .model_failures
                        .push(ItemFailure::new(model_id.to_string(), &e));
                    None
                }
            },
        }
    }
}
