//! End-to-end synchronizer runs against an in-memory catalog.

use async_trait::async_trait;
use fetcher_core::catalog::{CatalogClient, CatalogFile, FileHashes, FileMetadata};
use fetcher_core::scanner::path_key;
use fetcher_core::sync::{newer_versions, verify_local_files, VerifyStatus};
use fetcher_core::{
    compute_file_hash, FetcherConfig, FetcherError, HashAlgorithm, HashStore, MetadataSynchronizer,
    ModelRecord, ModelVersionRecord, Result, SqliteHashStore,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

#[derive(Default)]
struct FakeCatalog {
    by_hash: Mutex<HashMap<String, ModelVersionRecord>>,
    failing_hashes: Mutex<Vec<String>>,
    models: Mutex<HashMap<u64, ModelRecord>>,
    lookups: AtomicUsize,
    model_fetches: AtomicUsize,
}

impl FakeCatalog {
    fn with_version(self, hash: &str, version: ModelVersionRecord) -> Self {
        self.by_hash.lock().unwrap().insert(hash.to_string(), version);
        self
    }

    fn with_model(self, model: ModelRecord) -> Self {
        self.models.lock().unwrap().insert(model.id, model);
        self
    }

    fn failing_on(self, hash: &str) -> Self {
        self.failing_hashes.lock().unwrap().push(hash.to_string());
        self
    }

    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn model_fetches(&self) -> usize {
        self.model_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogClient for FakeCatalog {
    async fn lookup_version_by_hash(&self, hash: &str) -> Result<Option<ModelVersionRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing_hashes.lock().unwrap().iter().any(|h| h == hash) {
            return Err(FetcherError::malformed("model version", None, "truncated body"));
        }
        Ok(self.by_hash.lock().unwrap().get(hash).cloned())
    }

    async fn fetch_model(&self, model_id: u64) -> Result<Option<ModelRecord>> {
        self.model_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.models.lock().unwrap().get(&model_id).cloned())
    }
}

/// Write a minimal valid safetensors file; `tag` makes the content unique.
fn write_model_file(dir: &Path, name: &str, tag: &str) -> PathBuf {
    let header = format!(r#"{{"__metadata__":{{"tag":"{}"}}}}"#, tag);
    let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
    bytes.extend_from_slice(header.as_bytes());
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn blake3_of(path: &Path) -> String {
    compute_file_hash(path, HashAlgorithm::Blake3).unwrap()
}

fn version(id: u64, model_id: Option<u64>, file_name: &str) -> ModelVersionRecord {
    ModelVersionRecord {
        id,
        model_id,
        index: None,
        name: format!("v{}", id),
        base_model: "SDXL 1.0".to_string(),
        base_model_type: Some("Standard".to_string()),
        published_at: None,
        availability: Some("Public".to_string()),
        nsfw_level: 1,
        description: None,
        trained_words: None,
        files: vec![CatalogFile {
            id: id * 100,
            size_kb: 1.0,
            name: file_name.to_string(),
            file_type: "Model".to_string(),
            download_url: format!("https://civitai.com/api/download/models/{}", id),
            metadata: FileMetadata::default(),
            hashes: FileHashes::default(),
        }],
        images: vec![],
        present_locally: false,
    }
}

fn model(id: u64, version_ids: &[u64]) -> ModelRecord {
    ModelRecord {
        id,
        name: format!("model {}", id),
        description: None,
        model_type: "Checkpoint".to_string(),
        nsfw: false,
        stats: Default::default(),
        creator: None,
        tags: vec![],
        model_versions: version_ids
            .iter()
            .enumerate()
            .map(|(i, vid)| {
                let mut v = version(*vid, None, &format!("remote-{}.safetensors", vid));
                v.index = Some(i as u32);
                v
            })
            .collect(),
    }
}

struct Fixture {
    _temp: TempDir,
    models_dir: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let models_dir = temp.path().join("models");
        std::fs::create_dir_all(&models_dir).unwrap();
        Self {
            _temp: temp,
            models_dir,
        }
    }

    fn config(&self) -> FetcherConfig {
        FetcherConfig::new(vec![self.models_dir.clone()])
    }

    fn synchronizer(
        &self,
        config: FetcherConfig,
        catalog: FakeCatalog,
    ) -> MetadataSynchronizer<SqliteHashStore, FakeCatalog> {
        MetadataSynchronizer::<SqliteHashStore, FakeCatalog>::open(config, catalog).unwrap()
    }
}

#[tokio::test]
async fn test_first_run_resolves_known_hash() {
    let fx = Fixture::new();
    let a = write_model_file(&fx.models_dir, "a.safetensors", "a");
    let b = write_model_file(&fx.models_dir, "b.safetensors", "b");

    let catalog = FakeCatalog::default()
        .with_version(&blake3_of(&a), version(7, Some(42), "a.safetensors"))
        .with_model(model(42, &[8, 7]));
    let sync = fx.synchronizer(fx.config(), catalog);

    let outcome = sync.run().await.unwrap();

    assert_eq!(outcome.report.hashed.len(), 2);
    assert_eq!(outcome.report.resolved, vec![path_key(&a)]);
    assert_eq!(outcome.report.models_not_found, vec![path_key(&b)]);

    let record = sync.store().get(&path_key(&a)).unwrap().unwrap();
    assert_eq!(record.identity(), Some((42, 7)));
    assert!(sync.cache().version_path(7).is_file());
    assert!(sync.cache().model_path(42).is_file());

    let unresolved = sync.store().get(&path_key(&b)).unwrap().unwrap();
    assert!(unresolved.content_hash.is_some());
    assert!(unresolved.identity().is_none());

    assert_eq!(outcome.models.len(), 1);
    let merged = &outcome.models[0];
    assert_eq!(merged.model_versions.len(), 2);
    assert_eq!(merged.model_versions[1].id, 7);
    assert_eq!(merged.model_versions[1].index, Some(1));
    assert!(merged.model_versions[1].present_locally);
    assert!(!merged.model_versions[0].present_locally);

    let newer: Vec<u64> = newer_versions(merged).iter().map(|v| v.id).collect();
    assert_eq!(newer, vec![8]);
}

#[tokio::test]
async fn test_second_run_does_no_redundant_work() {
    let fx = Fixture::new();
    let a = write_model_file(&fx.models_dir, "a.safetensors", "a");
    write_model_file(&fx.models_dir, "b.safetensors", "b");

    let catalog = FakeCatalog::default()
        .with_version(&blake3_of(&a), version(7, Some(42), "a.safetensors"))
        .with_model(model(42, &[7]));
    let sync = fx.synchronizer(fx.config(), catalog);

    let first = sync.run().await.unwrap();
    assert_eq!(first.report.remote_lookups, 2);
    let hash_before = sync.store().get(&path_key(&a)).unwrap().unwrap().content_hash;

    let second = sync.run().await.unwrap();

    assert!(second.report.hashed.is_empty());
    // Only the unknown file is looked up again
    assert_eq!(second.report.remote_lookups, 1);
    assert_eq!(sync.catalog().lookups(), 3);
    assert_eq!(
        sync.store().get(&path_key(&a)).unwrap().unwrap().content_hash,
        hash_before
    );
    assert_eq!(second.models, first.models);
}

#[tokio::test]
async fn test_removed_file_is_dropped_from_store() {
    let fx = Fixture::new();
    let a = write_model_file(&fx.models_dir, "a.safetensors", "a");
    write_model_file(&fx.models_dir, "b.safetensors", "b");

    let catalog = FakeCatalog::default()
        .with_version(&blake3_of(&a), version(7, Some(42), "a.safetensors"))
        .with_model(model(42, &[7]));
    let sync = fx.synchronizer(fx.config(), catalog);
    sync.run().await.unwrap();

    std::fs::remove_file(&a).unwrap();
    let outcome = sync.run().await.unwrap();

    assert_eq!(outcome.report.removed.len(), 1);
    assert_eq!(outcome.report.removed[0].path, path_key(&a));
    assert_eq!(outcome.report.removed[0].identity(), Some((42, 7)));
    assert!(sync.store().get(&path_key(&a)).unwrap().is_none());
    assert!(outcome.models.is_empty());

    let third = sync.run().await.unwrap();
    assert!(third.report.removed.is_empty());
    assert_eq!(sync.store().get_all().unwrap().len(), 1);
}

/// Make `dir` unreadable. Returns false when permissions are not enforced
/// for the current user (e.g. root), in which case the caller skips.
#[cfg(unix)]
fn lock_dir(dir: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o000)).unwrap();
    if std::fs::read_dir(dir).is_ok() {
        unlock_dir(dir);
        return false;
    }
    true
}

#[cfg(unix)]
fn unlock_dir(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_root_aborts_without_touching_store() {
    let fx = Fixture::new();
    let work = TempDir::new().unwrap();
    let a = write_model_file(&fx.models_dir, "a.safetensors", "a");
    let mut config = fx.config();
    config.work_dir = work.path().to_path_buf();

    let catalog = FakeCatalog::default()
        .with_version(&blake3_of(&a), version(7, Some(42), "a.safetensors"))
        .with_model(model(42, &[7]));
    let sync = fx.synchronizer(config, catalog);
    sync.run().await.unwrap();

    if !lock_dir(&fx.models_dir) {
        return;
    }
    let result = sync.run().await;
    unlock_dir(&fx.models_dir);

    assert!(result.unwrap_err().is_config_error());
    let record = sync.store().get(&path_key(&a)).unwrap().unwrap();
    assert_eq!(record.identity(), Some((42, 7)));
}

#[cfg(unix)]
#[tokio::test]
async fn test_unlisted_subdirectory_keeps_rows() {
    let fx = Fixture::new();
    let work = TempDir::new().unwrap();
    let nested = fx.models_dir.join("loras");
    std::fs::create_dir_all(&nested).unwrap();
    let a = write_model_file(&nested, "a.safetensors", "a");
    write_model_file(&fx.models_dir, "b.safetensors", "b");
    let mut config = fx.config();
    config.work_dir = work.path().to_path_buf();

    let catalog = FakeCatalog::default()
        .with_version(&blake3_of(&a), version(7, Some(42), "a.safetensors"))
        .with_model(model(42, &[7]));
    let sync = fx.synchronizer(config, catalog);
    sync.run().await.unwrap();

    if !lock_dir(&nested) {
        return;
    }
    let outcome = sync.run().await;
    unlock_dir(&nested);

    let outcome = outcome.unwrap();
    assert!(outcome.report.removed.is_empty());
    assert!(outcome.report.hashed.is_empty());
    let record = sync.store().get(&path_key(&a)).unwrap().unwrap();
    assert_eq!(record.identity(), Some((42, 7)));
    assert_eq!(sync.store().get_all().unwrap().len(), 2);
}

#[tokio::test]
async fn test_row_without_hash_is_hashed() {
    let fx = Fixture::new();
    let a = fx.models_dir.join("a.bin");
    let b = fx.models_dir.join("b.bin");
    std::fs::write(&a, b"first").unwrap();
    std::fs::write(&b, b"second").unwrap();

    let mut config = fx.config();
    config.set_extension("bin");

    {
        SqliteHashStore::open(config.database_path()).unwrap();
        let conn = rusqlite::Connection::open(config.database_path()).unwrap();
        conn.execute(
            "INSERT INTO file_hashes (filepath) VALUES (?1)",
            [path_key(&a)],
        )
        .unwrap();
    }

    let sync = fx.synchronizer(config, FakeCatalog::default());
    let outcome = sync.run().await.unwrap();

    assert_eq!(outcome.report.hashed.len(), 2);
    let all = sync.store().get_all().unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.values().all(|r| r.content_hash.is_some()));
    assert_eq!(
        all[&path_key(&a)].content_hash.as_deref(),
        Some(blake3_of(&a).as_str())
    );
}

#[tokio::test]
async fn test_shared_model_fetched_once() {
    let fx = Fixture::new();
    let a = write_model_file(&fx.models_dir, "a.safetensors", "a");
    let b = write_model_file(&fx.models_dir, "b.safetensors", "b");

    let catalog = FakeCatalog::default()
        .with_version(&blake3_of(&a), version(7, Some(42), "a.safetensors"))
        .with_version(&blake3_of(&b), version(8, Some(42), "b.safetensors"))
        .with_model(model(42, &[8, 7]));
    let sync = fx.synchronizer(fx.config(), catalog);

    let outcome = sync.run().await.unwrap();

    assert_eq!(sync.catalog().model_fetches(), 1);
    assert_eq!(outcome.models.len(), 1);
    assert_eq!(outcome.models[0].present_versions().count(), 2);
    assert!(newer_versions(&outcome.models[0]).is_empty());
}

#[tokio::test]
async fn test_orphan_version_is_cached_but_not_stored() {
    let fx = Fixture::new();
    let a = write_model_file(&fx.models_dir, "a.safetensors", "a");

    let catalog =
        FakeCatalog::default().with_version(&blake3_of(&a), version(7, None, "a.safetensors"));
    let sync = fx.synchronizer(fx.config(), catalog);

    let outcome = sync.run().await.unwrap();

    assert!(sync.cache().version_path(7).is_file());
    assert!(sync.store().get(&path_key(&a)).unwrap().unwrap().identity().is_none());
    assert_eq!(outcome.report.orphan_versions, vec![7]);
    assert_eq!(outcome.orphan_versions.len(), 1);
    assert!(outcome.models.is_empty());
    assert_eq!(sync.catalog().model_fetches(), 0);
}

#[tokio::test]
async fn test_missing_version_cache_is_integrity_violation() {
    let fx = Fixture::new();
    let a = write_model_file(&fx.models_dir, "a.safetensors", "a");

    let catalog = FakeCatalog::default()
        .with_version(&blake3_of(&a), version(7, Some(42), "a.safetensors"))
        .with_model(model(42, &[7]));
    let sync = fx.synchronizer(fx.config(), catalog);
    sync.run().await.unwrap();

    std::fs::remove_file(sync.cache().version_path(7)).unwrap();
    let outcome = sync.run().await.unwrap();

    assert!(outcome.report.has_integrity_violations());
    assert_eq!(outcome.report.integrity_violations[0].item, path_key(&a));
    // Not patched by a fresh lookup
    assert_eq!(sync.catalog().lookups(), 1);
    assert!(!sync.cache().version_path(7).exists());
    assert_eq!(
        sync.store().get(&path_key(&a)).unwrap().unwrap().identity(),
        Some((42, 7))
    );
}

#[tokio::test]
async fn test_skip_fetch_uses_cache_only() {
    let fx = Fixture::new();
    let a = write_model_file(&fx.models_dir, "a.safetensors", "a");

    let catalog = FakeCatalog::default()
        .with_version(&blake3_of(&a), version(7, Some(42), "a.safetensors"))
        .with_model(model(42, &[8, 7]));
    let first = fx.synchronizer(fx.config(), catalog).run().await.unwrap();

    write_model_file(&fx.models_dir, "new.safetensors", "new");
    let mut config = fx.config();
    config.skip_remote_fetch = true;
    let offline = fx.synchronizer(config, FakeCatalog::default());

    let outcome = offline.run().await.unwrap();

    assert_eq!(offline.catalog().lookups(), 0);
    assert_eq!(offline.catalog().model_fetches(), 0);
    assert_eq!(outcome.report.hashed.len(), 1);
    assert_eq!(outcome.models, first.models);
}

#[tokio::test]
async fn test_skip_fetch_without_cached_model_reports_missing() {
    let fx = Fixture::new();
    let a = write_model_file(&fx.models_dir, "a.safetensors", "a");

    let catalog = FakeCatalog::default()
        .with_version(&blake3_of(&a), version(7, Some(42), "a.safetensors"))
        .with_model(model(42, &[7]));
    let sync = fx.synchronizer(fx.config(), catalog);
    sync.run().await.unwrap();
    std::fs::remove_file(sync.cache().model_path(42)).unwrap();

    let mut config = fx.config();
    config.skip_remote_fetch = true;
    let offline = fx.synchronizer(config, FakeCatalog::default());
    let outcome = offline.run().await.unwrap();

    assert_eq!(outcome.report.missing_models, vec![42]);
    assert_eq!(outcome.unattached_versions.len(), 1);
    assert_eq!(outcome.unattached_versions[0].id, 7);
    assert!(outcome.unattached_versions[0].present_locally);
}

#[tokio::test]
async fn test_model_not_found_leaves_version_unattached() {
    let fx = Fixture::new();
    let a = write_model_file(&fx.models_dir, "a.safetensors", "a");

    let catalog = FakeCatalog::default()
        .with_version(&blake3_of(&a), version(7, Some(42), "a.safetensors"));
    let sync = fx.synchronizer(fx.config(), catalog);

    let outcome = sync.run().await.unwrap();

    assert_eq!(outcome.report.missing_models, vec![42]);
    assert!(outcome.models.is_empty());
    assert_eq!(outcome.unattached_versions[0].id, 7);
    assert!(outcome.find_version(7).is_some());
}

#[tokio::test]
async fn test_lookup_failure_is_reported_and_run_continues() {
    let fx = Fixture::new();
    let a = write_model_file(&fx.models_dir, "a.safetensors", "a");
    let b = write_model_file(&fx.models_dir, "b.safetensors", "b");

    let catalog = FakeCatalog::default()
        .failing_on(&blake3_of(&a))
        .with_version(&blake3_of(&b), version(8, Some(42), "b.safetensors"))
        .with_model(model(42, &[8]));
    let sync = fx.synchronizer(fx.config(), catalog);

    let outcome = sync.run().await.unwrap();

    assert_eq!(outcome.report.lookup_failures.len(), 1);
    assert_eq!(outcome.report.lookup_failures[0].item, path_key(&a));
    assert_eq!(outcome.report.resolved, vec![path_key(&b)]);
    assert!(outcome.report.has_problems());
}

#[tokio::test]
async fn test_unreadable_file_is_excluded() {
    let fx = Fixture::new();
    let broken = fx.models_dir.join("broken.safetensors");
    std::fs::write(&broken, b"\xff\xff\xff\xff\xff\xff\xff\xff garbage").unwrap();
    write_model_file(&fx.models_dir, "ok.safetensors", "ok");

    let sync = fx.synchronizer(fx.config(), FakeCatalog::default());
    let outcome = sync.run().await.unwrap();

    assert_eq!(outcome.report.unreadable, vec![path_key(&broken)]);
    assert_eq!(outcome.report.hashed.len(), 1);
    assert!(sync.store().get(&path_key(&broken)).unwrap().is_none());
    assert_eq!(sync.catalog().lookups(), 1);
    assert!(broken.exists());
}

#[tokio::test]
async fn test_force_rehash_keeps_identity() {
    let fx = Fixture::new();
    let a = write_model_file(&fx.models_dir, "a.safetensors", "a");

    let catalog = FakeCatalog::default()
        .with_version(&blake3_of(&a), version(7, Some(42), "a.safetensors"))
        .with_model(model(42, &[7]));
    let first = fx.synchronizer(fx.config(), catalog);
    first.run().await.unwrap();

    write_model_file(&fx.models_dir, "a.safetensors", "a-modified");
    let mut config = fx.config();
    config.force_rehash = true;
    let sync = fx.synchronizer(config, FakeCatalog::default());
    let outcome = sync.run().await.unwrap();

    assert_eq!(outcome.report.hashed, vec![path_key(&a)]);
    let record = sync.store().get(&path_key(&a)).unwrap().unwrap();
    assert_eq!(record.content_hash.as_deref(), Some(blake3_of(&a).as_str()));
    assert_eq!(record.identity(), Some((42, 7)));
    assert_eq!(sync.catalog().lookups(), 0);
}

#[tokio::test]
async fn test_verify_local_files() {
    let fx = Fixture::new();
    let a = write_model_file(&fx.models_dir, "a.safetensors", "a");
    let b = write_model_file(&fx.models_dir, "b.safetensors", "b");

    let mut good = version(7, Some(42), "a.safetensors");
    good.files[0].hashes.blake3 = Some(blake3_of(&a).to_uppercase());
    let mut bad = version(8, Some(42), "b.safetensors");
    bad.files[0].hashes.blake3 = Some("00".repeat(32));

    let catalog = FakeCatalog::default()
        .with_version(&blake3_of(&a), good)
        .with_version(&blake3_of(&b), bad)
        .with_model(model(42, &[8, 7]));
    let sync = fx.synchronizer(fx.config(), catalog);
    let outcome = sync.run().await.unwrap();

    let results = verify_local_files(&outcome, HashAlgorithm::Blake3);
    let status_of = |path: &Path| {
        results
            .iter()
            .find(|r| r.path == path)
            .map(|r| r.status.clone())
            .unwrap()
    };

    assert_eq!(status_of(&a), VerifyStatus::Verified);
    assert!(matches!(status_of(&b), VerifyStatus::Mismatch { .. }));

    let sha = verify_local_files(&outcome, HashAlgorithm::Sha256);
    assert!(sha.iter().all(|r| r.status == VerifyStatus::NoCatalogHash));
}

#[tokio::test]
async fn test_missing_model_dir_fails_before_mutation() {
    let temp = TempDir::new().unwrap();
    let mut config = FetcherConfig::new(vec![temp.path().join("does-not-exist")]);
    config.work_dir = temp.path().join("work");

    let opened =
        MetadataSynchronizer::<SqliteHashStore, FakeCatalog>::open(config.clone(), FakeCatalog::default());
    let err = match opened {
        Ok(_) => panic!("expected a configuration error"),
        Err(e) => e,
    };

    assert!(err.is_config_error());
    assert!(!config.database_path().exists());
}

#[tokio::test]
async fn test_rendered_site_covers_outcome() {
    let fx = Fixture::new();
    let a = write_model_file(&fx.models_dir, "a.safetensors", "a");

    let catalog = FakeCatalog::default()
        .with_version(&blake3_of(&a), version(7, Some(42), "a.safetensors"))
        .with_model(model(42, &[8, 7]));
    let sync = fx.synchronizer(fx.config(), catalog);
    let outcome = sync.run().await.unwrap();

    let docs = sync.config().docs_dir();
    let written = fetcher_core::render::write_site(&docs, &outcome).unwrap();

    assert_eq!(written.len(), 2);
    let index = std::fs::read_to_string(docs.join("index.md")).unwrap();
    assert!(index.contains("model 42"));
    assert!(index.contains("| v7 | v8 |"));
}
