//! Centralized configuration for the fetcher.
//!
//! Constants live on unit structs grouped by concern. Runtime settings are
//! gathered once into a [`FetcherConfig`] (from the environment, then CLI
//! overrides) and handed to each component's constructor.

use crate::error::{FetcherError, Result};
use crate::hashing::HashAlgorithm;
use std::path::PathBuf;
use std::time::Duration;

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const DEFAULT_API_BASE: &'static str = "https://civitai.com/api/v1";
    pub const USER_AGENT: &'static str = "civitai-fetcher/0.1";
    /// Only the connect phase is bounded; hash lookups and transfers may take minutes.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(60);
    pub const DOWNLOAD_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
}

/// Directory and file names under the working directory.
pub struct PathsConfig;

impl PathsConfig {
    pub const WORK_DIR_NAME: &'static str = ".civitai-fetcher";
    pub const CACHE_DIR_NAME: &'static str = "cache";
    pub const DOCS_DIR_NAME: &'static str = "docs";
    pub const DATABASE_FILENAME: &'static str = "file_hashes.sqlite";
    pub const DEFAULT_EXTENSION: &'static str = "safetensors";
}

/// Hashing and file inspection limits.
pub struct HashConfig;

impl HashConfig {
    /// Read block size for streaming digests (8MB).
    pub const CHUNK_SIZE: usize = 8 * 1024 * 1024;
    /// Upper bound on a safetensors JSON header.
    pub const MAX_SAFETENSORS_HEADER: u64 = 100_000_000;
}

/// Environment variable names read by [`FetcherConfig::from_env`].
pub struct EnvVars;

impl EnvVars {
    pub const API_BASE_URL: &'static str = "CIVITAI_API_BASE_URL";
    pub const API_TOKEN: &'static str = "CIVITAI_API_TOKEN";
    pub const MODEL_BASE_PATH: &'static str = "MODEL_BASE_PATH";
    pub const MODEL_EXTENSION: &'static str = "MODEL_EXTENSION";
    pub const HASH_ALGORITHM: &'static str = "HASH_ALGORITHM";
    pub const WORK_DIR: &'static str = "FETCHER_WORK_DIR";
}

/// Runtime settings for one fetcher run.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Catalog API base URL (no trailing slash).
    pub api_base_url: String,
    /// Static bearer token for the catalog API.
    pub api_token: Option<String>,
    /// Directories scanned for model files.
    pub model_dirs: Vec<PathBuf>,
    /// File extension without the leading dot.
    pub extension: String,
    /// Digest used as the file identity key.
    pub hash_algorithm: HashAlgorithm,
    /// Holds the hash store, metadata cache and rendered docs.
    pub work_dir: PathBuf,
    /// Never call the catalog; work from store and cache only.
    pub skip_remote_fetch: bool,
    /// Recompute hashes even for paths that already have one.
    pub force_rehash: bool,
    /// Exclude files whose safetensors header cannot be read.
    pub validate_headers: bool,
}

fn default_work_dir(model_dirs: &[PathBuf]) -> PathBuf {
    model_dirs
        .first()
        .cloned()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(PathsConfig::WORK_DIR_NAME)
}

impl FetcherConfig {
    /// Create a configuration with defaults for the given model directories.
    ///
    /// The working directory defaults to `.civitai-fetcher` inside the first
    /// model directory.
    pub fn new(model_dirs: Vec<PathBuf>) -> Self {
        let work_dir = default_work_dir(&model_dirs);

        Self {
            api_base_url: NetworkConfig::DEFAULT_API_BASE.to_string(),
            api_token: None,
            model_dirs,
            extension: PathsConfig::DEFAULT_EXTENSION.to_string(),
            hash_algorithm: HashAlgorithm::default(),
            work_dir,
            skip_remote_fetch: false,
            force_rehash: false,
            validate_headers: true,
        }
    }

    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let model_dirs: Vec<PathBuf> = get(EnvVars::MODEL_BASE_PATH)
            .map(|raw| std::env::split_paths(&raw).collect())
            .unwrap_or_default();

        let mut config = Self::new(model_dirs);

        if let Some(base) = get(EnvVars::API_BASE_URL) {
            config.api_base_url = base;
        }
        config.api_base_url = config.api_base_url.trim_end_matches('/').to_string();
        config.api_token = get(EnvVars::API_TOKEN);

        if let Some(ext) = get(EnvVars::MODEL_EXTENSION) {
            config.set_extension(&ext);
        }
        if let Some(algorithm) = get(EnvVars::HASH_ALGORITHM) {
            config.hash_algorithm = algorithm.parse()?;
        }
        if let Some(work_dir) = get(EnvVars::WORK_DIR) {
            config.work_dir = PathBuf::from(work_dir);
        }

        Ok(config)
    }

    /// Replace the model directories.
    ///
    /// A working directory still at its default moves along with the first
    /// model directory.
    pub fn set_model_dirs(&mut self, model_dirs: Vec<PathBuf>) {
        if self.work_dir == default_work_dir(&self.model_dirs) {
            self.work_dir = default_work_dir(&model_dirs);
        }
        self.model_dirs = model_dirs;
    }

    /// Set the model file extension, accepting it with or without a leading dot.
    pub fn set_extension(&mut self, extension: &str) {
        self.extension = extension.trim().trim_start_matches('.').to_string();
    }

    /// Whether the collection holds safetensors files, the only format with a
    /// header the validator understands.
    pub fn is_safetensors(&self) -> bool {
        self.extension.eq_ignore_ascii_case("safetensors")
    }

    /// Check settings that must hold before any store mutation.
    pub fn validate(&self) -> Result<()> {
        if self.model_dirs.is_empty() {
            return Err(FetcherError::Config {
                message: format!(
                    "no model directories configured (set {} or pass --model-dir)",
                    EnvVars::MODEL_BASE_PATH
                ),
            });
        }

        for dir in &self.model_dirs {
            if !dir.is_dir() {
                return Err(FetcherError::NotADirectory(dir.clone()));
            }
        }

        if self.extension.is_empty() {
            return Err(FetcherError::Config {
                message: "model file extension must not be empty".to_string(),
            });
        }

        if url::Url::parse(&self.api_base_url).is_err() {
            return Err(FetcherError::Config {
                message: format!("invalid catalog API base URL: {}", self.api_base_url),
            });
        }

        Ok(())
    }

    /// Directory for `model-<id>.json` / `modelversion-<id>.json` files.
    pub fn cache_dir(&self) -> PathBuf {
        self.work_dir.join(PathsConfig::CACHE_DIR_NAME)
    }

    /// Path to the hash store database.
    pub fn database_path(&self) -> PathBuf {
        self.work_dir.join(PathsConfig::DATABASE_FILENAME)
    }

    /// Default output directory for rendered markdown.
    pub fn docs_dir(&self) -> PathBuf {
        self.work_dir.join(PathsConfig::DOCS_DIR_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = FetcherConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.api_base_url, NetworkConfig::DEFAULT_API_BASE);
        assert_eq!(config.extension, "safetensors");
        assert_eq!(config.hash_algorithm, HashAlgorithm::Blake3);
        assert!(config.api_token.is_none());
        assert!(config.model_dirs.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let config = FetcherConfig::from_lookup(lookup_from(&[
            (EnvVars::API_BASE_URL, "http://localhost:9000/api/v1/"),
            (EnvVars::API_TOKEN, "secret"),
            (EnvVars::MODEL_BASE_PATH, "/models/checkpoints"),
            (EnvVars::MODEL_EXTENSION, ".ckpt"),
            (EnvVars::HASH_ALGORITHM, "SHA256"),
        ]))
        .unwrap();

        assert_eq!(config.api_base_url, "http://localhost:9000/api/v1");
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.model_dirs, vec![PathBuf::from("/models/checkpoints")]);
        assert_eq!(config.extension, "ckpt");
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(
            config.work_dir,
            PathBuf::from("/models/checkpoints").join(PathsConfig::WORK_DIR_NAME)
        );
    }

    #[test]
    fn test_unknown_algorithm_is_fatal() {
        let result =
            FetcherConfig::from_lookup(lookup_from(&[(EnvVars::HASH_ALGORITHM, "md5")]));
        assert!(matches!(result, Err(FetcherError::UnsupportedAlgorithm(_))));
    }

    #[test]
    fn test_validate_rejects_missing_directory() {
        let config = FetcherConfig::new(vec![PathBuf::from("/nonexistent/models")]);
        let err = config.validate().unwrap_err();
        assert!(err.is_config_error());

        let empty = FetcherConfig::new(vec![]);
        assert!(matches!(empty.validate(), Err(FetcherError::Config { .. })));
    }

    #[test]
    fn test_validate_accepts_existing_directory() {
        let temp = TempDir::new().unwrap();
        let config = FetcherConfig::new(vec![temp.path().to_path_buf()]);
        assert!(config.validate().is_ok());
        assert!(config.database_path().starts_with(temp.path()));
        assert!(config.cache_dir().ends_with("cache"));
    }

    #[test]
    fn test_set_model_dirs_moves_default_work_dir() {
        let mut config = FetcherConfig::new(vec![PathBuf::from("/models/a")]);
        config.set_model_dirs(vec![PathBuf::from("/models/b")]);
        assert_eq!(config.work_dir, PathBuf::from("/models/b").join(PathsConfig::WORK_DIR_NAME));

        config.work_dir = PathBuf::from("/var/fetcher");
        config.set_model_dirs(vec![PathBuf::from("/models/c")]);
        assert_eq!(config.work_dir, PathBuf::from("/var/fetcher"));
    }

    #[test]
    fn test_is_safetensors() {
        let mut config = FetcherConfig::new(vec![]);
        assert!(config.is_safetensors());
        config.set_extension(".ckpt");
        assert!(!config.is_safetensors());
    }
}
