//! Fetcher Core - local metadata synchronization for model file collections.
//!
//! Hashes the model files found on disk, resolves each hash against the
//! Civitai catalog, caches the returned metadata as JSON and merges it into
//! a per-model view that can be rendered as markdown.
//!
//! # Example
//!
//! ```rust,ignore
//! use fetcher_core::{CivitaiClient, FetcherConfig, MetadataSynchronizer};
//!
//! #[tokio::main]
//! async fn main() -> fetcher_core::Result<()> {
//!     let config = FetcherConfig::from_env()?;
//!     let client = CivitaiClient::from_config(&config)?;
//!     let sync = MetadataSynchronizer::open(config, client)?;
//!
//!     let outcome = sync.run().await?;
//!     println!("{} models with local versions", outcome.models.len());
//!
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod hashing;
pub mod metadata;
pub mod network;
pub mod render;
pub mod scanner;
pub mod store;
pub mod sync;
pub mod validator;

pub use catalog::{CatalogClient, CivitaiClient, ModelRecord, ModelVersionRecord};
pub use config::FetcherConfig;
pub use error::{FetcherError, Result};
pub use hashing::{compute_file_hash, HashAlgorithm};
pub use metadata::MetadataCache;
pub use store::{FileHashRecord, HashStore, SqliteHashStore};
pub use sync::{MetadataSynchronizer, SyncOutcome, SyncReport};
