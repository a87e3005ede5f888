//! Error types for the fetcher.
//!
//! Errors fall into a few families: transport failures (retried at the
//! catalog client boundary), per-item failures (collected into the sync
//! report), and run-level failures such as bad configuration or an unusable
//! store, which abort a run before anything is mutated.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the fetcher library.
#[derive(Debug, Error)]
pub enum FetcherError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited by {service}, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        service: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Catalog API returned {status} for {url}")]
    Api { url: String, status: u16 },

    #[error("Download failed for {url}: {message}")]
    DownloadFailed { url: String, message: String },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Unreadable model file {path}: {message}")]
    InvalidModelFile { path: PathBuf, message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Malformed {kind} record{}: {message}", .id.map(|id| format!(" {}", id)).unwrap_or_default())]
    MalformedRecord {
        kind: &'static str,
        id: Option<u64>,
        message: String,
    },

    #[error("Template error: {message}")]
    Render { message: String },

    // Reconciliation errors
    #[error("Integrity violation for {path}: {message}")]
    IntegrityViolation { path: String, message: String },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    // Configuration errors
    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Configuration error: {message}")]
    Config { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for fetcher operations.
pub type Result<T> = std::result::Result<T, FetcherError>;

impl From<std::io::Error> for FetcherError {
    fn from(err: std::io::Error) -> Self {
        FetcherError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for FetcherError {
    fn from(err: serde_json::Error) -> Self {
        FetcherError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for FetcherError {
    fn from(err: rusqlite::Error) -> Self {
        FetcherError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for FetcherError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetcherError::Timeout(Duration::from_secs(0))
        } else {
            FetcherError::Network {
                message: err.to_string(),
                cause: std::error::Error::source(&err).map(|s| s.to_string()),
            }
        }
    }
}

impl From<minijinja::Error> for FetcherError {
    fn from(err: minijinja::Error) -> Self {
        FetcherError::Render {
            message: err.to_string(),
        }
    }
}

impl FetcherError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        FetcherError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a malformed-record error.
    pub fn malformed(kind: &'static str, id: Option<u64>, message: impl Into<String>) -> Self {
        FetcherError::MalformedRecord {
            kind,
            id,
            message: message.into(),
        }
    }

    /// Wait requested by the server (`Retry-After`), if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetcherError::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    /// Check if this error is a transient transport failure that should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetcherError::Network { .. }
            | FetcherError::Timeout(_)
            | FetcherError::RateLimited { .. } => true,
            FetcherError::Api { status, .. } => {
                matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }

    /// Check if this error means the run cannot start at all.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            FetcherError::Config { .. }
                | FetcherError::UnsupportedAlgorithm(_)
                | FetcherError::NotADirectory(_)
        )
    }
}
