//! Streaming hash computation for model files.
//!
//! Files are read in fixed-size chunks so multi-gigabyte checkpoints never
//! have to fit in memory. Digests are lowercase hex.

use crate::config::HashConfig;
use crate::error::{FetcherError, Result};
use blake3::Hasher as Blake3Hasher;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Content digest algorithm used as the file identity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    #[default]
    Blake3,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Blake3 => "blake3",
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = FetcherError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "blake3" => Ok(HashAlgorithm::Blake3),
            _ => Err(FetcherError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feed a file through `update` in `HashConfig::CHUNK_SIZE` blocks.
///
/// Returns the number of bytes read.
fn stream_file(path: &Path, mut update: impl FnMut(&[u8])) -> Result<u64> {
    let mut file = std::fs::File::open(path).map_err(|e| FetcherError::io_with_path(e, path))?;

    let mut buffer = vec![0u8; HashConfig::CHUNK_SIZE];
    let mut length: u64 = 0;
    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| FetcherError::io_with_path(e, path))?;
        if bytes_read == 0 {
            break;
        }

        update(&buffer[..bytes_read]);
        length += bytes_read as u64;
    }

    Ok(length)
}

/// Compute the content hash of a file with the given algorithm.
///
/// # Arguments
///
/// * `path` - Path to the file to hash
/// * `algorithm` - Digest to compute
///
/// # Returns
///
/// The digest as a lowercase hex string.
pub fn compute_file_hash(path: impl AsRef<Path>, algorithm: HashAlgorithm) -> Result<String> {
    let path = path.as_ref();
    info!("Computing {} for {}", algorithm, path.display());

    let (hash, length) = match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            let length = stream_file(path, |chunk| hasher.update(chunk))?;
            (hex::encode(hasher.finalize()), length)
        }
        HashAlgorithm::Blake3 => {
            let mut hasher = Blake3Hasher::new();
            let length = stream_file(path, |chunk| {
                hasher.update(chunk);
            })?;
            (hasher.finalize().to_hex().to_string(), length)
        }
    };

    info!("{}: {}, length: {}", algorithm, hash, length);
    Ok(hash)
}

/// Verify a file's hash matches an expected value (case-insensitive).
pub fn verify_file_hash(
    path: impl AsRef<Path>,
    algorithm: HashAlgorithm,
    expected: &str,
) -> Result<()> {
    let actual = compute_file_hash(path, algorithm)?;
    let expected_lower = expected.to_lowercase();

    if actual == expected_lower {
        Ok(())
    } else {
        Err(FetcherError::HashMismatch {
            expected: expected_lower,
            actual,
        })
    }
}
