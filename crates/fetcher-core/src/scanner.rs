//! Directory scanning for model files.

use crate::config::PathsConfig;
use crate::error::{FetcherError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Files found by [`scan`], plus the directories that could not be listed.
#[derive(Debug, Default)]
pub struct ScanResult {
    /// File name to full path.
    pub files: BTreeMap<String, PathBuf>,
    /// Directories (or entries) below a root that failed to read. Files under
    /// them are unaccounted for, not gone.
    pub unlisted: Vec<PathBuf>,
}

impl ScanResult {
    /// Whether `path` lies under a directory that could not be listed.
    pub fn is_unlisted(&self, path: &Path) -> bool {
        self.unlisted.iter().any(|dir| path.starts_with(dir))
    }
}

/// Recursively collect files ending in `.<extension>` under each root.
///
/// Roots are walked in order and entries within a directory sorted by name,
/// so when two files share a basename the last one walked wins.
///
/// Symlinks are not followed. The fetcher's own working directory
/// (`.civitai-fetcher`) is skipped so completed downloads are not picked up
/// before they are moved into place.
///
/// A root that is missing or cannot be read is an error. Read failures below
/// a root are recorded in [`ScanResult::unlisted`].
pub fn scan(roots: &[PathBuf], extension: &str) -> Result<ScanResult> {
    let suffix = format!(".{}", extension.trim_start_matches('.'));
    let mut result = ScanResult::default();

    for root in roots {
        if !root.is_dir() {
            return Err(FetcherError::NotADirectory(root.clone()));
        }
        if let Err(e) = fs::read_dir(root) {
            return Err(FetcherError::Config {
                message: format!("cannot read model directory {}: {}", root.display(), e),
            });
        }

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !(e.file_type().is_dir() && e.file_name() == PathsConfig::WORK_DIR_NAME));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(FetcherError::Config {
                        message: format!("cannot read model directory {}: {}", root.display(), e),
                    });
                }
                Err(e) => {
                    let path = e.path().unwrap_or(root).to_path_buf();
                    warn!("Cannot list {}: {}", path.display(), e);
                    result.unlisted.push(path);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(&suffix) {
                continue;
            }

            if let Some(previous) = result.files.insert(name.clone(), entry.path().to_path_buf()) {
                debug!(
                    "Basename collision for {}: {} replaced by {}",
                    name,
                    previous.display(),
                    entry.path().display()
                );
            }
        }
    }

    debug!(
        "Scanned {} roots, found {} files, {} unlisted",
        roots.len(),
        result.files.len(),
        result.unlisted.len()
    );
    Ok(result)
}

/// Render a path the way the hash store keys it.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
