//! Resumable model file download.
//!
//! Bytes are streamed into `<out_dir>/.civitai-fetcher/<name>.part`. After a
//! transport failure the transfer resumes from the current part-file length
//! with a `Range` request. On completion the part file is renamed to its
//! final name, taken from `Content-Disposition` when the server sends one.
//! That name is kept in a `<name>.part.name` sidecar until the download
//! completes, so a resumed transfer ends up with the same name.

use super::client::CivitaiClient;
use crate::config::{NetworkConfig, PathsConfig};
use crate::error::{FetcherError, Result};
use futures::StreamExt;
use regex::Regex;
use reqwest::{header, StatusCode};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Extract the `filename=` parameter from a `Content-Disposition` value.
///
/// Surrounding quotes and any directory components are stripped.
pub fn content_disposition_filename(value: &str) -> Option<String> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r#"filename=["']?([^"';]+)["']?"#).ok())
        .as_ref()?;

    let raw = pattern.captures(value)?.get(1)?.as_str().trim();
    sanitize_filename(raw)
}

fn sanitize_filename(raw: &str) -> Option<String> {
    let name = Path::new(raw).file_name()?.to_str()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

/// Last non-empty path segment of `url`.
fn url_filename(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    sanitize_filename(segment)
}

/// Sidecar holding the final file name of an unfinished download.
fn saved_name_path(part_path: &Path) -> PathBuf {
    let mut name = part_path.as_os_str().to_os_string();
    name.push(".name");
    PathBuf::from(name)
}

fn read_saved_name(path: &Path) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    sanitize_filename(raw.trim())
}

impl CivitaiClient {
    /// Download `url` into `<out_dir>/.civitai-fetcher/` and return the final path.
    ///
    /// Transient failures resume from the bytes already on disk, following
    /// the client's retry policy.
    pub async fn download(&self, url: &str, out_dir: &Path) -> Result<PathBuf> {
        let fallback_name = url_filename(url).ok_or_else(|| FetcherError::DownloadFailed {
            url: url.to_string(),
            message: "cannot derive a file name from the URL".to_string(),
        })?;

        let target_dir = out_dir.join(PathsConfig::WORK_DIR_NAME);
        fs::create_dir_all(&target_dir).map_err(|e| FetcherError::io_with_path(e, &target_dir))?;

        let part_path = target_dir.join(format!(
            "{}{}",
            fallback_name,
            NetworkConfig::DOWNLOAD_TEMP_SUFFIX
        ));

        let name_path = saved_name_path(&part_path);
        let mut filename = read_saved_name(&name_path);
        let mut name_saved = filename.is_some();
        let mut attempt: u32 = 0;
        loop {
            let offset = fs::metadata(&part_path).map(|m| m.len()).unwrap_or(0);
            info!(
                "Downloading {} to {} starting from {} bytes",
                url,
                part_path.display(),
                offset
            );

            let result = self.download_once(url, &part_path, offset, &mut filename).await;

            // A later process may find the part complete and never see the header again
            if let (false, Some(name)) = (name_saved, &filename) {
                match fs::write(&name_path, name) {
                    Ok(()) => name_saved = true,
                    Err(e) => warn!("Failed to record file name in {}: {}", name_path.display(), e),
                }
            }

            match result {
                Ok(()) => break,
                Err(e) if e.is_retryable() && self.retry.allows_another(attempt + 1) => {
                    let delay = self.retry.delay_with_floor(attempt, e.retry_after());
                    warn!("Download interrupted: {}. Resuming in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => return Err(e),
            }
        }

        let final_path = target_dir.join(filename.unwrap_or(fallback_name));
        fs::rename(&part_path, &final_path).map_err(|e| FetcherError::Io {
            message: format!("Failed to move download into place: {}", e),
            path: Some(final_path.clone()),
            source: Some(e),
        })?;

        if name_saved {
            if let Err(e) = fs::remove_file(&name_path) {
                debug!("Failed to remove {}: {}", name_path.display(), e);
            }
        }

        info!("Downloaded {} to {}", url, final_path.display());
        Ok(final_path)
    }

    async fn download_once(
        &self,
        url: &str,
        part_path: &Path,
        offset: u64,
        filename: &mut Option<String>,
    ) -> Result<()> {
        let mut request = self.authorize(self.client.get(url));
        if offset > 0 {
            request = request.header(header::RANGE, format!("bytes={}-", offset));
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::RANGE_NOT_SATISFIABLE && offset > 0 {
            debug!("Server reports {} already complete", part_path.display());
            return Ok(());
        }

        if !status.is_success() {
            return Err(FetcherError::Api {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // Resumed responses may omit the disposition; keep the first name seen
        if let Some(name) = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(content_disposition_filename)
        {
            filename.get_or_insert(name);
        }

        let resumed = status == StatusCode::PARTIAL_CONTENT;
        if offset > 0 && !resumed {
            warn!("Server ignored range request for {}; restarting", url);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(resumed)
            .truncate(!resumed)
            .open(part_path)
            .map_err(|e| FetcherError::io_with_path(e, part_path))?;

        let expected = response.content_length();
        let start = if resumed { offset } else { 0 };
        let total = expected.map(|len| len + start);

        let mut received: u64 = 0;
        let mut last_progress = Instant::now();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetcherError::Network {
                message: format!("Error reading download stream: {}", e),
                cause: std::error::Error::source(&e).map(|s| s.to_string()),
            })?;

            file.write_all(&chunk)
                .map_err(|e| FetcherError::io_with_path(e, part_path))?;
            received += chunk.len() as u64;

            if last_progress.elapsed() >= NetworkConfig::DOWNLOAD_PROGRESS_INTERVAL {
                match total {
                    Some(total) => info!("{}: {} / {} bytes", url, start + received, total),
                    None => info!("{}: {} bytes", url, start + received),
                }
                last_progress = Instant::now();
            }
        }

        file.sync_all()
            .map_err(|e| FetcherError::io_with_path(e, part_path))?;

        if let Some(expected) = expected {
            if received < expected {
                return Err(FetcherError::Network {
                    message: format!(
                        "connection closed after {} of {} bytes",
                        received, expected
                    ),
                    cause: None,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_variants() {
        assert_eq!(
            content_disposition_filename(r#"attachment; filename="model_v2.safetensors""#),
            Some("model_v2.safetensors".to_string())
        );
        assert_eq!(
            content_disposition_filename("attachment; filename='lora.safetensors'; size=10"),
            Some("lora.safetensors".to_string())
        );
        assert_eq!(
            content_disposition_filename("attachment; filename=plain.ckpt"),
            Some("plain.ckpt".to_string())
        );
        assert_eq!(content_disposition_filename("inline"), None);
    }

    #[test]
    fn test_content_disposition_strips_directories() {
        assert_eq!(
            content_disposition_filename(r#"attachment; filename="../../etc/evil.safetensors""#),
            Some("evil.safetensors".to_string())
        );
        assert_eq!(content_disposition_filename(r#"attachment; filename="..""#), None);
    }

    #[test]
    fn test_url_filename() {
        assert_eq!(
            url_filename("https://civitai.com/api/download/models/12345?type=Model"),
            Some("12345".to_string())
        );
        assert_eq!(
            url_filename("https://example.com/files/model.safetensors/"),
            Some("model.safetensors".to_string())
        );
        assert_eq!(url_filename("not a url"), None);
    }

    #[test]
    fn test_saved_name_is_sanitized() {
        let temp = tempfile::TempDir::new().unwrap();
        let part = temp.path().join("7.part");
        let sidecar = saved_name_path(&part);
        assert_eq!(sidecar, temp.path().join("7.part.name"));

        assert_eq!(read_saved_name(&sidecar), None);

        fs::write(&sidecar, "model.safetensors\n").unwrap();
        assert_eq!(read_saved_name(&sidecar), Some("model.safetensors".to_string()));

        fs::write(&sidecar, "../../evil.safetensors").unwrap();
        assert_eq!(read_saved_name(&sidecar), Some("evil.safetensors".to_string()));
    }
}
