//! Subcommand handlers.

use anyhow::{bail, Context, Result};
use fetcher_core::render::write_site;
use fetcher_core::scanner::scan;
use fetcher_core::sync::{verify_local_files, VerifyStatus};
use fetcher_core::validator::read_safetensors_header;
use fetcher_core::{CivitaiClient, FetcherConfig, MetadataSynchronizer, SqliteHashStore};
use std::path::PathBuf;
use tracing::{info, warn};

fn open_synchronizer(
    config: FetcherConfig,
) -> Result<MetadataSynchronizer<SqliteHashStore, CivitaiClient>> {
    if config.api_token.is_none() && !config.skip_remote_fetch {
        warn!("CIVITAI_API_TOKEN is not set; catalog requests are unauthenticated");
    }
    let client = CivitaiClient::from_config(&config).context("Failed to create catalog client")?;
    MetadataSynchronizer::open(config, client).context("Failed to open synchronizer")
}

pub async fn sync(config: FetcherConfig, docs_dir: Option<PathBuf>) -> Result<()> {
    let docs_dir = docs_dir.unwrap_or_else(|| config.docs_dir());
    let synchronizer = open_synchronizer(config)?;

    let outcome = synchronizer.run().await.context("Sync failed")?;
    let written = write_site(&docs_dir, &outcome)
        .with_context(|| format!("Failed to render docs into {}", docs_dir.display()))?;

    info!(
        "{} models, {} unattached versions, {} orphan versions, {} pages written",
        outcome.models.len(),
        outcome.unattached_versions.len(),
        outcome.orphan_versions.len(),
        written.len()
    );

    if outcome.report.has_integrity_violations() {
        bail!(
            "{} integrity violations found; the store or cache needs manual repair",
            outcome.report.integrity_violations.len()
        );
    }
    Ok(())
}

pub async fn download(config: FetcherConfig, url: &str, out_dir: Option<PathBuf>) -> Result<()> {
    let out_dir = match out_dir {
        Some(dir) => dir,
        None => match config.model_dirs.first() {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("Failed to resolve current directory")?,
        },
    };

    let client = CivitaiClient::from_config(&config).context("Failed to create catalog client")?;
    let path = client
        .download(url, &out_dir)
        .await
        .with_context(|| format!("Download of {} failed", url))?;

    info!("Saved {}", path.display());
    Ok(())
}

pub fn validate(config: FetcherConfig) -> Result<()> {
    config.validate()?;
    if !config.is_safetensors() {
        info!(
            "No header check for .{} files; only safetensors headers can be validated",
            config.extension
        );
        return Ok(());
    }

    let scanned = scan(&config.model_dirs, &config.extension)?;
    let files = &scanned.files;

    let mut unreadable = 0usize;
    for path in files.values() {
        if let Err(e) = read_safetensors_header(path) {
            warn!("{}", e);
            unreadable += 1;
        }
    }

    info!("{} of {} files have a readable header", files.len() - unreadable, files.len());
    if unreadable > 0 {
        bail!("{} unreadable model files", unreadable);
    }
    Ok(())
}

/// Verify against cached metadata from earlier syncs; no catalog requests.
pub async fn verify(mut config: FetcherConfig) -> Result<()> {
    config.skip_remote_fetch = true;
    let algorithm = config.hash_algorithm;
    let synchronizer = open_synchronizer(config)?;

    let outcome = synchronizer.run().await.context("Sync failed")?;
    let entries = verify_local_files(&outcome, algorithm);

    let verified = entries
        .iter()
        .filter(|e| e.status == VerifyStatus::Verified)
        .count();
    let mismatched = entries
        .iter()
        .filter(|e| matches!(e.status, VerifyStatus::Mismatch { .. }))
        .count();

    info!(
        "{} files checked: {} verified, {} mismatched, {} unverifiable",
        entries.len(),
        verified,
        mismatched,
        entries.len() - verified - mismatched
    );

    if mismatched > 0 {
        bail!("{} files do not match their catalog checksum", mismatched);
    }
    Ok(())
}
