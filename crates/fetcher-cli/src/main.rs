//! civitai-fetcher - keep a local model collection in sync with Civitai.
//!
//! Settings come from the environment (`MODEL_BASE_PATH`, `CIVITAI_API_TOKEN`,
//! ...) and are overridden by the global flags below.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fetcher_core::{FetcherConfig, HashAlgorithm};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "civitai-fetcher")]
#[command(about = "Sync local model files with Civitai metadata")]
struct Args {
    /// Model directory to scan (repeatable, overrides MODEL_BASE_PATH)
    #[arg(long = "model-dir", global = true)]
    model_dirs: Vec<PathBuf>,

    /// Model file extension
    #[arg(long, global = true)]
    extension: Option<String>,

    /// Hash algorithm (sha256 or blake3)
    #[arg(long, global = true)]
    algorithm: Option<String>,

    /// Directory for the hash store, metadata cache and rendered docs
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Hash local files, resolve them against the catalog and render docs
    Sync {
        /// Only use cached metadata, never call the catalog
        #[arg(long)]
        skip_fetch: bool,

        /// Recompute every hash, even for files already in the store
        #[arg(long)]
        force_rehash: bool,

        /// Do not exclude files whose safetensors header is unreadable
        #[arg(long)]
        no_validate: bool,

        /// Output directory for the rendered markdown
        #[arg(long)]
        docs_dir: Option<PathBuf>,
    },

    /// Download a file, resuming interrupted transfers
    Download {
        url: String,

        /// Directory that receives `.civitai-fetcher/<file>`
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// List model files whose header cannot be read
    Validate,

    /// Check local files against the catalog's published hashes
    Verify,
}

fn init_logging(debug: bool) {
    if std::env::var_os("RUST_LOG").is_some() {
        FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(false)
            .compact()
            .init();
        return;
    }

    let log_level = if debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();
}

fn build_config(args: &Args) -> Result<FetcherConfig> {
    let mut config = FetcherConfig::from_env().context("Failed to read settings from environment")?;

    if !args.model_dirs.is_empty() {
        config.set_model_dirs(args.model_dirs.clone());
    }
    if let Some(extension) = &args.extension {
        config.set_extension(extension);
    }
    if let Some(algorithm) = &args.algorithm {
        config.hash_algorithm = algorithm
            .parse::<HashAlgorithm>()
            .with_context(|| format!("Invalid --algorithm {}", algorithm))?;
    }
    if let Some(work_dir) = &args.work_dir {
        config.work_dir = work_dir.clone();
    }

    debug!(model_dirs = ?config.model_dirs, work_dir = %config.work_dir.display(), "Resolved configuration");
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let mut config = build_config(&args)?;

    match args.command {
        Command::Sync {
            skip_fetch,
            force_rehash,
            no_validate,
            docs_dir,
        } => {
            config.skip_remote_fetch = skip_fetch;
            config.force_rehash = force_rehash;
            config.validate_headers = !no_validate;
            commands::sync(config, docs_dir).await
        }
        Command::Download { url, out_dir } => commands::download(config, &url, out_dir).await,
        Command::Validate => commands::validate(config),
        Command::Verify => commands::verify(config).await,
    }
}
