//! # Opusify - FLAC to Opus library mirroring
//!
//! Walks a source music library, transcodes every FLAC file to Opus with an
//! external encoder, and mirrors the directory layout into a destination tree.
//!
//! ## Features
//!
//! - **Incremental**: files whose Opus output is newer than the source are skipped
//! - **Parallel**: a fixed-size worker pool, one encoder process per worker
//! - **Dry-run**: report what would happen without touching the destination
//! - **Companion files**: cover art, cue sheets and the like are copied alongside
//! - **Signal Handling**: Ctrl-C stops dispatching and terminates running encoders,
//!   a second Ctrl-C exits immediately with status 130
//!
//! ## Usage
//!
//! ```bash
//! # Mirror a library at 160 kbit/s using 4 encoders
//! opusify ~/Music/flac ~/Music/opus --bitrate 160k --jobs 4
//!
//! # See what would be converted
//! opusify ~/Music/flac ~/Music/opus --dry-run --verbose
//! ```

use anyhow::Result;
use clap::Parser;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opusify::commands::transcode::TranscodeCommand;
use opusify::config::{resolve_job_count, EncoderSettings, RunConfig};
use opusify::TranscodeError;

/// Opusify - mirror a FLAC library as Opus
#[derive(Parser)]
#[command(
    name = "opusify",
    about = "Transcode a tree of FLAC files to Opus in parallel",
    long_about = "Mirrors the source directory into the destination, converting every FLAC file to Opus with an external encoder (opusenc by default) and copying everything else.",
    version
)]
struct Cli {
    /// Source directory containing FLAC files
    source: PathBuf,
    /// Destination directory for Opus files
    destination: PathBuf,
    /// Target bitrate, e.g. 192k
    #[arg(long, short = 'b', default_value = "192k", env = "OPUSIFY_BITRATE")]
    bitrate: String,
    /// Number of parallel encoders (defaults to the number of CPU cores)
    #[arg(long, short = 'j')]
    jobs: Option<usize>,
    /// Print every file result as it completes
    #[arg(long, short = 'v')]
    verbose: bool,
    /// Report what would be done without writing anything
    #[arg(long, short = 'd')]
    dry_run: bool,
    /// Log file location (defaults to a timestamped file in the destination)
    #[arg(long, env = "OPUSIFY_LOG_FILE")]
    log_file: Option<PathBuf>,
    /// Do not copy non-FLAC files
    #[arg(long)]
    no_extras: bool,
    /// Print the final summary as JSON
    #[arg(long)]
    json: bool,
}

fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(std::path::absolute(path)?)
}

fn build_config(cli: Cli) -> Result<RunConfig> {
    let job_count = resolve_job_count(cli.jobs, num_cpus::get())?;
    let config = RunConfig {
        source_root: absolute(&cli.source)?,
        dest_root: absolute(&cli.destination)?,
        bitrate: cli.bitrate,
        job_count,
        verbose: cli.verbose,
        dry_run: cli.dry_run,
        log_file: cli.log_file.as_deref().map(absolute).transpose()?,
        copy_extras: !cli.no_extras,
        json_summary: cli.json,
        encoder: EncoderSettings::from_env(),
    };
    config.validate()?;
    Ok(config)
}

/// The first interrupt cancels the run gracefully. Returns `true` on a second
/// one, when the caller should give up waiting and exit.
async fn watch_interrupts<F, Fut>(cancel: CancellationToken, mut next_interrupt: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if next_interrupt().await.is_err() {
        return false;
    }
    warn!("🛑 Interrupted by user (Ctrl-C). Terminating encoders...");
    cancel.cancel();

    if next_interrupt().await.is_err() {
        return false;
    }
    warn!("🛑 Interrupted again. Exiting immediately");
    true
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose { "opusify=info" } else { "opusify=warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match build_config(cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid arguments: {}", e);
            std::process::exit(1);
        }
    };
    let json_summary = config.json_summary;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if watch_interrupts(cancel, tokio::signal::ctrl_c).await {
                std::process::exit(130);
            }
        }
    });

    let summary = match TranscodeCommand::new(config).execute(cancel).await {
        Ok(summary) => summary,
        Err(e) => {
            match e.downcast_ref::<TranscodeError>() {
                Some(err) if err.is_fatal() => error!("Aborted before any conversion: {}", err),
                _ => error!("Command failed: {:#}", e),
            }
            std::process::exit(1);
        }
    };

    if json_summary {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary.render());
    }

    if summary.has_failures() {
        std::process::exit(1);
    }

    Ok(())
}
