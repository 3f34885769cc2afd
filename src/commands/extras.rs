use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::TranscodeError;
use crate::job::is_up_to_date;
use crate::reporter::Reporter;

/// Totals for companion files (cover art, cue sheets, ...)
#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ExtrasSummary {
    pub copied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ExtrasSummary {
    pub fn total(&self) -> usize {
        self.copied + self.skipped + self.failed
    }

    pub fn summary_line(&self, dry_run: bool) -> String {
        if dry_run {
            format!(
                "extras: {} would copy, {} would skip, {} failed",
                self.copied, self.skipped, self.failed
            )
        } else {
            format!(
                "extras: {} copied, {} skipped, {} failed",
                self.copied, self.skipped, self.failed
            )
        }
    }
}

/// Copies non-audio files verbatim to the same relative location
pub struct ExtrasCopier<'a> {
    source_root: &'a Path,
    dest_root: &'a Path,
    dry_run: bool,
}

impl<'a> ExtrasCopier<'a> {
    pub fn new(source_root: &'a Path, dest_root: &'a Path, dry_run: bool) -> Self {
        Self {
            source_root,
            dest_root,
            dry_run,
        }
    }

    /// Copy every file that is missing or older at the destination.
    /// Stops early, leaving the rest uncounted, once `cancel` fires.
    pub async fn copy_all(
        &self,
        files: &[PathBuf],
        cancel: &CancellationToken,
        reporter: &mut Reporter,
    ) -> Result<ExtrasSummary> {
        let mut summary = ExtrasSummary::default();

        if files.is_empty() {
            debug!("No companion files to copy");
            return Ok(summary);
        }

        info!("📁 Copying {} companion files", files.len());

        for relative in files {
            if cancel.is_cancelled() {
                info!("Interruption detected. Skipping remaining companion files.");
                break;
            }

            let source = self.source_root.join(relative);
            let dest = self.dest_root.join(relative);

            if is_up_to_date(&source, &dest) {
                summary.skipped += 1;
                let label = if self.dry_run { "WOULD SKIP" } else { "SKIPPED" };
                reporter.log_line(label, relative, None)?;
                continue;
            }

            if self.dry_run {
                summary.copied += 1;
                reporter.log_line("WOULD COPY", relative, None)?;
                continue;
            }

            match copy_file(&source, &dest).await {
                Ok(()) => {
                    summary.copied += 1;
                    reporter.log_line("COPIED", relative, None)?;
                }
                Err(e) => {
                    summary.failed += 1;
                    reporter.log_line("FAILED", relative, Some(&e.to_string()))?;
                }
            }
        }

        Ok(summary)
    }
}

async fn copy_file(source: &Path, dest: &Path) -> Result<(), TranscodeError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TranscodeError::write(parent, e))?;
    }
    tokio::fs::copy(source, dest)
        .await
        .map_err(|e| TranscodeError::write(dest, e))?;
    Ok(())
}
