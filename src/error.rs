use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while mirroring and transcoding a tree.
///
/// `Path`, `InvalidBitrate`, `InvalidJobCount` and `EncoderNotFound` are fatal and
/// surface before any job is dispatched. Everything else is scoped to a single job
/// and ends up as a `Failed` result.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// Source root is missing or is not a directory.
    #[error("Source directory is not usable: {path:?} ({reason})")]
    Path { path: PathBuf, reason: String },

    #[error("Invalid bitrate format '{0}'. Expected something like '192k'")]
    InvalidBitrate(String),

    #[error("--jobs requires a positive integer, got {0}")]
    InvalidJobCount(usize),

    #[error("Encoder '{binary}' not found in PATH")]
    EncoderNotFound { binary: String },

    /// The encoder ran and exited non-zero.
    #[error("Encoder exited with code {code:?}: {stderr}")]
    EncodeFailure { code: Option<i32>, stderr: String },

    /// The encoder process could not be started.
    #[error("Failed to start encoder '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Encoder timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("Interrupted")]
    Interrupted,

    /// A destination directory or file could not be written.
    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    pub fn path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    /// Whether this error aborts the whole run rather than a single job.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Path { .. }
                | Self::InvalidBitrate(_)
                | Self::InvalidJobCount(_)
                | Self::EncoderNotFound { .. }
        )
    }
}
