use regex::Regex;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::TranscodeError;

/// Encoder invocation settings, overridable through environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    /// Encoder executable, resolved through PATH
    pub binary: String,
    /// Fixed codec flags placed before `--bitrate`
    pub flags: Vec<String>,
    pub source_extension: String,
    pub target_extension: String,
    /// Upper bound for a single encoder invocation, `None` waits forever
    pub timeout: Option<Duration>,
}

impl EncoderSettings {
    /// Load encoder settings from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let flags = lookup("OPUSIFY_ENCODER_FLAGS")
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or(defaults.flags);

        let timeout = match lookup("OPUSIFY_TIMEOUT_SECS").map(|raw| raw.trim().parse::<u64>()) {
            Some(Ok(0)) => None,
            Some(Ok(secs)) => Some(Duration::from_secs(secs)),
            Some(Err(_)) | None => defaults.timeout,
        };

        Self {
            binary: lookup("OPUSIFY_ENCODER").unwrap_or(defaults.binary),
            flags,
            source_extension: lookup("OPUSIFY_SOURCE_EXT")
                .map(|ext| normalize_extension(&ext))
                .unwrap_or(defaults.source_extension),
            target_extension: lookup("OPUSIFY_TARGET_EXT")
                .map(|ext| normalize_extension(&ext))
                .unwrap_or(defaults.target_extension),
            timeout,
        }
    }
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            binary: "opusenc".to_string(),
            flags: vec!["--quiet".to_string()],
            source_extension: "flac".to_string(),
            target_extension: "opus".to_string(),
            timeout: Some(Duration::from_secs(3600)),
        }
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// Everything a single run needs. Built once in `main`, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source_root: PathBuf,
    pub dest_root: PathBuf,
    pub bitrate: String,
    pub job_count: usize,
    pub verbose: bool,
    pub dry_run: bool,
    /// Explicit log location; defaults to a timestamped file in `dest_root`
    pub log_file: Option<PathBuf>,
    pub copy_extras: bool,
    pub json_summary: bool,
    pub encoder: EncoderSettings,
}

impl RunConfig {
    /// Check the values that clap cannot validate on its own
    pub fn validate(&self) -> Result<(), TranscodeError> {
        validate_bitrate(&self.bitrate)?;
        if self.job_count == 0 {
            return Err(TranscodeError::InvalidJobCount(self.job_count));
        }
        Ok(())
    }
}

/// Bitrates are given as kilobits with a `k` suffix, e.g. `192k`
pub fn validate_bitrate(bitrate: &str) -> Result<(), TranscodeError> {
    let pattern = Regex::new(r"^[0-9]+k$")
        .map_err(|_| TranscodeError::InvalidBitrate(bitrate.to_string()))?;

    if pattern.is_match(bitrate) {
        Ok(())
    } else {
        Err(TranscodeError::InvalidBitrate(bitrate.to_string()))
    }
}

/// Pick the worker count: the requested value, else the detected core count.
///
/// Detection happens in the caller so the scheduler stays deterministic under test.
pub fn resolve_job_count(requested: Option<usize>, detected: usize) -> Result<usize, TranscodeError> {
    match requested {
        Some(0) => Err(TranscodeError::InvalidJobCount(0)),
        Some(n) => Ok(n),
        None => Ok(detected.max(1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let settings = EncoderSettings::from_lookup(lookup_from(&[]));
        assert_eq!(settings, EncoderSettings::default());
        assert_eq!(settings.binary, "opusenc");
        assert_eq!(settings.timeout, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_env_overrides() {
        let settings = EncoderSettings::from_lookup(lookup_from(&[
            ("OPUSIFY_ENCODER", "/opt/bin/fake-enc"),
            ("OPUSIFY_ENCODER_FLAGS", "--vbr  --comp 10"),
            ("OPUSIFY_SOURCE_EXT", ".WAV"),
            ("OPUSIFY_TIMEOUT_SECS", "0"),
        ]));
        assert_eq!(settings.binary, "/opt/bin/fake-enc");
        assert_eq!(settings.flags, vec!["--vbr", "--comp", "10"]);
        assert_eq!(settings.source_extension, "wav");
        assert_eq!(settings.target_extension, "opus");
        assert_eq!(settings.timeout, None);
    }

    #[test]
    fn test_unparsable_timeout_falls_back() {
        let settings =
            EncoderSettings::from_lookup(lookup_from(&[("OPUSIFY_TIMEOUT_SECS", "soon")]));
        assert_eq!(settings.timeout, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_validate_bitrate() {
        assert!(validate_bitrate("192k").is_ok());
        assert!(validate_bitrate("64k").is_ok());
        assert!(validate_bitrate("192").is_err());
        assert!(validate_bitrate("k").is_err());
        assert!(validate_bitrate("19.2k").is_err());
        assert!(validate_bitrate("192K").is_err());
    }

    #[test]
    fn test_resolve_job_count() {
        assert_eq!(resolve_job_count(Some(3), 8).unwrap(), 3);
        assert_eq!(resolve_job_count(None, 8).unwrap(), 8);
        assert_eq!(resolve_job_count(None, 0).unwrap(), 1);
        assert!(resolve_job_count(Some(0), 8).is_err());
    }
}
