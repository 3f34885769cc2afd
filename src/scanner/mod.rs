use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::TranscodeError;

/// A regular file found below the source root, relative to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovered {
    /// Matches the source extension and will be transcoded
    Source(PathBuf),
    /// Any other file (cover art, cue sheets, ...)
    Extra(PathBuf),
}

/// Single-pass walk over the source tree.
///
/// Entries come out in file-name order within each directory, so two runs over
/// the same tree discover files in the same sequence. Every directory entered is
/// mirrored under the destination root unless running dry.
pub struct TreeScanner {
    source_root: PathBuf,
    dest_root: PathBuf,
    source_extension: String,
    dry_run: bool,
    walker: walkdir::IntoIter,
}

impl TreeScanner {
    /// Validate the source root and prepare the walk. Nothing is touched yet.
    pub fn new(
        source_root: PathBuf,
        dest_root: PathBuf,
        source_extension: &str,
        dry_run: bool,
    ) -> Result<Self, TranscodeError> {
        if !source_root.exists() {
            return Err(TranscodeError::path(&source_root, "does not exist"));
        }

        if !source_root.is_dir() {
            return Err(TranscodeError::path(&source_root, "not a directory"));
        }

        fs::read_dir(&source_root)
            .map_err(|e| TranscodeError::path(&source_root, e.to_string()))?;

        let walker = WalkDir::new(&source_root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        Ok(Self {
            source_root,
            dest_root,
            source_extension: source_extension.to_lowercase(),
            dry_run,
            walker,
        })
    }

    fn is_source_file(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase() == self.source_extension)
            .unwrap_or(false)
    }

    fn mirror_directory(&self, relative: &Path) {
        let target = self.dest_root.join(relative);
        if target.is_dir() {
            return;
        }

        if self.dry_run {
            info!("Dry-run: would create directory {:?}", target);
            return;
        }

        match fs::create_dir_all(&target) {
            Ok(()) => debug!("Created directory {:?}", target),
            Err(e) => warn!("⚠️ Could not create directory {:?}: {}", target, e),
        }
    }
}

impl Iterator for TreeScanner {
    type Item = Discovered;

    fn next(&mut self) -> Option<Discovered> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("⚠️ Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            let path = entry.path();

            if entry.file_type().is_dir() {
                // Destination nested inside the source must not be fed back in
                if entry.depth() > 0 && path.starts_with(&self.dest_root) {
                    debug!("Not descending into destination {:?}", path);
                    self.walker.skip_current_dir();
                    continue;
                }

                if let Ok(relative) = path.strip_prefix(&self.source_root) {
                    self.mirror_directory(relative);
                }
                continue;
            }

            if !path.is_file() {
                continue;
            }

            let Ok(relative) = path.strip_prefix(&self.source_root) else {
                continue;
            };
            let relative = relative.to_path_buf();

            return Some(if self.is_source_file(path) {
                Discovered::Source(relative)
            } else {
                Discovered::Extra(relative)
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn populate(root: &Path, files: &[&str]) {
        for file in files {
            let path = root.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "").unwrap();
        }
    }

    fn sources(scanner: TreeScanner) -> Vec<PathBuf> {
        scanner
            .filter_map(|d| match d {
                Discovered::Source(p) => Some(p),
                Discovered::Extra(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_scan_nonexistent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let result = TreeScanner::new(
            PathBuf::from("/nonexistent/path"),
            temp_dir.path().join("out"),
            "flac",
            false,
        );
        assert!(matches!(result, Err(TranscodeError::Path { .. })));
    }

    #[test]
    fn test_scan_file_as_root() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.flac");
        fs::write(&file, "").unwrap();

        let result = TreeScanner::new(file, temp_dir.path().join("out"), "flac", false);
        assert!(matches!(result, Err(TranscodeError::Path { .. })));
    }

    #[test]
    fn test_scan_discovers_sources_in_stable_order() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        populate(&src, &["b.flac", "a.flac", "sub/c.FLAC", "sub/cover.jpg", "notes.txt"]);

        let scanner =
            TreeScanner::new(src.clone(), temp_dir.path().join("out"), "flac", true).unwrap();
        assert_eq!(
            sources(scanner),
            vec![
                PathBuf::from("a.flac"),
                PathBuf::from("b.flac"),
                PathBuf::from("sub/c.FLAC"),
            ]
        );
    }

    #[test]
    fn test_scan_reports_extras() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        populate(&src, &["a.flac", "sub/cover.jpg"]);

        let found: Vec<Discovered> =
            TreeScanner::new(src, temp_dir.path().join("out"), "flac", true)
                .unwrap()
                .collect();
        assert!(found.contains(&Discovered::Extra(PathBuf::from("sub/cover.jpg"))));
        assert!(found.contains(&Discovered::Source(PathBuf::from("a.flac"))));
    }

    #[test]
    fn test_scan_mirrors_directories() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let out = temp_dir.path().join("out");
        populate(&src, &["a/b/c.flac", "empty/.keep"]);

        let _ = TreeScanner::new(src, out.clone(), "flac", false).unwrap().count();
        assert!(out.join("a/b").is_dir());
        assert!(out.join("empty").is_dir());
    }

    #[test]
    fn test_scan_dry_run_creates_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let out = temp_dir.path().join("out");
        populate(&src, &["a/b/c.flac"]);

        let found = TreeScanner::new(src, out.clone(), "flac", true).unwrap().count();
        assert_eq!(found, 1);
        assert!(!out.exists());
    }

    #[test]
    fn test_scan_skips_nested_destination() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().to_path_buf();
        let out = src.join("converted");
        populate(&src, &["a.flac", "converted/a.opus"]);

        let found: Vec<Discovered> = TreeScanner::new(src, out, "flac", false).unwrap().collect();
        assert_eq!(found, vec![Discovered::Source(PathBuf::from("a.flac"))]);
    }
}
