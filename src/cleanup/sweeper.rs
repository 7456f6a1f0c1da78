//! Sweeps a directory for transient export artifacts.
//!
//! Only immediate children of the root are considered. A child is removed
//! when it is a directory (symlinks are not followed) and its whole name
//! matches the configured pattern. The target set is recomputed on every
//! sweep.

use regex::Regex;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors produced while building or running a sweep.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("invalid cleanup pattern \"{pattern}\": {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("failed to list cleanup root {root:?}: {source}")]
    ListRoot {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove {path:?}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of one sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Number of entries examined under the root.
    pub scanned: usize,
    /// Directories that were removed.
    pub removed: Vec<PathBuf>,
    /// Matching entries that could not be removed. The sweep kept going.
    pub failures: Vec<CleanupError>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Removes directories matching a name pattern directly under a root.
#[derive(Debug, Clone)]
pub struct TmpSweeper {
    root: PathBuf,
    pattern: Regex,
}

impl TmpSweeper {
    /// Create a sweeper. The pattern is anchored so it must match the whole
    /// entry name.
    pub fn new(root: impl Into<PathBuf>, pattern: &str) -> Result<Self, CleanupError> {
        let anchored = format!("^(?:{})$", pattern);
        let pattern = Regex::new(&anchored).map_err(|e| CleanupError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            root: root.into(),
            pattern,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether an entry name is part of the cleanup target set.
    pub fn matches(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }

    /// Run one sweep.
    ///
    /// Failing to list the root aborts the sweep. Failing to remove one entry
    /// is recorded in the report and the next entry is still attempted.
    pub fn sweep(&self) -> Result<SweepReport, CleanupError> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| CleanupError::ListRoot {
            root: self.root.clone(),
            source: e,
        })?;

        let mut report = SweepReport::default();

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Failed to read entry under {:?}: {}", self.root, e);
                    continue;
                }
            };
            report.scanned += 1;

            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if !self.matches(&name) {
                continue;
            }

            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                debug!("Skipping non-directory match: {}", name);
                continue;
            }

            let path = entry.path();
            info!("Removing directory: {:?}", path);
            match std::fs::remove_dir_all(&path) {
                Ok(()) => report.removed.push(path),
                Err(e) => {
                    warn!("Failed to remove {:?}: {}", path, e);
                    report.failures.push(CleanupError::Remove { path, source: e });
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn make_dir(root: &Path, name: &str) -> PathBuf {
        let path = root.join(name);
        fs::create_dir_all(path.join("nested")).unwrap();
        fs::write(path.join("nested").join("part.rdf.gz"), b"data").unwrap();
        path
    }

    #[test]
    fn removes_only_matching_directories() {
        let temp = TempDir::new().unwrap();
        let export_dir = make_dir(temp.path(), "export123");
        let keep_dir = make_dir(temp.path(), "keep");

        let sweeper = TmpSweeper::new(temp.path(), "export[0-9]+").unwrap();
        let report = sweeper.sweep().unwrap();

        assert_eq!(report.removed, vec![export_dir.clone()]);
        assert!(report.is_clean());
        assert!(!export_dir.exists());
        assert!(keep_dir.exists());
    }

    #[test]
    fn leaves_matching_files_untouched() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("export42");
        fs::write(&file, b"not a dir").unwrap();

        let sweeper = TmpSweeper::new(temp.path(), "export[0-9]+").unwrap();
        let report = sweeper.sweep().unwrap();

        assert!(report.removed.is_empty());
        assert!(file.exists());
        assert_eq!(report.scanned, 1);
    }

    #[test]
    fn pattern_must_match_whole_name() {
        let sweeper = TmpSweeper::new("/tmp", "export[0-9]+").unwrap();
        assert!(sweeper.matches("export1"));
        assert!(sweeper.matches("export123"));
        assert!(!sweeper.matches("myexport123"));
        assert!(!sweeper.matches("export123.tmp"));
        assert!(!sweeper.matches("export"));
    }

    #[test]
    fn nested_matches_are_not_visited() {
        let temp = TempDir::new().unwrap();
        let parent = make_dir(temp.path(), "keep");
        let nested = make_dir(&parent, "export7");

        let sweeper = TmpSweeper::new(temp.path(), "export[0-9]+").unwrap();
        let report = sweeper.sweep().unwrap();

        assert!(report.removed.is_empty());
        assert!(nested.exists());
    }

    #[test]
    fn missing_root_aborts_sweep() {
        let temp = TempDir::new().unwrap();
        let sweeper = TmpSweeper::new(temp.path().join("missing"), "export[0-9]+").unwrap();

        let err = sweeper.sweep().unwrap_err();
        assert!(matches!(err, CleanupError::ListRoot { .. }));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = TmpSweeper::new("/tmp", "export[0-9").unwrap_err();
        assert!(matches!(err, CleanupError::InvalidPattern { .. }));
    }

    #[test]
    fn target_set_is_recomputed_each_sweep() {
        let temp = TempDir::new().unwrap();
        let sweeper = TmpSweeper::new(temp.path(), "export[0-9]+").unwrap();

        assert!(sweeper.sweep().unwrap().removed.is_empty());

        let late = make_dir(temp.path(), "export9");
        let report = sweeper.sweep().unwrap();
        assert_eq!(report.removed, vec![late]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_are_not_followed() {
        let temp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let target = make_dir(outside.path(), "data");
        std::os::unix::fs::symlink(&target, temp.path().join("export5")).unwrap();

        let sweeper = TmpSweeper::new(temp.path(), "export[0-9]+").unwrap();
        let report = sweeper.sweep().unwrap();

        assert!(report.removed.is_empty());
        assert!(target.join("nested").exists());
    }
}
