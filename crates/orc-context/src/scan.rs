// SPDX-License-Identifier: MIT OR Apache-2.0
//! Repository file enumeration.

use crate::ContextError;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directories never worth scanning, regardless of configuration.
const BUILTIN_EXCLUDES: &[&str] = &[
    ".git",
    ".orchestrator",
    "node_modules",
    "target",
    "dist",
    "build",
    ".venv",
    "__pycache__",
];

/// Files larger than this are skipped (generated bundles, fixtures).
const MAX_FILE_BYTES: u64 = 1_000_000;

/// Scan tuning.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Extra exclude globs from configuration.
    pub exclude: Vec<String>,
}

/// Enumerates the files of one repository, honoring excludes.
#[derive(Debug)]
pub struct RepoScanner {
    root: PathBuf,
    excludes: GlobSet,
}

impl RepoScanner {
    /// Create a scanner; exclude globs are compiled eagerly so bad
    /// patterns fail up front.
    pub fn new(root: impl Into<PathBuf>, options: ScanOptions) -> Result<Self, ContextError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &options.exclude {
            let glob = Glob::new(pattern).map_err(|e| ContextError::BadPattern {
                pattern: pattern.clone(),
                detail: e.to_string(),
            })?;
            builder.add(glob);
        }
        let excludes = builder.build().map_err(|e| ContextError::BadPattern {
            pattern: "<combined>".into(),
            detail: e.to_string(),
        })?;
        Ok(Self {
            root: root.into(),
            excludes,
        })
    }

    /// Root this scanner reads.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List repo-relative file paths in sorted order.
    pub fn list_files(&self) -> Result<Vec<String>, ContextError> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !(entry.file_type().is_dir() && BUILTIN_EXCLUDES.contains(&name.as_ref()))
            });
        for entry in walker {
            let entry = entry.map_err(|e| ContextError::Io {
                path: self.root.display().to_string(),
                detail: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            if self.excludes.is_match(&rel) {
                continue;
            }
            files.push(rel);
        }
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn lists_sorted_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/b.rs"), "b").unwrap();
        fs::write(dir.path().join("a.rs"), "a").unwrap();
        let scanner = RepoScanner::new(dir.path(), ScanOptions::default()).unwrap();
        assert_eq!(scanner.list_files().unwrap(), vec!["a.rs", "src/b.rs"]);
    }

    #[test]
    fn builtin_dirs_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        fs::create_dir_all(dir.path().join("node_modules/x")).unwrap();
        fs::write(dir.path().join("node_modules/x/i.js"), "x").unwrap();
        fs::write(dir.path().join("keep.rs"), "k").unwrap();
        let scanner = RepoScanner::new(dir.path(), ScanOptions::default()).unwrap();
        assert_eq!(scanner.list_files().unwrap(), vec!["keep.rs"]);
    }

    #[test]
    fn configured_excludes_apply() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("gen.lock"), "x").unwrap();
        fs::write(dir.path().join("keep.rs"), "k").unwrap();
        let scanner = RepoScanner::new(
            dir.path(),
            ScanOptions {
                exclude: vec!["*.lock".into()],
            },
        )
        .unwrap();
        assert_eq!(scanner.list_files().unwrap(), vec!["keep.rs"]);
    }

    #[test]
    fn bad_glob_fails_up_front() {
        let err = RepoScanner::new(
            "/tmp",
            ScanOptions {
                exclude: vec!["[".into()],
            },
        )
        .unwrap_err();
        assert!(matches!(err, ContextError::BadPattern { .. }));
    }
}
