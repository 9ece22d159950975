// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! orc-vcs
//!
//! Git gateway used by the run engine: checkpoints are real commits, a
//! rollback restores both the working tree and committed history to the
//! snapshot, and the pre-run HEAD anchors the "tree unchanged on failure"
//! invariant. The run holds the per-run lock while a checkpoint window is
//! open; nothing else is expected to mutate the repo in between.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Identity used for checkpoint commits.
const COMMIT_IDENTITY: &[&str] = &["-c", "user.name=orc", "-c", "user.email=orc@local"];

/// Handle to one repository's git plumbing.
#[derive(Debug, Clone)]
pub struct GitGateway {
    repo_root: PathBuf,
}

impl GitGateway {
    /// Create a gateway for the repository at `repo_root`.
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    /// Repository root this gateway operates on.
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// `true` when `repo_root` is inside a git work tree.
    pub fn is_repo(&self) -> bool {
        self.run(&["rev-parse", "--is-inside-work-tree"])
            .map(|out| out.trim() == "true")
            .unwrap_or(false)
    }

    /// Initialize a repo with a baseline commit if one does not exist yet.
    ///
    /// Used by fixtures and staged workspaces so diffs and rollbacks are
    /// meaningful from the first step.
    pub fn ensure_repo(&self) -> Result<()> {
        if self.repo_root.join(".git").exists() {
            return Ok(());
        }
        self.run(&["init", "-q"])?;
        // Keep orchestrator state out of the baseline commit.
        self.ensure_ignored(".orchestrator/")?;
        self.run(&["add", "-A"])?;
        self.commit("baseline")?;
        Ok(())
    }

    /// SHA of the current HEAD commit.
    pub fn head_sha(&self) -> Result<String> {
        Ok(self.run(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    /// Add `pattern` to `.git/info/exclude` if not already present.
    ///
    /// The orchestrator's own state directory must never be swept into
    /// checkpoints or removed by rollback cleans.
    pub fn ensure_ignored(&self, pattern: &str) -> Result<()> {
        let exclude = self.repo_root.join(".git").join("info").join("exclude");
        let current = std::fs::read_to_string(&exclude).unwrap_or_default();
        if current.lines().any(|l| l.trim() == pattern) {
            return Ok(());
        }
        if let Some(parent) = exclude.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let mut updated = current;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(pattern);
        updated.push('\n');
        std::fs::write(&exclude, updated)
            .with_context(|| format!("write {}", exclude.display()))?;
        Ok(())
    }

    /// Create a recoverable snapshot of the working tree and return its ref.
    ///
    /// Stages everything and commits (empty commits allowed, so a checkpoint
    /// always exists even when the tree is clean).
    pub fn create_checkpoint(&self, label: &str) -> Result<String> {
        self.run(&["add", "-A"])?;
        self.commit(&format!("checkpoint: {label}"))?;
        let sha = self.head_sha()?;
        debug!(label, sha = %sha, "checkpoint created");
        Ok(sha)
    }

    /// Restore the working tree and history to a checkpoint (or `"HEAD"`).
    ///
    /// Untracked files are removed so a failed patch cannot leak new files
    /// into the next attempt.
    pub fn rollback_to_checkpoint(&self, reference: &str) -> Result<()> {
        self.run(&["reset", "--hard", reference])?;
        self.run(&["clean", "-fd"])?;
        debug!(reference, "rolled back");
        Ok(())
    }

    /// Porcelain v1 status, for doctor output and tests.
    pub fn status_porcelain(&self) -> Result<String> {
        self.run(&["status", "--porcelain=v1"])
    }

    fn commit(&self, message: &str) -> Result<()> {
        let mut args: Vec<&str> = COMMIT_IDENTITY.to_vec();
        args.extend(["commit", "-q", "--allow-empty", "-m", message]);
        self.run(&args)?;
        Ok(())
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let out = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .with_context(|| format!("run git {args:?}"))?;
        if !out.status.success() {
            bail!(
                "git {:?} failed (code={:?}): {}",
                args,
                out.status.code(),
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&out.stdout).to_string())
    }
}

/// `git --version` output, if git is on PATH. Used by `orc doctor`.
pub fn git_version() -> Option<String> {
    let out = Command::new("git").arg("--version").output().ok()?;
    if out.status.success() {
        Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> (tempfile::TempDir, GitGateway) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "one\n").unwrap();
        let git = GitGateway::new(dir.path());
        git.ensure_repo().unwrap();
        (dir, git)
    }

    #[test]
    fn ensure_repo_creates_baseline() {
        let (_dir, git) = fixture();
        assert!(git.is_repo());
        assert!(git.head_sha().unwrap().len() >= 7);
    }

    #[test]
    fn checkpoint_then_rollback_restores_tree() {
        let (dir, git) = fixture();
        let checkpoint = git.create_checkpoint("before edit").unwrap();

        fs::write(dir.path().join("a.txt"), "changed\n").unwrap();
        fs::write(dir.path().join("untracked.txt"), "junk\n").unwrap();
        git.rollback_to_checkpoint(&checkpoint).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "one\n");
        assert!(!dir.path().join("untracked.txt").exists());
        assert_eq!(git.head_sha().unwrap(), checkpoint);
    }

    #[test]
    fn rollback_to_head_discards_dirty_state() {
        let (dir, git) = fixture();
        let head = git.head_sha().unwrap();
        fs::write(dir.path().join("a.txt"), "dirty\n").unwrap();
        git.rollback_to_checkpoint("HEAD").unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "one\n");
        assert_eq!(git.head_sha().unwrap(), head);
    }

    #[test]
    fn ignored_state_dir_survives_rollback() {
        let (dir, git) = fixture();
        git.ensure_ignored(".orchestrator/").unwrap();
        fs::create_dir_all(dir.path().join(".orchestrator/runs/r")).unwrap();
        fs::write(dir.path().join(".orchestrator/runs/r/trace.jsonl"), "{}\n").unwrap();

        let checkpoint = git.create_checkpoint("cp").unwrap();
        git.rollback_to_checkpoint(&checkpoint).unwrap();
        assert!(dir.path().join(".orchestrator/runs/r/trace.jsonl").exists());
        // And it was never committed.
        assert!(!git.status_porcelain().unwrap().contains(".orchestrator"));
    }

    #[test]
    fn ensure_ignored_is_idempotent() {
        let (dir, git) = fixture();
        git.ensure_ignored(".orchestrator/").unwrap();
        git.ensure_ignored(".orchestrator/").unwrap();
        let exclude =
            fs::read_to_string(dir.path().join(".git/info/exclude")).unwrap();
        assert_eq!(exclude.matches(".orchestrator/").count(), 1);
    }

    #[test]
    fn checkpoints_are_distinct_refs() {
        let (dir, git) = fixture();
        let c1 = git.create_checkpoint("one").unwrap();
        fs::write(dir.path().join("b.txt"), "x\n").unwrap();
        let c2 = git.create_checkpoint("two").unwrap();
        assert_ne!(c1, c2);
    }
}
