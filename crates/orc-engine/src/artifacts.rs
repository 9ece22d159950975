// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-run artifact directory, manifest handle, and patch store.
//!
//! Layout under `<repo>/.orchestrator/runs/<run_id>/`:
//!
//! ```text
//! trace.jsonl  summary.json  manifest.json  effective-config.json  plan.json
//! patches/  verification/  selection/  diagnostics/  review_loop/
//! fused_context_*.{json,txt}  tool_logs/
//! ```
//!
//! Finalized files are written atomically (temp + rename). The manifest is
//! mutated only through [`ManifestHandle::update`], which serializes
//! writers and persists every change.

use anyhow::{Context, Result};
use orc_core::manifest::Manifest;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Handle to one run's artifact directory.
#[derive(Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Create (or reuse) the run directory for `(repo_root, run_id)`.
    pub fn create(repo_root: &Path, run_id: &str) -> Result<Self> {
        let dir = repo_root.join(".orchestrator").join("runs").join(run_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create run dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// Absolute run directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Absolute path for a run-relative artifact.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.join(rel)
    }

    /// Atomically write a JSON artifact; parent directories are created.
    pub fn write_json<T: Serialize>(&self, rel: &str, value: &T) -> Result<()> {
        let body = serde_json::to_string_pretty(value)?;
        self.write_text(rel, &body)
    }

    /// Atomically write a text artifact; parent directories are created.
    pub fn write_text(&self, rel: &str, body: &str) -> Result<()> {
        let target = self.path(rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
        let tmp = target.with_extension("tmp-write");
        std::fs::write(&tmp, body).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &target)
            .with_context(|| format!("finalize {}", target.display()))?;
        debug!(path = %target.display(), "artifact written");
        Ok(())
    }
}

/// Serialized access to the run manifest; every update is persisted.
pub struct ManifestHandle {
    manifest: Mutex<Manifest>,
    store: std::sync::Arc<ArtifactStore>,
}

impl ManifestHandle {
    /// Wrap a manifest and persist the initial state.
    pub fn new(store: std::sync::Arc<ArtifactStore>, manifest: Manifest) -> Result<Self> {
        store.write_json("manifest.json", &manifest)?;
        Ok(Self {
            manifest: Mutex::new(manifest),
            store,
        })
    }

    /// Mutate the manifest under the lock and persist the result.
    ///
    /// Persistence failure fails the update; callers that must not lose
    /// the reference (the patch store) propagate it.
    pub fn update<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Manifest),
    {
        let mut guard = self.manifest.lock().expect("manifest lock poisoned");
        mutate(&mut guard);
        self.store.write_json("manifest.json", &*guard)
    }

    /// Snapshot of the current manifest.
    pub fn snapshot(&self) -> Manifest {
        self.manifest.lock().expect("manifest lock poisoned").clone()
    }
}

/// Persists candidate / selected / final diffs and records them in the
/// manifest.
pub struct PatchStore {
    store: std::sync::Arc<ArtifactStore>,
    manifest: std::sync::Arc<ManifestHandle>,
}

impl PatchStore {
    /// Create a patch store over the run's artifact directory.
    pub fn new(
        store: std::sync::Arc<ArtifactStore>,
        manifest: std::sync::Arc<ManifestHandle>,
    ) -> Self {
        Self { store, manifest }
    }

    /// Save one generation candidate.
    pub fn save_candidate(&self, iter: u32, candidate: usize, diff: &str) -> Result<String> {
        self.save(&format!("patches/iter_{iter}_candidate_{candidate}.patch"), diff)
    }

    /// Save the selected patch for an iteration.
    pub fn save_selected(&self, iter: u32, diff: &str) -> Result<String> {
        self.save(&format!("patches/iter_{iter}_selected.patch"), diff)
    }

    /// Save the run's final combined diff.
    pub fn save_final(&self, diff: &str) -> Result<String> {
        self.save("patches/final.diff.patch", diff)
    }

    fn save(&self, rel: &str, diff: &str) -> Result<String> {
        let mut body = diff.to_string();
        if !body.ends_with('\n') {
            body.push('\n');
        }
        self.store.write_text(rel, &body)?;
        // A manifest update failure is fatal to the save: an unreferenced
        // patch would be unreachable from the artifact graph.
        self.manifest.update(|m| {
            m.push_patch_path(rel);
        })?;
        Ok(rel.to_string())
    }
}
