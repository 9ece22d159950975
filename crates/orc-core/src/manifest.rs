// SPDX-License-Identifier: MIT OR Apache-2.0
//! The run manifest referencing every persisted artifact.
//!
//! The manifest is the root of the artifact graph: anything a run persists
//! must be reachable from it. It is append-only within a run and mutated
//! only under the engine's manifest lock.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// References to every artifact a run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Manifest {
    /// Run identity.
    pub run_id: String,
    /// When the run started (UTC).
    pub started_at: DateTime<Utc>,
    /// The invoking command line, for reproducibility.
    pub command: String,
    /// Absolute repository root the run operated on.
    pub repo_root: String,
    /// Absolute path of the per-run artifact directory.
    pub artifacts_dir: String,
    /// Trace file path, relative to `artifacts_dir`.
    pub trace_path: String,
    /// Summary file path, relative to `artifacts_dir`.
    pub summary_path: String,
    /// Effective (post-merge) config snapshot path.
    pub effective_config_path: String,
    /// Every persisted patch file, in save order, de-duplicated.
    #[serde(default)]
    pub patch_paths: Vec<String>,
    /// Persisted fused-context artifacts.
    #[serde(default)]
    pub context_paths: Vec<String>,
    /// Captured tool stdout/stderr logs.
    #[serde(default)]
    pub tool_log_paths: Vec<String>,
    /// Persisted verification reports.
    #[serde(default)]
    pub verification_paths: Vec<String>,
}

impl Manifest {
    /// Create a manifest with the standard relative artifact names.
    pub fn new(
        run_id: impl Into<String>,
        command: impl Into<String>,
        repo_root: impl Into<String>,
        artifacts_dir: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            command: command.into(),
            repo_root: repo_root.into(),
            artifacts_dir: artifacts_dir.into(),
            trace_path: "trace.jsonl".into(),
            summary_path: "summary.json".into(),
            effective_config_path: "effective-config.json".into(),
            patch_paths: Vec::new(),
            context_paths: Vec::new(),
            tool_log_paths: Vec::new(),
            verification_paths: Vec::new(),
        }
    }

    /// Append a patch path if not already present. Returns `true` on insert.
    pub fn push_patch_path(&mut self, path: impl Into<String>) -> bool {
        push_dedup(&mut self.patch_paths, path.into())
    }

    /// Append a context artifact path if not already present.
    pub fn push_context_path(&mut self, path: impl Into<String>) -> bool {
        push_dedup(&mut self.context_paths, path.into())
    }

    /// Append a tool log path if not already present.
    pub fn push_tool_log_path(&mut self, path: impl Into<String>) -> bool {
        push_dedup(&mut self.tool_log_paths, path.into())
    }

    /// Append a verification report path if not already present.
    pub fn push_verification_path(&mut self, path: impl Into<String>) -> bool {
        push_dedup(&mut self.verification_paths, path.into())
    }
}

fn push_dedup(list: &mut Vec<String>, value: String) -> bool {
    if list.contains(&value) {
        false
    } else {
        list.push(value);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_paths_are_deduplicated() {
        let mut m = Manifest::new("r", "orc run x", "/repo", "/repo/.orchestrator/runs/r");
        assert!(m.push_patch_path("patches/final.diff.patch"));
        assert!(!m.push_patch_path("patches/final.diff.patch"));
        assert_eq!(m.patch_paths.len(), 1);
    }

    #[test]
    fn standard_relative_names() {
        let m = Manifest::new("r", "cmd", "/repo", "/a");
        assert_eq!(m.trace_path, "trace.jsonl");
        assert_eq!(m.summary_path, "summary.json");
        assert_eq!(m.effective_config_path, "effective-config.json");
    }

    #[test]
    fn json_roundtrip() {
        let mut m = Manifest::new("r", "cmd", "/repo", "/a");
        m.push_tool_log_path("tool_logs/test.stdout");
        let json = serde_json::to_string_pretty(&m).unwrap();
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
