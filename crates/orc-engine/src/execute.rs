// SPDX-License-Identifier: MIT OR Apache-2.0
//! Execution service: apply a proposed diff inside a checkpoint window.
//!
//! Contract: limits come from config; a `limit` failure consults the
//! confirmation provider (default deny) for one unlimited retry; success
//! emits `PatchApplied` and creates a checkpoint unless disabled; any
//! failure emits `PatchApplyFailed`, rolls the tree back to HEAD, and
//! emits `RollbackPerformed`. Unexpected errors follow the same rollback
//! discipline.

use crate::trace::TraceBus;
use orc_core::event::RunEventKind;
use orc_patch::{ApplyOptions, apply_unified_diff};
use orc_providers::Confirmation;
use orc_vcs::GitGateway;
use std::sync::Arc;
use tracing::{debug, warn};

/// Patch ceilings the service enforces.
#[derive(Debug, Clone)]
pub struct ExecutionLimits {
    /// Maximum files per patch.
    pub max_files_changed: usize,
    /// Maximum added + deleted lines per patch.
    pub max_lines_changed: usize,
    /// Whether binary sections are tolerated.
    pub allow_binary: bool,
}

/// Outcome of one apply attempt.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// Whether the diff landed.
    pub success: bool,
    /// Files the patch touched (on success).
    pub files_changed: Vec<String>,
    /// Checkpoint ref created after the apply, when enabled.
    pub checkpoint: Option<String>,
    /// Tagged error text (`conflict: ...`), on failure.
    pub error: Option<String>,
}

/// Applies diffs with confirmation/limit-retry and rollback.
pub struct ExecutionService {
    git: GitGateway,
    bus: Arc<TraceBus>,
    limits: ExecutionLimits,
    confirm: Arc<dyn Confirmation>,
    no_checkpoints: bool,
}

impl ExecutionService {
    /// Create the service for one run.
    pub fn new(
        git: GitGateway,
        bus: Arc<TraceBus>,
        limits: ExecutionLimits,
        confirm: Arc<dyn Confirmation>,
        no_checkpoints: bool,
    ) -> Self {
        Self {
            git,
            bus,
            limits,
            confirm,
            no_checkpoints,
        }
    }

    /// Validate a diff against the current tree without mutating it.
    pub fn dry_run(&self, diff: &str) -> Result<Vec<String>, String> {
        let options = ApplyOptions {
            max_files_changed: Some(self.limits.max_files_changed),
            max_lines_touched: Some(self.limits.max_lines_changed),
            allow_binary: self.limits.allow_binary,
            dry_run: true,
        };
        apply_unified_diff(self.git.repo_root(), diff, &options)
            .map(|applied| applied.files_changed)
            .map_err(|e| format!("{}: {e}", e.tag()))
    }

    /// Apply `diff` for `step_id` under the service contract.
    pub async fn apply(&self, step_id: &str, diff: &str) -> ApplyOutcome {
        let options = ApplyOptions {
            max_files_changed: Some(self.limits.max_files_changed),
            max_lines_touched: Some(self.limits.max_lines_changed),
            allow_binary: self.limits.allow_binary,
            dry_run: false,
        };

        let mut result = apply_unified_diff(self.git.repo_root(), diff, &options);
        if let Err(error) = &result {
            if error.tag() == "limit" {
                let prompt = format!("patch exceeds configured limits ({error}); apply anyway?");
                if self.confirm.confirm(&prompt).await {
                    debug!(step_id, "limit override confirmed; retrying unlimited");
                    let unlimited = ApplyOptions {
                        max_files_changed: None,
                        max_lines_touched: None,
                        allow_binary: self.limits.allow_binary,
                        dry_run: false,
                    };
                    result = apply_unified_diff(self.git.repo_root(), diff, &unlimited);
                }
            }
        }

        match result {
            Ok(applied) => {
                self.bus.emit(RunEventKind::PatchApplied {
                    step_id: step_id.to_string(),
                    files_changed: applied.files_changed.len(),
                });
                let checkpoint = if self.no_checkpoints {
                    None
                } else {
                    match self.git.create_checkpoint(&format!("step {step_id}")) {
                        Ok(reference) => {
                            self.bus.emit(RunEventKind::CheckpointCreated {
                                label: format!("step {step_id}"),
                                reference: reference.clone(),
                            });
                            Some(reference)
                        }
                        Err(e) => {
                            warn!(error = %e, "checkpoint creation failed");
                            None
                        }
                    }
                };
                ApplyOutcome {
                    success: true,
                    files_changed: applied.files_changed,
                    checkpoint,
                    error: None,
                }
            }
            Err(error) => {
                let tagged = format!("{}: {error}", error.tag());
                self.bus.emit(RunEventKind::PatchApplyFailed {
                    step_id: step_id.to_string(),
                    error: tagged.clone(),
                });
                if let Err(e) = self.git.rollback_to_checkpoint("HEAD") {
                    warn!(error = %e, "rollback to HEAD failed");
                }
                self.bus.emit(RunEventKind::RollbackPerformed {
                    target_ref: "HEAD".into(),
                });
                ApplyOutcome {
                    success: false,
                    files_changed: Vec::new(),
                    checkpoint: None,
                    error: Some(tagged),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_providers::{AllowAll, DenyAll};
    use std::fs;
    use std::path::Path;

    const DIFF: &str = "--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-one\n+two\n";

    fn service(dir: &Path, confirm: Arc<dyn Confirmation>, no_checkpoints: bool) -> ExecutionService {
        fs::write(dir.join("a.txt"), "one\n").unwrap();
        let git = GitGateway::new(dir);
        git.ensure_repo().unwrap();
        // The trace lives in the ignored state dir, like in a real run,
        // so rollback cleans cannot remove it.
        fs::create_dir_all(dir.join(".orchestrator")).unwrap();
        let bus = Arc::new(
            TraceBus::open(&dir.join(".orchestrator/trace.jsonl"), "r", false).unwrap(),
        );
        ExecutionService::new(
            git,
            bus,
            ExecutionLimits {
                max_files_changed: 10,
                max_lines_changed: 100,
                allow_binary: false,
            },
            confirm,
            no_checkpoints,
        )
    }

    fn trace_types(dir: &Path) -> Vec<String> {
        fs::read_to_string(dir.join(".orchestrator/trace.jsonl"))
            .unwrap_or_default()
            .lines()
            .map(|l| {
                serde_json::from_str::<serde_json::Value>(l).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn successful_apply_checkpoints_and_emits() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(DenyAll), false);
        let outcome = svc.apply("1", DIFF).await;
        assert!(outcome.success);
        assert!(outcome.checkpoint.is_some());
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "two\n");
        let types = trace_types(dir.path());
        assert!(types.contains(&"patch_applied".to_string()));
        assert!(types.contains(&"checkpoint_created".to_string()));
    }

    #[tokio::test]
    async fn no_checkpoints_skips_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(DenyAll), true);
        let outcome = svc.apply("1", DIFF).await;
        assert!(outcome.success);
        assert!(outcome.checkpoint.is_none());
        assert!(!trace_types(dir.path()).contains(&"checkpoint_created".to_string()));
    }

    #[tokio::test]
    async fn conflict_rolls_back_and_emits() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(DenyAll), false);
        let bad = "--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-not the content\n+nope\n";
        let outcome = svc.apply("1", bad).await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().starts_with("conflict"));
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "one\n");
        let types = trace_types(dir.path());
        assert!(types.contains(&"patch_apply_failed".to_string()));
        assert!(types.contains(&"rollback_performed".to_string()));
    }

    #[tokio::test]
    async fn limit_failure_denied_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut svc = service(dir.path(), Arc::new(DenyAll), false);
        svc.limits.max_lines_changed = 1;
        let outcome = svc.apply("1", DIFF).await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().starts_with("limit"));
    }

    #[tokio::test]
    async fn limit_failure_retries_on_affirmative() {
        let dir = tempfile::tempdir().unwrap();
        let mut svc = service(dir.path(), Arc::new(AllowAll), false);
        svc.limits.max_lines_changed = 1;
        let outcome = svc.apply("1", DIFF).await;
        assert!(outcome.success);
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "two\n");
    }

    #[tokio::test]
    async fn dry_run_validates_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(DenyAll), false);
        let files = svc.dry_run(DIFF).unwrap();
        assert_eq!(files, vec!["a.txt"]);
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "one\n");
    }
}
