// SPDX-License-Identifier: MIT OR Apache-2.0
//! Trace event records.
//!
//! One [`RunEvent`] per line in `trace.jsonl`. Records are self-describing:
//! the serialized form carries `type`, `schema_version`, `timestamp`,
//! `run_id`, and the variant payload flattened alongside.

use crate::{RunStatus, SCHEMA_VERSION, StepState, StopReason, ThinkLevel};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single record in the run trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunEvent {
    /// Trace schema version (currently `1`).
    pub schema_version: u32,
    /// Emission time (UTC).
    pub timestamp: DateTime<Utc>,
    /// Run this event belongs to.
    pub run_id: String,
    /// Event kind and payload.
    #[serde(flatten)]
    pub kind: RunEventKind,
}

impl RunEvent {
    /// Stamp a new event for `run_id` with the current time.
    pub fn now(run_id: impl Into<String>, kind: RunEventKind) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            timestamp: Utc::now(),
            run_id: run_id.into(),
            kind,
        }
    }
}

/// Every event kind the engine and its components can emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEventKind {
    /// The run began.
    RunStarted {
        /// The user's goal, verbatim.
        goal: String,
        /// Tier the run started at.
        think_level: ThinkLevel,
    },
    /// The engine moved to a higher tier.
    RunEscalated {
        /// Tier before escalation.
        from: ThinkLevel,
        /// Tier after escalation.
        to: ThinkLevel,
        /// Trigger description (non-improving iterations, apply failures).
        reason: String,
    },
    /// The run stopped before natural completion.
    RunStopped {
        /// Machine-readable stop reason.
        reason: StopReason,
        /// Human-readable detail.
        detail: String,
    },
    /// Terminal event; always the last record in a trace.
    RunFinished {
        /// Terminal status.
        status: RunStatus,
        /// One-line outcome summary.
        summary: String,
    },

    /// The planner provider is about to be called.
    PlanRequested {
        /// Goal being planned.
        goal: String,
    },
    /// A plan was parsed and persisted.
    PlanCreated {
        /// Number of executable steps.
        step_count: usize,
        /// Relative path of `plan.json` inside the run directory.
        plan_path: String,
    },

    /// A provider was resolved for a role.
    ProviderSelected {
        /// Role: `planner`, `executor`, or `reviewer`.
        role: String,
        /// Configured provider id.
        provider_id: String,
    },
    /// A provider call failed and was handled locally.
    ProviderCallFailed {
        /// Configured provider id.
        provider_id: String,
        /// Error description.
        error: String,
    },

    /// A plan step changed execution state.
    StepStateChanged {
        /// Positional step id (`"1"`, `"2.3"`).
        step_id: String,
        /// New state.
        state: StepState,
    },

    /// A candidate diff was applied to the working tree.
    PatchApplied {
        /// Step the patch belongs to.
        step_id: String,
        /// Number of files the patch touched.
        files_changed: usize,
    },
    /// Applying a candidate diff failed.
    PatchApplyFailed {
        /// Step the patch belongs to.
        step_id: String,
        /// Tagged error description.
        error: String,
    },
    /// A recoverable VCS snapshot was created.
    CheckpointCreated {
        /// Checkpoint label.
        label: String,
        /// VCS ref identifying the snapshot.
        reference: String,
    },
    /// The working tree was restored.
    RollbackPerformed {
        /// Ref the tree was restored to (`"HEAD"` or a checkpoint ref).
        target_ref: String,
    },

    /// Verification commands are starting.
    VerificationStarted {
        /// Engine iteration the verification belongs to.
        iteration: u32,
        /// Number of commands selected.
        command_count: usize,
    },
    /// Verification finished.
    VerificationFinished {
        /// Engine iteration the verification belongs to.
        iteration: u32,
        /// Whether every check passed.
        passed: bool,
        /// Failure signature when any check failed.
        failure_signature: Option<String>,
    },

    /// One L3 candidate finished generating.
    CandidateGenerated {
        /// Candidate index within the batch.
        index: usize,
        /// Provider that produced it.
        provider_id: String,
        /// Whether a non-empty diff was extractable.
        valid: bool,
        /// Generation latency in milliseconds.
        duration_ms: u64,
    },
    /// The diagnoser produced a hypothesis.
    DiagnosisCompleted {
        /// Iteration that triggered diagnosis.
        iteration: u32,
        /// Selected (highest-confidence) hypothesis.
        hypothesis: String,
        /// Confidence in `[0, 1]`.
        confidence: f64,
    },

    /// Semantic search was configured but failed; the run continues without.
    SemanticSearchFailed {
        /// Error description.
        error: String,
    },
}

impl RunEventKind {
    /// Short type tag used in logs; equals the serialized `type` field.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::RunEscalated { .. } => "run_escalated",
            Self::RunStopped { .. } => "run_stopped",
            Self::RunFinished { .. } => "run_finished",
            Self::PlanRequested { .. } => "plan_requested",
            Self::PlanCreated { .. } => "plan_created",
            Self::ProviderSelected { .. } => "provider_selected",
            Self::ProviderCallFailed { .. } => "provider_call_failed",
            Self::StepStateChanged { .. } => "step_state_changed",
            Self::PatchApplied { .. } => "patch_applied",
            Self::PatchApplyFailed { .. } => "patch_apply_failed",
            Self::CheckpointCreated { .. } => "checkpoint_created",
            Self::RollbackPerformed { .. } => "rollback_performed",
            Self::VerificationStarted { .. } => "verification_started",
            Self::VerificationFinished { .. } => "verification_finished",
            Self::CandidateGenerated { .. } => "candidate_generated",
            Self::DiagnosisCompleted { .. } => "diagnosis_completed",
            Self::SemanticSearchFailed { .. } => "semantic_search_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_record_is_self_describing() {
        let ev = RunEvent::now(
            "run-1",
            RunEventKind::RunStarted {
                goal: "fix it".into(),
                think_level: ThinkLevel::L1,
            },
        );
        let v: serde_json::Value = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "run_started");
        assert_eq!(v["schema_version"], 1);
        assert_eq!(v["run_id"], "run-1");
        assert_eq!(v["goal"], "fix it");
    }

    #[test]
    fn roundtrip_preserves_kind() {
        let ev = RunEvent::now(
            "r",
            RunEventKind::RollbackPerformed {
                target_ref: "HEAD".into(),
            },
        );
        let json = serde_json::to_string(&ev).unwrap();
        let back: RunEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, ev.kind);
    }

    #[test]
    fn type_name_matches_serde_tag() {
        let kinds = [
            RunEventKind::RunStopped {
                reason: StopReason::Cancelled,
                detail: String::new(),
            },
            RunEventKind::SemanticSearchFailed {
                error: "boom".into(),
            },
            RunEventKind::VerificationFinished {
                iteration: 0,
                passed: true,
                failure_signature: None,
            },
        ];
        for kind in kinds {
            let v = serde_json::to_value(RunEvent::now("r", kind.clone())).unwrap();
            assert_eq!(v["type"], kind.type_name());
        }
    }
}
