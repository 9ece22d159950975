// SPDX-License-Identifier: MIT OR Apache-2.0
//! orc-core
//!
//! The stable contract for the orc run engine.
//!
//! Everything that is persisted to a run's artifact directory, written to the
//! trace, or exchanged between components lives here: run identity, think
//! levels, budgets, plans, trace events, verification reports, candidates,
//! the manifest, and the run summary.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Candidate patches and their evaluation results (L3).
pub mod candidate;
/// Per-provider token and cost accounting types.
pub mod cost;
/// Trace event records.
pub mod event;
/// The run manifest referencing every persisted artifact.
pub mod manifest;
/// Plans: ordered step lists and L3 plan trees.
pub mod plan;
/// Plugin SDK contract (manifest + version negotiation).
pub mod plugin;
/// Provider configuration shared between config loading and the registry.
pub mod provider;
/// The final run summary.
pub mod summary;
/// Verification reports and failure signatures.
pub mod verify;

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Schema version stamped on every trace record and persisted artifact.
pub const SCHEMA_VERSION: u32 = 1;

/// Escalation tier of the run engine.
///
/// Levels are ordered: escalation may only move upward within a run
/// (`L2 -> L3` is legal, any downgrade is not).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum ThinkLevel {
    /// Single-shot: one prompt, one diff, no plan, no verification.
    L0,
    /// Planned execution without verification.
    L1,
    /// Plan + verify + bounded repair loop.
    L2,
    /// Best-of-N candidates with judge tie-break and diagnosis.
    L3,
}

impl ThinkLevel {
    /// Parse a user-facing level string (`"L0"`..`"L3"`, case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "L0" => Some(Self::L0),
            "L1" => Some(Self::L1),
            "L2" => Some(Self::L2),
            "L3" => Some(Self::L3),
            _ => None,
        }
    }
}

impl std::fmt::Display for ThinkLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::L0 => "L0",
            Self::L1 => "L1",
            Self::L2 => "L2",
            Self::L3 => "L3",
        };
        f.write_str(s)
    }
}

/// Why a run stopped before (or at) completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A budget ceiling (time, iterations, cost, or tool calls) was hit.
    BudgetExceeded,
    /// The executor repeatedly produced output with no extractable diff.
    InvalidOutput,
    /// The same apply error repeated on consecutive attempts.
    RepeatedFailure,
    /// Verification kept failing with an unchanged signature.
    NonImproving,
    /// The run was cancelled from outside.
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BudgetExceeded => "budget_exceeded",
            Self::InvalidOutput => "invalid_output",
            Self::RepeatedFailure => "repeated_failure",
            Self::NonImproving => "non_improving",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The goal was carried out (and verified, where the tier verifies).
    Success,
    /// The run ended without a usable change set.
    Failure,
}

/// Execution state of a single plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// Not started.
    Pending,
    /// Waiting on the executor provider.
    Generating,
    /// A candidate diff is being applied.
    Applying,
    /// The diff landed in the working tree.
    Applied,
    /// Verification commands are running.
    Verifying,
    /// The step failed terminally.
    Failed,
    /// The step was skipped because the run stopped.
    Abandoned,
}

/// Per-run ceilings. `None` means that dimension is unlimited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Budget {
    /// Maximum completed iterations (repair rounds, step attempts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iter: Option<u32>,
    /// Maximum wall-clock time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<u64>,
    /// Maximum accumulated provider cost in USD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Maximum tool (subprocess) invocations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<u32>,
}

impl Default for Budget {
    /// The documented default: 4 iterations, 6 tool calls, 10 minutes.
    fn default() -> Self {
        Self {
            iter: Some(4),
            time_ms: Some(10 * 60 * 1000),
            cost_usd: None,
            tool: Some(6),
        }
    }
}

/// Generate a fresh clock-derived run id: `run-<utc compact>-<uuid prefix>`.
pub fn new_run_id() -> String {
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{stamp}-{}", &suffix[..8])
}

/// Sanitize a user-supplied run id so it is safe as a directory name.
///
/// Anything outside `[A-Za-z0-9._-]` is replaced with `_`; an empty result
/// falls back to a generated id.
pub fn sanitize_run_id(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('_').is_empty() {
        new_run_id()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn think_levels_are_ordered() {
        assert!(ThinkLevel::L0 < ThinkLevel::L1);
        assert!(ThinkLevel::L2 < ThinkLevel::L3);
    }

    #[test]
    fn think_level_parse_is_case_insensitive() {
        assert_eq!(ThinkLevel::parse("l2"), Some(ThinkLevel::L2));
        assert_eq!(ThinkLevel::parse("L3"), Some(ThinkLevel::L3));
        assert_eq!(ThinkLevel::parse("L4"), None);
    }

    #[test]
    fn default_budget_matches_documentation() {
        let b = Budget::default();
        assert_eq!(b.iter, Some(4));
        assert_eq!(b.tool, Some(6));
        assert_eq!(b.time_ms, Some(600_000));
        assert_eq!(b.cost_usd, None);
    }

    #[test]
    fn stop_reason_serializes_snake_case() {
        let json = serde_json::to_string(&StopReason::BudgetExceeded).unwrap();
        assert_eq!(json, "\"budget_exceeded\"");
    }

    #[test]
    fn run_ids_are_unique_and_prefixed() {
        let a = new_run_id();
        let b = new_run_id();
        assert!(a.starts_with("run-"));
        assert_ne!(a, b);
    }

    #[test]
    fn sanitize_replaces_path_separators() {
        assert_eq!(sanitize_run_id("a/b:c"), "a_b_c");
    }

    #[test]
    fn sanitize_falls_back_on_empty() {
        assert!(sanitize_run_id("///").starts_with("run-"));
    }
}
