// SPDX-License-Identifier: MIT OR Apache-2.0
//! The final run summary (`summary.json`).

use crate::cost::CostTotals;
use crate::{RunStatus, SCHEMA_VERSION, StopReason, ThinkLevel};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Everything a caller needs to know about a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunSummary {
    /// Summary schema version (currently `1`).
    pub schema_version: u32,
    /// Run identity.
    pub run_id: String,
    /// Terminal status.
    pub status: RunStatus,
    /// Stop reason when the run ended early.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    /// Tier the run started at.
    pub think_level: ThinkLevel,
    /// Tier the run finished at (differs after escalation).
    pub final_think_level: ThinkLevel,
    /// Start time (UTC).
    pub started_at: DateTime<Utc>,
    /// Finish time (UTC).
    pub finished_at: DateTime<Utc>,
    /// Plan steps that completed.
    pub steps_completed: usize,
    /// Engine iterations consumed (repair rounds, attempts).
    pub iterations: u32,
    /// Number of tier escalations that occurred.
    pub escalation_count: u32,
    /// Whether the L3 judge was invoked.
    #[serde(default)]
    pub judge_invoked: bool,
    /// Why the judge was invoked, when it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_invocation_reason: Option<String>,
    /// Whether a verification-passing candidate was selected (L3).
    #[serde(default)]
    pub passing_candidate_selected: bool,
    /// Token and cost accumulation.
    pub cost: CostTotals,
    /// Paths of persisted verification reports.
    #[serde(default)]
    pub report_paths: Vec<String>,
    /// One-line human-readable outcome.
    pub summary: String,
}

impl RunSummary {
    /// Start a summary for a run; timestamps are filled in now and at
    /// finalization.
    pub fn begin(run_id: impl Into<String>, think_level: ThinkLevel) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            run_id: run_id.into(),
            status: RunStatus::Failure,
            stop_reason: None,
            think_level,
            final_think_level: think_level,
            started_at: now,
            finished_at: now,
            steps_completed: 0,
            iterations: 0,
            escalation_count: 0,
            judge_invoked: false,
            judge_invocation_reason: None,
            passing_candidate_selected: false,
            cost: CostTotals::default(),
            report_paths: Vec::new(),
            summary: String::new(),
        }
    }

    /// Seal the summary with a terminal status and outcome line.
    pub fn finish(&mut self, status: RunStatus, summary: impl Into<String>) {
        self.status = status;
        self.summary = summary.into();
        self.finished_at = Utc::now();
    }
}
