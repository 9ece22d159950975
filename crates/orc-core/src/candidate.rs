// SPDX-License-Identifier: MIT OR Apache-2.0
//! Candidate patches and their evaluation results (L3).

use crate::verify::VerificationReport;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Size statistics of an extracted unified diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PatchStats {
    /// Number of files touched.
    pub files_changed: usize,
    /// Added lines across all hunks.
    pub lines_added: usize,
    /// Deleted lines across all hunks.
    pub lines_deleted: usize,
}

impl PatchStats {
    /// Total touched lines (additions + deletions).
    pub fn lines_touched(&self) -> usize {
        self.lines_added + self.lines_deleted
    }
}

/// One of N executor proposals for the same step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Candidate {
    /// Index within the generation batch (0-based).
    pub index: usize,
    /// Provider that produced this candidate.
    pub provider_id: String,
    /// Raw model output, verbatim.
    pub raw_output: String,
    /// Extracted unified diff, when one was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    /// Diff size statistics, when a diff was extracted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_stats: Option<PatchStats>,
    /// `true` iff a non-empty unified diff was extractable.
    pub valid: bool,
    /// Generation latency in milliseconds.
    pub duration_ms: u64,
}

/// A candidate together with its verification outcome and score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EvaluationResult {
    /// Index of the evaluated candidate.
    pub candidate_index: usize,
    /// Verification outcome after applying the candidate.
    pub report: VerificationReport,
    /// Deterministic score; higher is better.
    pub score: f64,
}

/// Score for a candidate that passed verification: smaller diffs win ties.
pub fn passing_score(patch_lines: usize) -> f64 {
    1000.0 - patch_lines as f64 / 10.0
}

/// Score for a failing candidate: dominated by the failed-check count.
pub fn failing_score(failed_checks: usize, patch_lines: usize) -> f64 {
    -100.0 * failed_checks as f64 - patch_lines as f64 / 10.0
}

/// Score used when a candidate could not even be applied.
pub const APPLY_FAILED_SCORE: f64 = -1.0e6;

/// One reviewer ranking entry for a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CandidateRanking {
    /// Candidate being ranked (its batch index).
    #[serde(alias = "candidateId")]
    pub candidate_id: usize,
    /// Reviewer score in `[0, 10]`.
    pub score: f64,
    /// Free-form reasons.
    #[serde(default)]
    pub reasons: Vec<String>,
    /// Flags such as `"touches-auth"`, `"large-refactor"`.
    #[serde(default, alias = "riskFlags")]
    pub risk_flags: Vec<String>,
}

/// The reviewer's verdict over a candidate batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReviewRanking {
    /// Per-candidate rankings.
    #[serde(default)]
    pub rankings: Vec<CandidateRanking>,
    /// Fixes the reviewer requires regardless of winner.
    #[serde(default, alias = "requiredFixes")]
    pub required_fixes: Vec<String>,
    /// Tests the reviewer suggests adding.
    #[serde(default, alias = "suggestedTests")]
    pub suggested_tests: Vec<String>,
    /// Reviewer confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,
}

/// The judge's tie-break decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JudgeDecision {
    /// Winning candidate (batch index).
    #[serde(alias = "winnerCandidateId")]
    pub winner_candidate_id: usize,
    /// Judge confidence in `[0, 1]`.
    pub confidence: f64,
    /// Free-form rationale.
    pub rationale: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smaller_passing_diff_scores_higher() {
        assert!(passing_score(10) > passing_score(200));
    }

    #[test]
    fn any_passing_beats_any_failing() {
        assert!(passing_score(100_000) > failing_score(0, 0) || failing_score(0, 0) == 0.0);
        assert!(passing_score(500) > failing_score(1, 10));
    }

    #[test]
    fn more_failed_checks_score_lower() {
        assert!(failing_score(1, 50) > failing_score(3, 50));
    }

    #[test]
    fn apply_failure_is_worst() {
        assert!(APPLY_FAILED_SCORE < failing_score(100, 100_000));
    }

    #[test]
    fn ranking_parses_camel_case_model_output() {
        let json = r#"{"rankings":[{"candidateId":1,"score":7.5,"riskFlags":["big"]}],"confidence":0.8}"#;
        let parsed: ReviewRanking = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.rankings[0].candidate_id, 1);
        assert_eq!(parsed.rankings[0].risk_flags, vec!["big".to_string()]);
        assert!(parsed.required_fixes.is_empty());
    }
}
