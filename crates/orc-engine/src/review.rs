// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reviewer ↔ executor revision cycle.
//!
//! Bounded by `max_reviews`. Each round the reviewer returns a JSON
//! verdict; `approve` ends the loop with the current patch, `revise`
//! sends the executor back for a new diff (one retry on a missing diff,
//! one retry on a dry-run apply failure). A non-JSON review is persisted
//! as a parse-error artifact and ends the loop. `approve` is
//! authoritative and the last extractable diff is always kept.

use crate::artifacts::ArtifactStore;
use crate::execute::ExecutionService;
use crate::prompts;
use orc_patch::extract_diff;
use orc_providers::{GenerateRequest, Provider};
use serde::Deserialize;
use tracing::{debug, warn};

/// The reviewer's JSON verdict.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewVerdict {
    /// `approve` or `revise`.
    pub verdict: String,
    /// One-line assessment.
    #[serde(default)]
    pub summary: String,
    /// Problems found.
    #[serde(default)]
    pub issues: Vec<String>,
    /// Changes that must land before approval.
    #[serde(default, alias = "requiredChanges")]
    pub required_changes: Vec<String>,
    /// Non-blocking suggestions.
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Risk flags.
    #[serde(default, alias = "riskFlags")]
    pub risk_flags: Vec<String>,
    /// Tests the reviewer wants added.
    #[serde(default, alias = "suggestedTests")]
    pub suggested_tests: Vec<String>,
    /// Reviewer confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,
}

/// Parse a verdict from raw reviewer output (tolerating a JSON fence).
pub fn parse_verdict(text: &str) -> Option<ReviewVerdict> {
    let trimmed = text.trim();
    if let Ok(verdict) = serde_json::from_str::<ReviewVerdict>(trimmed) {
        return Some(verdict);
    }
    let unfenced = strip_json_fence(trimmed)?;
    serde_json::from_str(&unfenced).ok()
}

pub(crate) fn strip_json_fence(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines
        .iter()
        .position(|l| l.trim() == "```json" || l.trim() == "```")?;
    let end = lines[start + 1..]
        .iter()
        .position(|l| l.trim() == "```")
        .map(|i| start + 1 + i)?;
    Some(lines[start + 1..end].join("\n"))
}

/// Result of one review loop.
#[derive(Debug)]
pub struct ReviewOutcome {
    /// The patch to apply (the last extractable, dry-run-valid diff).
    pub patch: String,
    /// Whether the reviewer approved it (false on cap or parse error).
    pub approved: bool,
    /// Rounds executed.
    pub rounds: u32,
}

/// Run the bounded review loop for one step's patch.
#[allow(clippy::too_many_arguments)]
pub async fn run_review_loop(
    artifacts: &ArtifactStore,
    execution: &ExecutionService,
    executor: &dyn Provider,
    reviewer: &dyn Provider,
    step_index: usize,
    step_text: &str,
    initial_patch: String,
    max_reviews: u32,
) -> ReviewOutcome {
    let mut patch = initial_patch;
    for round in 0..max_reviews {
        let mut request = GenerateRequest::prompt(prompts::review(step_text, &patch));
        request.json_mode = true;
        let response = match reviewer.generate(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "reviewer call failed; keeping current patch");
                return ReviewOutcome {
                    patch,
                    approved: false,
                    rounds: round,
                };
            }
        };

        let Some(verdict) = parse_verdict(&response.text) else {
            let rel = format!("review_loop/step_{step_index}_review/review_parse_error.txt");
            let _ = artifacts.write_text(&rel, &response.text);
            warn!(round, "non-JSON review verdict; ending loop");
            return ReviewOutcome {
                patch,
                approved: false,
                rounds: round + 1,
            };
        };
        let _ = artifacts.write_json(
            &format!("review_loop/step_{step_index}_review/round_{round}.json"),
            &serde_json::json!({
                "verdict": verdict.verdict,
                "summary": verdict.summary,
                "issues": verdict.issues,
                "required_changes": verdict.required_changes,
                "suggestions": verdict.suggestions,
                "risk_flags": verdict.risk_flags,
                "suggested_tests": verdict.suggested_tests,
                "confidence": verdict.confidence,
            }),
        );

        if verdict.verdict.eq_ignore_ascii_case("approve") {
            debug!(round, "reviewer approved");
            return ReviewOutcome {
                patch,
                approved: true,
                rounds: round + 1,
            };
        }

        // Revise: ask the executor for a new diff, with bounded retries.
        match revised_patch(execution, executor, step_text, &patch, &verdict).await {
            Some(new_patch) => {
                let _ = artifacts.write_text(
                    &format!("review_loop/step_{step_index}_revision/round_{round}.diff"),
                    &new_patch,
                );
                patch = new_patch;
            }
            None => {
                warn!(round, "revision produced no usable diff; keeping current patch");
                return ReviewOutcome {
                    patch,
                    approved: false,
                    rounds: round + 1,
                };
            }
        }
    }
    ReviewOutcome {
        patch,
        approved: false,
        rounds: max_reviews,
    }
}

/// One revision: extract a diff (retry once with a hint on a miss), then
/// dry-run it (retry once on failure).
async fn revised_patch(
    execution: &ExecutionService,
    executor: &dyn Provider,
    step_text: &str,
    current: &str,
    verdict: &ReviewVerdict,
) -> Option<String> {
    let base_prompt = prompts::revise(
        step_text,
        current,
        &verdict.required_changes,
        &verdict.issues,
    );

    let mut hint: Option<String> = None;
    for _attempt in 0..2 {
        let prompt = match &hint {
            Some(issue) => format!("{base_prompt}\n\nPREVIOUS ATTEMPT ISSUE:\n{issue}"),
            None => base_prompt.clone(),
        };
        let response = executor.generate(GenerateRequest::prompt(prompt)).await.ok()?;
        let Some(diff) = extract_diff(&response.text) else {
            hint = Some("your reply contained no extractable unified diff".into());
            continue;
        };
        match execution.dry_run(&diff) {
            Ok(_) => return Some(diff),
            Err(error) => {
                hint = Some(format!("the diff does not apply: {error}"));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_parses_camel_case_fields() {
        let json = r#"{"verdict":"revise","requiredChanges":["add tests"],"confidence":0.7}"#;
        let verdict = parse_verdict(json).unwrap();
        assert_eq!(verdict.verdict, "revise");
        assert_eq!(verdict.required_changes, vec!["add tests"]);
    }

    #[test]
    fn fenced_verdict_parses() {
        let text = "Here you go:\n```json\n{\"verdict\":\"approve\"}\n```";
        assert_eq!(parse_verdict(text).unwrap().verdict, "approve");
    }

    #[test]
    fn prose_is_not_a_verdict() {
        assert!(parse_verdict("Looks good to me!").is_none());
    }
}
