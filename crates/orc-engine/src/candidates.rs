// SPDX-License-Identifier: MIT OR Apache-2.0
//! L3 candidate generation, evaluation, and selection.
//!
//! Generation MAY fan out concurrently (the adapter must advertise
//! `concurrent`); evaluation is strictly serial because it mutates the
//! working tree inside a checkpoint window. Selection is stable and
//! deterministic: best passing candidate, else judge on near-tie or
//! all-failing batches with reviewer rankings, else least-bad by score.

use crate::EngineError;
use crate::artifacts::{ArtifactStore, ManifestHandle, PatchStore};
use crate::prompts;
use crate::review::strip_json_fence;
use crate::trace::TraceBus;
use orc_core::candidate::{
    APPLY_FAILED_SCORE, Candidate, EvaluationResult, JudgeDecision, ReviewRanking, failing_score,
    passing_score,
};
use orc_core::event::RunEventKind;
use orc_core::verify::VerificationReport;
use orc_patch::{ApplyOptions, apply_unified_diff, extract_diff, patch_stats};
use orc_providers::{GenerateRequest, Provider};
use orc_vcs::GitGateway;
use orc_verify::{VerificationRunner, VerifyCommand};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Generation temperature for candidate sampling.
const CANDIDATE_TEMPERATURE: f64 = 0.1;
/// Two top scores within this distance count as a near-tie.
const NEAR_TIE_MARGIN: f64 = 10.0;

/// Generate `best_of_n` candidates for one step.
///
/// Each request carries `orchestrator_candidate_index` metadata and low
/// temperature. Calls fan out concurrently only when `concurrent` is set.
/// Provider failures become invalid candidates (scored out later), never
/// errors.
#[allow(clippy::too_many_arguments)]
pub async fn generate_candidates(
    bus: &TraceBus,
    patches: &PatchStore,
    executor_id: &str,
    executor: Arc<dyn Provider>,
    concurrent: bool,
    best_of_n: usize,
    prompt: &str,
    iter: u32,
) -> Result<Vec<Candidate>, EngineError> {
    let build_request = |index: usize| {
        let mut request = GenerateRequest::prompt(prompt.to_string());
        request.temperature = Some(CANDIDATE_TEMPERATURE);
        request.metadata.insert(
            "orchestrator_candidate_index".into(),
            serde_json::json!(index),
        );
        request
    };

    let raw_results: Vec<(usize, Result<orc_providers::GenerateResponse, orc_providers::ProviderError>, u64)> =
        if concurrent {
            let futures: Vec<_> = (0..best_of_n)
                .map(|index| {
                    let executor = Arc::clone(&executor);
                    let request = build_request(index);
                    async move {
                        let started = Instant::now();
                        let result = executor.generate(request).await;
                        (index, result, started.elapsed().as_millis() as u64)
                    }
                })
                .collect();
            futures::future::join_all(futures).await
        } else {
            let mut results = Vec::with_capacity(best_of_n);
            for index in 0..best_of_n {
                let started = Instant::now();
                let result = executor.generate(build_request(index)).await;
                results.push((index, result, started.elapsed().as_millis() as u64));
            }
            results
        };

    let mut candidates = Vec::with_capacity(best_of_n);
    for (index, result, duration_ms) in raw_results {
        let raw_output = match result {
            Ok(response) => response.text,
            Err(error) => {
                bus.emit(RunEventKind::ProviderCallFailed {
                    provider_id: executor_id.to_string(),
                    error: error.to_string(),
                });
                String::new()
            }
        };
        let patch = extract_diff(&raw_output);
        let valid = patch.is_some();
        let stats = patch.as_deref().map(patch_stats);
        if let Some(diff) = &patch {
            patches
                .save_candidate(iter, index, diff)
                .map_err(EngineError::Other)?;
        }
        bus.emit(RunEventKind::CandidateGenerated {
            index,
            provider_id: executor_id.to_string(),
            valid,
            duration_ms,
        });
        candidates.push(Candidate {
            index,
            provider_id: executor_id.to_string(),
            raw_output,
            patch,
            patch_stats: stats,
            valid,
            duration_ms,
        });
    }
    Ok(candidates)
}

/// Evaluate every candidate serially: checkpoint → apply → verify →
/// rollback. Apply failures score [`APPLY_FAILED_SCORE`] without running
/// verification. Per-candidate reports are persisted.
#[allow(clippy::too_many_arguments)]
pub async fn evaluate_candidates(
    bus: &TraceBus,
    artifacts: &ArtifactStore,
    manifest: &ManifestHandle,
    git: &GitGateway,
    runner: &VerificationRunner,
    commands: &[VerifyCommand],
    candidates: &[Candidate],
    iter: u32,
) -> Result<Vec<EvaluationResult>, EngineError> {
    let mut evaluations = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let Some(diff) = &candidate.patch else {
            evaluations.push(EvaluationResult {
                candidate_index: candidate.index,
                report: VerificationReport::default(),
                score: APPLY_FAILED_SCORE,
            });
            continue;
        };

        let checkpoint = git
            .create_checkpoint(&format!("evaluate candidate {}", candidate.index))
            .map_err(EngineError::Other)?;
        bus.emit(RunEventKind::CheckpointCreated {
            label: format!("evaluate candidate {}", candidate.index),
            reference: checkpoint.clone(),
        });

        let applied = apply_unified_diff(
            git.repo_root(),
            diff,
            &ApplyOptions::default(),
        );
        let evaluation = match applied {
            Err(error) => {
                debug!(candidate = candidate.index, error = %error, "candidate failed to apply");
                EvaluationResult {
                    candidate_index: candidate.index,
                    report: VerificationReport::default(),
                    score: APPLY_FAILED_SCORE,
                }
            }
            Ok(_) => {
                bus.emit(RunEventKind::VerificationStarted {
                    iteration: iter,
                    command_count: commands.len(),
                });
                let outcome = runner
                    .run(commands, &format!("iter_{iter}_candidate_{}", candidate.index))
                    .await;
                bus.emit(RunEventKind::VerificationFinished {
                    iteration: iter,
                    passed: outcome.report.passed,
                    failure_signature: outcome.report.failure_signature.clone(),
                });
                for path in &outcome.log_paths {
                    manifest
                        .update(|m| {
                            m.push_tool_log_path(path);
                        })
                        .map_err(EngineError::Other)?;
                }

                let lines = candidate
                    .patch_stats
                    .map(|s| s.lines_touched())
                    .unwrap_or(0);
                let score = if outcome.report.passed {
                    passing_score(lines)
                } else {
                    let failed = outcome.report.checks.iter().filter(|c| !c.passed).count();
                    failing_score(failed, lines)
                };
                EvaluationResult {
                    candidate_index: candidate.index,
                    report: outcome.report,
                    score,
                }
            }
        };

        let report_rel = format!(
            "verification/iter_{iter}_candidate_{}_report.json",
            candidate.index
        );
        artifacts
            .write_json(&report_rel, &evaluation.report)
            .map_err(EngineError::Other)?;
        manifest
            .update(|m| {
                m.push_verification_path(&report_rel);
            })
            .map_err(EngineError::Other)?;

        git.rollback_to_checkpoint(&checkpoint)
            .map_err(EngineError::Other)?;
        bus.emit(RunEventKind::RollbackPerformed {
            target_ref: checkpoint,
        });
        evaluations.push(evaluation);
    }
    Ok(evaluations)
}

/// Outcome of candidate selection.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Chosen candidate index, `None` when nothing is usable.
    pub index: Option<usize>,
    /// Whether the chosen candidate passed verification.
    pub passing: bool,
    /// Whether the judge was consulted.
    pub judge_invoked: bool,
    /// Why the judge was consulted, when it was.
    pub judge_reason: Option<String>,
}

/// Select a candidate. Reviewer ranking is requested only when no
/// candidate passed, at least two are valid, and the reviewer is enabled;
/// the judge breaks near-ties and all-failing batches.
#[allow(clippy::too_many_arguments)]
pub async fn select_candidate(
    artifacts: &ArtifactStore,
    reviewer: Option<(&str, &dyn Provider)>,
    enable_judge: bool,
    step_text: &str,
    candidates: &[Candidate],
    evaluations: &[EvaluationResult],
    iter: u32,
) -> Result<Selection, EngineError> {
    // 1. Best passing candidate, smallest-diff ties already folded into
    //    the score; stable on exact ties by index.
    let mut passing: Vec<&EvaluationResult> =
        evaluations.iter().filter(|e| e.report.passed).collect();
    passing.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.candidate_index.cmp(&b.candidate_index))
    });
    if let Some(best) = passing.first() {
        persist_ranking(artifacts, evaluations, None, Some(best.candidate_index), None, iter)?;
        return Ok(Selection {
            index: Some(best.candidate_index),
            passing: true,
            judge_invoked: false,
            judge_reason: None,
        });
    }

    let valid: Vec<&Candidate> = candidates.iter().filter(|c| c.valid).collect();
    if valid.is_empty() {
        persist_ranking(artifacts, evaluations, None, None, None, iter)?;
        return Ok(Selection {
            index: None,
            passing: false,
            judge_invoked: false,
            judge_reason: None,
        });
    }

    // 2. Reviewer ranking + judge tie-break.
    let mut ranking: Option<ReviewRanking> = None;
    if valid.len() >= 2 {
        if let Some((_, reviewer)) = reviewer {
            ranking = request_ranking(reviewer, step_text, &valid).await;
        }
    }

    let judge_reason = judge_trigger(evaluations);
    if enable_judge && ranking.is_some() {
        if let Some(reason) = &judge_reason {
            if let Some((_, reviewer)) = reviewer {
                if let Some(decision) =
                    request_judgement(reviewer, step_text, &valid, reason).await
                {
                    // Unknown winner ids fall back to the first candidate.
                    let winner = if candidates.iter().any(|c| c.index == decision.winner_candidate_id)
                    {
                        decision.winner_candidate_id
                    } else {
                        warn!(
                            winner = decision.winner_candidate_id,
                            "judge picked unknown candidate; falling back to first"
                        );
                        valid[0].index
                    };
                    persist_ranking(
                        artifacts,
                        evaluations,
                        ranking.as_ref(),
                        Some(winner),
                        Some(&decision),
                        iter,
                    )?;
                    return Ok(Selection {
                        index: Some(winner),
                        passing: false,
                        judge_invoked: true,
                        judge_reason: Some(reason.clone()),
                    });
                }
            }
        }
    }

    // 3. Least-bad by evaluation score.
    let mut ordered: Vec<&EvaluationResult> = evaluations
        .iter()
        .filter(|e| candidates.iter().any(|c| c.index == e.candidate_index && c.valid))
        .collect();
    ordered.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.candidate_index.cmp(&b.candidate_index))
    });
    let index = ordered.first().map(|e| e.candidate_index);
    persist_ranking(artifacts, evaluations, ranking.as_ref(), index, None, iter)?;
    Ok(Selection {
        index,
        passing: false,
        judge_invoked: false,
        judge_reason: None,
    })
}

/// Judge triggers: every candidate failing, or the top two scores nearly
/// tied.
fn judge_trigger(evaluations: &[EvaluationResult]) -> Option<String> {
    if evaluations.iter().all(|e| !e.report.passed) {
        return Some("all candidates failed verification".into());
    }
    let mut scores: Vec<f64> = evaluations.iter().map(|e| e.score).collect();
    scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    if scores.len() >= 2 && (scores[0] - scores[1]).abs() <= NEAR_TIE_MARGIN {
        return Some("evaluation near-tie".into());
    }
    None
}

async fn request_ranking(
    reviewer: &dyn Provider,
    step_text: &str,
    valid: &[&Candidate],
) -> Option<ReviewRanking> {
    let entries: Vec<(usize, &str)> = valid
        .iter()
        .filter_map(|c| c.patch.as_deref().map(|p| (c.index, p)))
        .collect();
    let mut request = GenerateRequest::prompt(prompts::ranking(step_text, &entries));
    request.json_mode = true;
    let response = reviewer.generate(request).await.ok()?;
    parse_json_lenient::<ReviewRanking>(&response.text)
}

async fn request_judgement(
    reviewer: &dyn Provider,
    step_text: &str,
    valid: &[&Candidate],
    reason: &str,
) -> Option<JudgeDecision> {
    let entries: Vec<(usize, &str)> = valid
        .iter()
        .filter_map(|c| c.patch.as_deref().map(|p| (c.index, p)))
        .collect();
    let mut request = GenerateRequest::prompt(prompts::judge(step_text, &entries, reason));
    request.json_mode = true;
    let response = reviewer.generate(request).await.ok()?;
    parse_json_lenient::<JudgeDecision>(&response.text)
}

fn parse_json_lenient<T: serde::de::DeserializeOwned>(text: &str) -> Option<T> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    serde_json::from_str(&strip_json_fence(trimmed)?).ok()
}

fn persist_ranking(
    artifacts: &ArtifactStore,
    evaluations: &[EvaluationResult],
    reviewer: Option<&ReviewRanking>,
    selected: Option<usize>,
    judge: Option<&JudgeDecision>,
    iter: u32,
) -> Result<(), EngineError> {
    artifacts
        .write_json(
            &format!("selection/iter_{iter}_ranking.json"),
            &serde_json::json!({
                "evaluations": evaluations
                    .iter()
                    .map(|e| serde_json::json!({
                        "candidate_index": e.candidate_index,
                        "score": e.score,
                        "passed": e.report.passed,
                    }))
                    .collect::<Vec<_>>(),
                "reviewer": reviewer,
                "judge": judge,
                "selected": selected,
            }),
        )
        .map_err(EngineError::Other)
}
