// SPDX-License-Identifier: MIT OR Apache-2.0
//! Diagnoser: hypothesis generation on repeated failure (L3).

use crate::artifacts::ArtifactStore;
use crate::prompts;
use crate::trace::TraceBus;
use orc_core::event::RunEventKind;
use orc_providers::{GenerateRequest, Provider};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One diagnostic hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    /// What the diagnoser believes is wrong.
    pub hypothesis: String,
    /// Confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,
    /// Repo searches that would confirm or refute it.
    #[serde(default, alias = "repoSearchQueries")]
    pub repo_search_queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DiagnosisResponse {
    #[serde(default)]
    hypotheses: Vec<Hypothesis>,
}

/// Ask the reasoner for hypotheses about a repeated failure; persist the
/// result and return the highest-confidence hypothesis.
pub async fn diagnose(
    bus: &TraceBus,
    artifacts: &ArtifactStore,
    reviewer: &dyn Provider,
    context_text: &str,
    last_error: &str,
    iteration: u32,
) -> Option<Hypothesis> {
    let mut request = GenerateRequest::prompt(prompts::diagnosis(context_text, last_error));
    request.json_mode = true;
    let response = match reviewer.generate(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "diagnosis call failed");
            return None;
        }
    };

    let parsed: Option<DiagnosisResponse> = {
        let trimmed = response.text.trim();
        serde_json::from_str(trimmed).ok().or_else(|| {
            crate::review::strip_json_fence(trimmed)
                .and_then(|block| serde_json::from_str(&block).ok())
        })
    };
    let Some(parsed) = parsed else {
        warn!("diagnosis response was not JSON");
        return None;
    };

    let best = parsed
        .hypotheses
        .iter()
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        })?
        .clone();

    let _ = artifacts.write_json(
        &format!("diagnostics/diag_iter_{iteration}.json"),
        &serde_json::json!({
            "hypotheses": parsed.hypotheses,
            "selected": best,
        }),
    );
    bus.emit(RunEventKind::DiagnosisCompleted {
        iteration,
        hypothesis: best.hypothesis.clone(),
        confidence: best.confidence,
    });
    debug!(confidence = best.confidence, "diagnosis selected");
    Some(best)
}
