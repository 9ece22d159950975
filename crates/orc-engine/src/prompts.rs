// SPDX-License-Identifier: MIT OR Apache-2.0
//! Prompt builders for every provider role.
//!
//! Executors are asked to wrap diffs in `BEGIN_DIFF`/`END_DIFF`; the
//! extractor tolerates drift (see orc-patch). Reviewer-family prompts
//! demand a single JSON object and the callers parse leniently.

/// Instructions appended to every diff-producing prompt.
const DIFF_RULES: &str = "Respond with a unified diff (git format) between BEGIN_DIFF and END_DIFF \
markers and nothing else. Paths are relative to the repository root. \
Do not invent files you have not seen.";

/// Planner: goal + context → `{\"steps\": [...]}`.
pub fn planner(goal: &str, context: &str) -> String {
    format!(
        "You are planning a code change.\n\n{context}\n\
        Break the goal into a short ordered list of imperative steps.\n\
        Goal: {goal}\n\n\
        Respond with a JSON object: {{\"steps\": [\"...\", \"...\"]}}. \
        Keep steps concrete and independently executable."
    )
}

/// Executor: one step → one diff.
pub fn executor(step: &str, context: &str, error_hint: Option<&str>) -> String {
    let hint = match error_hint {
        Some(error) => format!("\n\nPREVIOUS ATTEMPT ISSUE:\n{error}\nAddress it this time."),
        None => String::new(),
    };
    format!("{context}\nTask: {step}\n\n{DIFF_RULES}{hint}")
}

/// Repair executor: failing verification → corrective diff.
pub fn repair(goal: &str, context: &str, failure_tail: &str) -> String {
    format!(
        "{context}\nThe change for \"{goal}\" fails verification.\n\
        Failing output (tail):\n{failure_tail}\n\n\
        Produce a corrective diff for the current working tree.\n\n{DIFF_RULES}"
    )
}

/// Reviewer verdict over one patch.
pub fn review(step: &str, patch: &str) -> String {
    format!(
        "Review this patch for the step: {step}\n\n\
        PATCH:\n{patch}\n\n\
        Respond with one JSON object:\n\
        {{\"verdict\": \"approve\"|\"revise\", \"summary\": \"...\", \"issues\": [], \
        \"requiredChanges\": [], \"suggestions\": [], \"riskFlags\": [], \
        \"suggestedTests\": [], \"confidence\": 0.0}}"
    )
}

/// Executor revision after a `revise` verdict.
pub fn revise(step: &str, patch: &str, required_changes: &[String], issues: &[String]) -> String {
    let mut body = format!(
        "Your patch for the step \"{step}\" was reviewed and needs revision.\n\nCURRENT PATCH:\n{patch}\n"
    );
    if !issues.is_empty() {
        body.push_str(&format!("\nISSUES:\n- {}\n", issues.join("\n- ")));
    }
    if !required_changes.is_empty() {
        body.push_str(&format!(
            "\nREQUIRED CHANGES:\n- {}\n",
            required_changes.join("\n- ")
        ));
    }
    body.push_str(&format!(
        "\nProduce a revised diff against the ORIGINAL working tree (not against your patch).\n\n{DIFF_RULES}"
    ));
    body
}

/// Reviewer ranking over an L3 candidate batch.
pub fn ranking(step: &str, candidates: &[(usize, &str)]) -> String {
    let mut body = format!("Rank these candidate patches for the step: {step}\n");
    for (index, patch) in candidates {
        body.push_str(&format!("\nCANDIDATE {index}:\n{patch}\n"));
    }
    body.push_str(
        "\nRespond with one JSON object:\n\
        {\"rankings\": [{\"candidateId\": 0, \"score\": 0.0, \"reasons\": [], \"riskFlags\": []}], \
        \"requiredFixes\": [], \"suggestedTests\": [], \"confidence\": 0.0}\n\
        Scores are 0-10.",
    );
    body
}

/// Judge tie-break between candidates.
pub fn judge(step: &str, candidates: &[(usize, &str)], reason: &str) -> String {
    let mut body = format!(
        "Evaluation could not separate these candidates ({reason}) for the step: {step}\n"
    );
    for (index, patch) in candidates {
        body.push_str(&format!("\nCANDIDATE {index}:\n{patch}\n"));
    }
    body.push_str(
        "\nPick the single best candidate. Respond with one JSON object:\n\
        {\"winnerCandidateId\": 0, \"confidence\": 0.0, \"rationale\": \"...\"}",
    );
    body
}

/// Diagnoser: repeated failure → hypotheses.
pub fn diagnosis(context: &str, last_error: &str) -> String {
    format!(
        "{context}\nThe same verification failure keeps repeating:\n{last_error}\n\n\
        Respond with one JSON object:\n\
        {{\"hypotheses\": [{{\"hypothesis\": \"...\", \"confidence\": 0.0, \
        \"repoSearchQueries\": [\"...\"]}}]}}\n\
        Confidence is 0-1. Order does not matter; confidence decides."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executor_prompt_carries_markers_and_hint() {
        let without = executor("do it", "CTX", None);
        assert!(without.contains("BEGIN_DIFF"));
        assert!(!without.contains("PREVIOUS ATTEMPT ISSUE"));

        let with = executor("do it", "CTX", Some("no diff found"));
        assert!(with.contains("PREVIOUS ATTEMPT ISSUE"));
        assert!(with.contains("no diff found"));
    }

    #[test]
    fn planner_prompt_demands_json_steps() {
        let p = planner("fix bug", "CTX");
        assert!(p.contains("\"steps\""));
        assert!(p.contains("fix bug"));
    }

    #[test]
    fn ranking_prompt_lists_candidates() {
        let p = ranking("step", &[(0, "diff a"), (2, "diff c")]);
        assert!(p.contains("CANDIDATE 0"));
        assert!(p.contains("CANDIDATE 2"));
        assert!(p.contains("candidateId"));
    }
}
