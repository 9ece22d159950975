// SPDX-License-Identifier: MIT OR Apache-2.0
//! Plan service: goal → ordered step list.
//!
//! The planner is asked for `{"steps": [...]}` but real output drifts:
//! fenced JSON, bare arrays, and bulleted or numbered text all parse.
//! An empty *response* is a provider error; an empty *plan* is valid here
//! and the run engine decides what to do with it.

use crate::EngineError;
use crate::artifacts::ArtifactStore;
use crate::trace::TraceBus;
use orc_core::event::RunEventKind;
use orc_core::plan::Plan;
use orc_providers::{GenerateRequest, Provider};
use tracing::debug;

/// Ask the planner for a plan, parse it, persist `plan.json`, emit events.
pub async fn request_plan(
    bus: &TraceBus,
    artifacts: &ArtifactStore,
    provider: &dyn Provider,
    goal: &str,
    context: &str,
) -> Result<Plan, EngineError> {
    bus.emit(RunEventKind::PlanRequested {
        goal: goal.to_string(),
    });

    let mut request = GenerateRequest::prompt(crate::prompts::planner(goal, context));
    request.json_mode = true;
    let response = provider.generate(request).await?;
    if response.text.trim().is_empty() {
        return Err(orc_providers::ProviderError::Empty {
            provider: provider.id().to_string(),
        }
        .into());
    }

    let steps = normalize_steps(parse_plan_response(&response.text));
    let plan = Plan::from_steps(steps);
    artifacts
        .write_json("plan.json", &plan)
        .map_err(EngineError::Other)?;
    debug!(steps = plan.len(), "plan created");
    bus.emit(RunEventKind::PlanCreated {
        step_count: plan.len(),
        plan_path: "plan.json".into(),
    });
    Ok(plan)
}

/// Parse a planner response into raw step strings.
///
/// Accepted shapes, in order: a JSON object with `steps`, a bare JSON
/// array, the same inside a fenced block, then bulleted/numbered text.
pub fn parse_plan_response(text: &str) -> Vec<String> {
    if let Some(steps) = parse_json_steps(text.trim()) {
        return steps;
    }
    if let Some(block) = fenced_block(text) {
        if let Some(steps) = parse_json_steps(block.trim()) {
            return steps;
        }
    }
    parse_list_text(text)
}

fn parse_json_steps(text: &str) -> Option<Vec<String>> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let array = match &value {
        serde_json::Value::Object(map) => map.get("steps")?.as_array()?.clone(),
        serde_json::Value::Array(items) => items.clone(),
        _ => return None,
    };
    Some(
        array
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
    )
}

fn fenced_block(text: &str) -> Option<String> {
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

/// One parsed list entry: hierarchical id (when numbered) and text.
struct ListEntry {
    id: Option<String>,
    text: String,
}

fn parse_list_text(text: &str) -> Vec<String> {
    let mut entries: Vec<ListEntry> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = strip_bullet(trimmed) {
            entries.push(ListEntry {
                id: None,
                text: rest.to_string(),
            });
        } else if let Some((id, rest)) = strip_numbering(trimmed) {
            entries.push(ListEntry {
                id: Some(id),
                text: rest.to_string(),
            });
        }
        // Plain prose lines are planner chatter, not steps.
    }

    // When hierarchical substeps exist, the parent line is a header, not
    // an executable step.
    let has_child = |parent: &str| {
        entries
            .iter()
            .any(|e| e.id.as_deref().is_some_and(|id| id.starts_with(parent) && id != parent))
    };
    entries
        .iter()
        .filter(|e| match &e.id {
            Some(id) => !(!id.contains('.') && has_child(&format!("{id}."))),
            None => true,
        })
        .map(|e| e.text.clone())
        .collect()
}

fn strip_bullet(line: &str) -> Option<&str> {
    for prefix in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return Some(rest.trim());
        }
    }
    None
}

/// Strip `1.`, `2)`, `2.3`, `2.3.` style numbering, returning the id and
/// the remaining text.
fn strip_numbering(line: &str) -> Option<(String, String)> {
    let id_end = line
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(line.len());
    if id_end == 0 {
        return None;
    }
    let id = line[..id_end].trim_end_matches('.').to_string();
    if id.is_empty() || !id.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut rest = &line[id_end..];
    rest = rest.strip_prefix(')').unwrap_or(rest);
    rest = rest.strip_prefix(':').unwrap_or(rest);
    let rest = rest.trim();
    if rest.is_empty() {
        return None;
    }
    Some((id, rest.to_string()))
}

/// Normalize parsed steps: trim, drop empties, de-duplicate
/// (case-insensitive, first occurrence wins).
pub fn normalize_steps(steps: Vec<String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut out = Vec::new();
    for step in steps {
        let trimmed = step.trim().to_string();
        if trimmed.is_empty() {
            continue;
        }
        let key = trimmed.to_lowercase();
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        out.push(trimmed);
    }
    out
}
