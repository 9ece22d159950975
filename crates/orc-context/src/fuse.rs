// SPDX-License-Identifier: MIT OR Apache-2.0
//! Section fusion with byte budgets.
//!
//! The fused context is the prompt body handed to providers: GOAL, REPO
//! CONTEXT, MEMORY, and RECENT SIGNALS sections concatenated in that
//! order, each truncated to its byte budget with a `...[TRUNCATED]`
//! marker when cut.

use crate::pack::PackedItem;
use serde::{Deserialize, Serialize};

/// Marker appended when a section is cut at its byte budget.
pub const TRUNCATION_MARKER: &str = "...[TRUNCATED]";

/// Everything that goes into one fusion.
#[derive(Debug, Clone, Default)]
pub struct FusionInput {
    /// The goal (or step) text.
    pub goal: String,
    /// Packed repository snippets.
    pub items: Vec<PackedItem>,
    /// Memory hits, one paragraph each.
    pub memory: Vec<String>,
    /// Recent signals (diagnosis hypotheses, last errors).
    pub signals: Vec<String>,
    /// Per-section byte budgets.
    pub budgets: SectionBudgets,
}

/// Byte budgets per fused section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionBudgets {
    /// GOAL section bytes.
    pub goal: usize,
    /// REPO CONTEXT section bytes.
    pub repo: usize,
    /// MEMORY section bytes.
    pub memory: usize,
    /// RECENT SIGNALS section bytes.
    pub signals: usize,
}

impl Default for SectionBudgets {
    fn default() -> Self {
        Self {
            goal: 4_000,
            repo: 48_000,
            memory: 8_000,
            signals: 4_000,
        }
    }
}

/// A fused context: the prompt text plus per-section metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedContext {
    /// The full prompt body.
    pub text: String,
    /// Sections present, in order, with their final byte sizes.
    pub sections: Vec<(String, usize)>,
    /// Whether any section was truncated.
    pub truncated: bool,
}

/// Fuse the input into the final prompt body. Deterministic given
/// identical inputs and budgets.
pub fn fuse_sections(input: &FusionInput) -> FusedContext {
    let mut sections = Vec::new();
    let mut truncated = false;
    let mut text = String::new();

    let mut push_section = |title: &str, body: String, budget: usize| {
        if body.is_empty() {
            return;
        }
        let (body, cut) = truncate_bytes(&body, budget);
        truncated |= cut;
        let rendered = format!("## {title}\n{body}\n\n");
        sections.push((title.to_string(), rendered.len()));
        text.push_str(&rendered);
    };

    push_section("GOAL", input.goal.clone(), input.budgets.goal);

    let mut repo = String::new();
    for item in &input.items {
        repo.push_str(&format!(
            "--- {}:{}-{} ({})\n{}\n",
            item.path, item.start_line, item.end_line, item.reason, item.content
        ));
    }
    push_section("REPO CONTEXT", repo, input.budgets.repo);
    push_section("MEMORY", input.memory.join("\n\n"), input.budgets.memory);
    push_section(
        "RECENT SIGNALS",
        input.signals.join("\n"),
        input.budgets.signals,
    );

    FusedContext {
        text,
        sections,
        truncated,
    }
}

/// Cut `body` at `budget` bytes (on a char boundary), appending the
/// truncation marker when a cut happened.
fn truncate_bytes(body: &str, budget: usize) -> (String, bool) {
    if body.len() <= budget {
        return (body.to_string(), false);
    }
    let mut cut = budget;
    while cut > 0 && !body.is_char_boundary(cut) {
        cut -= 1;
    }
    (format!("{}{}", &body[..cut], TRUNCATION_MARKER), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(path: &str, content: &str) -> PackedItem {
        PackedItem {
            path: path.into(),
            start_line: 1,
            end_line: 2,
            content: content.into(),
            score: 1.0,
            reason: "lexical".into(),
        }
    }

    #[test]
    fn sections_appear_in_canonical_order() {
        let fused = fuse_sections(&FusionInput {
            goal: "do the thing".into(),
            items: vec![item("a.rs", "fn a() {}")],
            memory: vec!["past fix".into()],
            signals: vec!["last error: boom".into()],
            budgets: SectionBudgets::default(),
        });
        let goal_at = fused.text.find("## GOAL").unwrap();
        let repo_at = fused.text.find("## REPO CONTEXT").unwrap();
        let memory_at = fused.text.find("## MEMORY").unwrap();
        let signals_at = fused.text.find("## RECENT SIGNALS").unwrap();
        assert!(goal_at < repo_at && repo_at < memory_at && memory_at < signals_at);
        assert!(!fused.truncated);
    }

    #[test]
    fn empty_sections_are_omitted() {
        let fused = fuse_sections(&FusionInput {
            goal: "g".into(),
            ..Default::default()
        });
        assert!(fused.text.contains("## GOAL"));
        assert!(!fused.text.contains("## MEMORY"));
        assert!(!fused.text.contains("## RECENT SIGNALS"));
    }

    #[test]
    fn over_budget_section_is_cut_with_marker() {
        let fused = fuse_sections(&FusionInput {
            goal: "x".repeat(100),
            budgets: SectionBudgets {
                goal: 10,
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(fused.truncated);
        assert!(fused.text.contains(TRUNCATION_MARKER));
        assert!(!fused.text.contains(&"x".repeat(11)));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let (cut, was_cut) = truncate_bytes(&"é".repeat(10), 5);
        assert!(was_cut);
        assert!(cut.starts_with("éé"));
    }

    #[test]
    fn fusion_is_deterministic() {
        let input = FusionInput {
            goal: "g".into(),
            items: vec![item("a.rs", "content")],
            memory: vec!["m".into()],
            signals: vec!["s".into()],
            budgets: SectionBudgets::default(),
        };
        assert_eq!(fuse_sections(&input), fuse_sections(&input));
    }
}
