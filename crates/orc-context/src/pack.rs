// SPDX-License-Identifier: MIT OR Apache-2.0
//! Greedy packing under a token budget.

use crate::snippet::Snippet;
use serde::{Deserialize, Serialize};

/// Rough token estimate without a tokenizer (4 bytes per token).
fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// One snippet that made it into the pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackedItem {
    /// Repo-relative path.
    pub path: String,
    /// 1-based first line.
    pub start_line: usize,
    /// 1-based last line (inclusive).
    pub end_line: usize,
    /// Snippet text.
    pub content: String,
    /// Score that earned the slot.
    pub score: f64,
    /// Why the snippet is in the pack.
    pub reason: String,
}

/// Greedily select snippets (already score-sorted) until the token budget
/// is spent. Deterministic: same snippets and budget, same pack.
pub fn pack_snippets(snippets: Vec<Snippet>, token_budget: usize) -> Vec<PackedItem> {
    let mut items = Vec::new();
    let mut spent = 0usize;
    for snippet in snippets {
        let cost = estimate_tokens(&snippet.content);
        if spent + cost > token_budget {
            continue;
        }
        spent += cost;
        items.push(PackedItem {
            path: snippet.path,
            start_line: snippet.start_line,
            end_line: snippet.end_line,
            content: snippet.content,
            score: snippet.score,
            reason: snippet.reason,
        });
    }
    items
}
