// SPDX-License-Identifier: MIT OR Apache-2.0
//! Match expansion into windowed snippets.

use crate::search::SearchMatch;
use std::collections::BTreeMap;
use std::path::Path;

/// Lines of context kept on each side of a match.
const WINDOW: usize = 6;

/// A contiguous, windowed slice of one file.
#[derive(Debug, Clone, PartialEq)]
pub struct Snippet {
    /// Repo-relative path.
    pub path: String,
    /// 1-based first line.
    pub start_line: usize,
    /// 1-based last line (inclusive).
    pub end_line: usize,
    /// Snippet text.
    pub content: String,
    /// Best score among the matches merged into this snippet.
    pub score: f64,
    /// Reason of the best-scoring merged match.
    pub reason: String,
}

/// Expand matches into windowed snippets, merging overlapping windows
/// per file.
pub fn expand_matches(repo_root: &Path, matches: &[SearchMatch]) -> Vec<Snippet> {
    // Group by file, keeping the incoming (score-sorted) order available
    // through the per-window score maximum.
    let mut by_file: BTreeMap<&str, Vec<&SearchMatch>> = BTreeMap::new();
    for m in matches {
        by_file.entry(m.path.as_str()).or_default().push(m);
    }

    let mut snippets = Vec::new();
    for (path, file_matches) in by_file {
        let Ok(content) = std::fs::read_to_string(repo_root.join(path)) else {
            continue;
        };
        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            continue;
        }

        // Windows as (start, end) line indexes, merged when overlapping.
        let mut windows: Vec<(usize, usize, f64, String)> = Vec::new();
        for m in file_matches {
            let anchor = m.line.clamp(1, lines.len());
            let start = anchor.saturating_sub(WINDOW + 1).max(0);
            let end = (anchor + WINDOW).min(lines.len());
            match windows
                .iter_mut()
                .find(|(ws, we, _, _)| start <= *we && *ws <= end)
            {
                Some(window) => {
                    window.0 = window.0.min(start);
                    window.1 = window.1.max(end);
                    if m.score > window.2 {
                        window.2 = m.score;
                        window.3 = m.reason.clone();
                    }
                }
                None => windows.push((start, end, m.score, m.reason.clone())),
            }
        }

        for (start, end, score, reason) in windows {
            snippets.push(Snippet {
                path: path.to_string(),
                start_line: start + 1,
                end_line: end,
                content: lines[start..end].join("\n"),
                score,
                reason,
            });
        }
    }

    // Highest score first; ties broken by path then line for determinism.
    snippets.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.start_line.cmp(&b.start_line))
    });
    snippets
}
