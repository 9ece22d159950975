// SPDX-License-Identifier: MIT OR Apache-2.0
//! Diff recovery from model prose.
//!
//! Models are prompted to wrap diffs in `BEGIN_DIFF`/`END_DIFF` markers, but
//! real output drifts. Strategies are tried in order; the first hit wins:
//!
//! 1. marker block (`BEGIN_DIFF`/`<BEGIN_DIFF>` .. `END_DIFF`/`<END_DIFF>`/`</END_DIFF>`)
//! 2. fenced ```` ```diff ```` block
//! 3. first `diff --git` / `--- a/` / `--- /dev/null` line to end
//! 4. first `@@ ` hunk line to end

use orc_core::candidate::PatchStats;

const BEGIN_MARKERS: &[&str] = &["BEGIN_DIFF", "<BEGIN_DIFF>"];
const END_MARKERS: &[&str] = &["END_DIFF", "<END_DIFF>", "</END_DIFF>"];

/// Extract a unified diff from a model output string.
///
/// Returns `None` when no strategy matches or the candidate region is empty.
/// Empty leading/trailing lines are trimmed; whitespace-only lines are
/// preserved (they are valid diff context). The result always ends with a
/// newline, and extraction is idempotent: feeding the result back returns
/// the same string.
pub fn extract_diff(output: &str) -> Option<String> {
    let lines: Vec<&str> = output.lines().collect();

    let region = marker_block(&lines)
        .or_else(|| fenced_block(&lines))
        .or_else(|| header_remainder(&lines))
        .or_else(|| hunk_remainder(&lines))?;

    let trimmed = trim_empty_edges(region);
    if trimmed.is_empty() {
        return None;
    }
    let mut text = trimmed.join("\n");
    text.push('\n');
    Some(text)
}

fn marker_block<'a>(lines: &[&'a str]) -> Option<Vec<&'a str>> {
    let start = lines
        .iter()
        .position(|l| BEGIN_MARKERS.contains(&l.trim()))?;
    let end = lines[start + 1..]
        .iter()
        .position(|l| END_MARKERS.contains(&l.trim()))
        .map(|i| start + 1 + i)
        .unwrap_or(lines.len());
    Some(lines[start + 1..end].to_vec())
}

fn fenced_block<'a>(lines: &[&'a str]) -> Option<Vec<&'a str>> {
    let start = lines.iter().position(|l| l.trim() == "```diff")?;
    let end = lines[start + 1..]
        .iter()
        .position(|l| l.trim() == "```")
        .map(|i| start + 1 + i)
        .unwrap_or(lines.len());
    Some(lines[start + 1..end].to_vec())
}

fn header_remainder<'a>(lines: &[&'a str]) -> Option<Vec<&'a str>> {
    let start = lines.iter().position(|l| {
        l.starts_with("diff --git") || l.starts_with("--- a/") || l.starts_with("--- /dev/null")
    })?;
    Some(lines[start..].to_vec())
}

fn hunk_remainder<'a>(lines: &[&'a str]) -> Option<Vec<&'a str>> {
    let start = lines.iter().position(|l| l.starts_with("@@ "))?;
    Some(lines[start..].to_vec())
}

fn trim_empty_edges<'a>(mut lines: Vec<&'a str>) -> Vec<&'a str> {
    while lines.first().is_some_and(|l| l.is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

/// Count files changed and lines added/deleted in a unified diff.
pub fn patch_stats(diff: &str) -> PatchStats {
    let mut stats = PatchStats::default();
    for line in diff.lines() {
        if line.starts_with("+++ ") {
            stats.files_changed += 1;
        } else if line.starts_with('+') && !line.starts_with("+++") {
            stats.lines_added += 1;
        } else if line.starts_with('-') && !line.starts_with("---") {
            stats.lines_deleted += 1;
        }
    }
    // Hunk-fragment diffs carry no file headers; count them as one file.
    if stats.files_changed == 0 && diff.lines().any(|l| l.starts_with("@@ ")) {
        stats.files_changed = 1;
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF_BODY: &str = "--- a/src/a.ts\n+++ b/src/a.ts\n@@ -1 +1 @@\n-export const value = 1;\n+export const value = 2;";

    #[test]
    fn marker_block_wins() {
        let output = format!("Sure, here you go:\nBEGIN_DIFF\n{DIFF_BODY}\nEND_DIFF\nHope that helps!");
        let diff = extract_diff(&output).unwrap();
        assert!(diff.starts_with("--- a/src/a.ts"));
        assert!(diff.ends_with("value = 2;\n"));
        assert!(!diff.contains("Hope"));
    }

    #[test]
    fn angled_markers_are_accepted() {
        let output = format!("<BEGIN_DIFF>\n{DIFF_BODY}\n</END_DIFF>");
        assert!(extract_diff(&output).is_some());
    }

    #[test]
    fn fenced_diff_block() {
        let output = format!("```diff\n{DIFF_BODY}\n```\ntrailing prose");
        let diff = extract_diff(&output).unwrap();
        assert!(!diff.contains("trailing prose"));
        assert!(!diff.contains("```"));
    }

    #[test]
    fn bare_header_takes_remainder() {
        let output = format!("I changed the constant.\n\n{DIFF_BODY}");
        let diff = extract_diff(&output).unwrap();
        assert!(diff.starts_with("--- a/src/a.ts"));
    }

    #[test]
    fn hunk_fragment_takes_remainder() {
        let output = "@@ -1 +1 @@\n-old\n+new";
        let diff = extract_diff(output).unwrap();
        assert!(diff.starts_with("@@ -1 +1 @@"));
    }

    #[test]
    fn prose_without_diff_is_none() {
        assert_eq!(extract_diff("I could not produce a patch, sorry."), None);
    }

    #[test]
    fn empty_marker_block_is_none() {
        assert_eq!(extract_diff("BEGIN_DIFF\n\nEND_DIFF"), None);
    }

    #[test]
    fn whitespace_only_context_lines_survive() {
        let output = "BEGIN_DIFF\n@@ -1,3 +1,3 @@\n line1\n \n-line3\n+line3!\nEND_DIFF";
        let diff = extract_diff(output).unwrap();
        assert!(diff.contains("\n \n"), "whitespace-only context kept: {diff:?}");
    }

    #[test]
    fn extraction_is_idempotent() {
        let output = format!("prose\nBEGIN_DIFF\n{DIFF_BODY}\nEND_DIFF");
        let once = extract_diff(&output).unwrap();
        let twice = extract_diff(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn result_always_ends_with_newline() {
        let diff = extract_diff(DIFF_BODY).unwrap();
        assert!(diff.ends_with('\n'));
        assert!(!diff.ends_with("\n\n"));
    }

    #[test]
    fn stats_count_files_and_lines() {
        let diff = "--- a/x\n+++ b/x\n@@ -1,2 +1,3 @@\n ctx\n-gone\n+here\n+also\n--- a/y\n+++ b/y\n@@ -1 +1 @@\n-a\n+b\n";
        let stats = patch_stats(diff);
        assert_eq!(stats.files_changed, 2);
        assert_eq!(stats.lines_added, 3);
        assert_eq!(stats.lines_deleted, 2);
        assert_eq!(stats.lines_touched(), 5);
    }

    #[test]
    fn stats_hunk_fragment_counts_one_file() {
        let stats = patch_stats("@@ -1 +1 @@\n-a\n+b\n");
        assert_eq!(stats.files_changed, 1);
    }
}
