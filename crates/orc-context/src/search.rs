// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lexical search over repository content.
//!
//! Prefers ripgrep (`rg --json`) when a binary is available; otherwise a
//! keyword scanner over the scanned file list produces equivalent matches.
//! Either path caps matches per file so one noisy file cannot dominate
//! the pack.

use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// One content match.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchMatch {
    /// Repo-relative path.
    pub path: String,
    /// 1-based line number.
    pub line: usize,
    /// Matched line text.
    pub text: String,
    /// Relevance score (keyword hit count; `f64::MAX` for carry-over).
    pub score: f64,
    /// Where the match came from (`lexical`, `semantic`, `carry-over`).
    pub reason: String,
}

/// Search `files` under `repo_root` for the query's keywords.
pub fn lexical_search(
    repo_root: &Path,
    files: &[String],
    query: &str,
    rg_path: Option<&str>,
    max_per_file: usize,
) -> Vec<SearchMatch> {
    let keywords = keywords_of(query);
    if keywords.is_empty() {
        return Vec::new();
    }
    let mut matches = match ripgrep_search(repo_root, &keywords, rg_path, max_per_file) {
        Some(found) => found,
        None => fallback_search(repo_root, files, &keywords, max_per_file),
    };
    // Deterministic order: score desc, then path, then line.
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.line.cmp(&b.line))
    });
    matches
}

/// Split a query into lowercase search keywords, dropping short noise
/// words.
pub fn keywords_of(query: &str) -> Vec<String> {
    let mut words: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.len() >= 3)
        .map(|w| w.to_lowercase())
        .collect();
    words.sort();
    words.dedup();
    words
}

fn ripgrep_search(
    repo_root: &Path,
    keywords: &[String],
    rg_path: Option<&str>,
    max_per_file: usize,
) -> Option<Vec<SearchMatch>> {
    let program = rg_path.unwrap_or("rg");
    let pattern = keywords.join("|");
    let output = Command::new(program)
        .args([
            "--json",
            "--ignore-case",
            "--max-count",
            &max_per_file.to_string(),
            &pattern,
            ".",
        ])
        .current_dir(repo_root)
        .output()
        .ok()?;
    // Exit code 1 means "no matches", which is a valid result.
    if !output.status.success() && output.status.code() != Some(1) {
        debug!(program, code = ?output.status.code(), "ripgrep unavailable or failed");
        return None;
    }
    let mut matches = Vec::new();
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        let Ok(v) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if v["type"] != "match" {
            continue;
        }
        let data = &v["data"];
        let path = data["path"]["text"].as_str().unwrap_or_default();
        let path = path.strip_prefix("./").unwrap_or(path).to_string();
        let line_number = data["line_number"].as_u64().unwrap_or(0) as usize;
        let text = data["lines"]["text"]
            .as_str()
            .unwrap_or_default()
            .trim_end()
            .to_string();
        if path.is_empty() || line_number == 0 {
            continue;
        }
        let score = score_line(&text, keywords);
        matches.push(SearchMatch {
            path,
            line: line_number,
            text,
            score,
            reason: "lexical".into(),
        });
    }
    Some(matches)
}

fn fallback_search(
    repo_root: &Path,
    files: &[String],
    keywords: &[String],
    max_per_file: usize,
) -> Vec<SearchMatch> {
    let mut matches = Vec::new();
    let mut per_file: HashMap<&str, usize> = HashMap::new();
    for rel in files {
        let Ok(content) = std::fs::read_to_string(repo_root.join(rel)) else {
            continue;
        };
        for (index, line) in content.lines().enumerate() {
            let score = score_line(line, keywords);
            if score <= 0.0 {
                continue;
            }
            let count = per_file.entry(rel.as_str()).or_insert(0);
            if *count >= max_per_file {
                break;
            }
            *count += 1;
            matches.push(SearchMatch {
                path: rel.clone(),
                line: index + 1,
                text: line.trim_end().to_string(),
                score,
                reason: "lexical".into(),
            });
        }
    }
    matches
}

fn score_line(line: &str, keywords: &[String]) -> f64 {
    let lower = line.to_lowercase();
    keywords.iter().filter(|k| lower.contains(k.as_str())).count() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> (tempfile::TempDir, Vec<String>) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("auth.rs"),
            "fn login() {}\nfn logout() {}\nfn login_page() {}\n",
        )
        .unwrap();
        fs::write(dir.path().join("other.rs"), "fn unrelated() {}\n").unwrap();
        (dir, vec!["auth.rs".into(), "other.rs".into()])
    }

    #[test]
    fn keywords_drop_noise_and_dedupe() {
        let kw = keywords_of("Fix the login, the login BUG!");
        assert_eq!(kw, vec!["bug", "fix", "login", "the"]);
    }

    #[test]
    fn fallback_finds_keyword_lines() {
        let (dir, files) = fixture();
        let matches = fallback_search(dir.path(), &files, &["login".into()], 10);
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| m.path == "auth.rs"));
    }

    #[test]
    fn per_file_cap_is_enforced() {
        let (dir, files) = fixture();
        let matches = fallback_search(dir.path(), &files, &["login".into()], 1);
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn search_orders_by_score_then_path() {
        let (dir, files) = fixture();
        // Use an unfindable rg binary to force the fallback deterministically.
        let matches = lexical_search(
            dir.path(),
            &files,
            "login page",
            Some("/nonexistent/rg"),
            10,
        );
        assert!(!matches.is_empty());
        // "login_page" line matches both keywords and must rank first.
        assert!(matches[0].text.contains("login_page"));
    }

    #[test]
    fn empty_query_returns_nothing() {
        let (dir, files) = fixture();
        assert!(lexical_search(dir.path(), &files, "a b", None, 5).is_empty());
    }
}
