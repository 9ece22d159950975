// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transactional unified-diff application.
//!
//! The applier stages every file's new contents in memory first and only
//! touches the working tree once all hunks of all files have resolved. A
//! mid-write io failure restores the already-written files from in-memory
//! backups, so the tree is never left half-patched.

use crate::{ConflictKind, PatchError};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Ceilings and switches for one apply call.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Maximum number of files the patch may touch.
    pub max_files_changed: Option<usize>,
    /// Maximum added + deleted lines across the patch.
    pub max_lines_touched: Option<usize>,
    /// Whether binary file sections are tolerated (they are skipped).
    pub allow_binary: bool,
    /// Validate and stage without mutating the tree.
    pub dry_run: bool,
}

/// Successful apply result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Repo-relative paths that were (or, in dry-run, would be) changed.
    pub files_changed: Vec<String>,
}

/// Apply a unified diff rooted at `repo_root`.
///
/// All-or-nothing: on any error the working tree is unchanged or restored.
/// With `dry_run` the diff is fully parsed and placed but nothing is
/// written.
pub fn apply_unified_diff(
    repo_root: &Path,
    text: &str,
    opts: &ApplyOptions,
) -> Result<Applied, PatchError> {
    let patches = parse_patch(text)?;
    if patches.is_empty() {
        return Err(PatchError::Malformed {
            detail: "no file sections found".into(),
        });
    }

    // Size ceilings are checked on the parsed patch, before any mutation.
    let mut lines_touched = 0usize;
    let mut effective: Vec<&FilePatch> = Vec::new();
    for patch in &patches {
        if patch.binary {
            let file = patch.display_path();
            if opts.allow_binary {
                warn!(file = %file, "skipping binary file section");
                continue;
            }
            return Err(PatchError::Binary { file });
        }
        lines_touched += patch.lines_touched();
        effective.push(patch);
    }
    if let Some(max) = opts.max_files_changed {
        if effective.len() > max {
            return Err(PatchError::Limit {
                detail: format!("{} files changed, max {max}", effective.len()),
            });
        }
    }
    if let Some(max) = opts.max_lines_touched {
        if lines_touched > max {
            return Err(PatchError::Limit {
                detail: format!("{lines_touched} lines touched, max {max}"),
            });
        }
    }

    // Stage every file's new content in memory.
    let mut staged: HashMap<String, Option<String>> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for patch in &effective {
        let (rel, action) = stage_file(repo_root, patch, &staged)?;
        if !order.contains(&rel) {
            order.push(rel.clone());
        }
        staged.insert(rel, action);
    }

    if opts.dry_run {
        debug!(files = order.len(), "dry-run apply validated");
        return Ok(Applied {
            files_changed: order,
        });
    }

    commit_staged(repo_root, &order, &staged)?;
    Ok(Applied {
        files_changed: order,
    })
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum HunkLine {
    Context(String),
    Add(String),
    Del(String),
}

#[derive(Debug)]
struct Hunk {
    old_start: usize,
    lines: Vec<HunkLine>,
}

impl Hunk {
    /// The block of original-file lines this hunk expects (context + deletions).
    fn old_block(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Del(s) => Some(s.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }
}

#[derive(Debug)]
struct FilePatch {
    /// `None` means `/dev/null` (file creation).
    old_path: Option<String>,
    /// `None` means `/dev/null` (file deletion).
    new_path: Option<String>,
    hunks: Vec<Hunk>,
    binary: bool,
    /// `\ No newline at end of file` seen after a new-side line.
    no_trailing_newline: bool,
}

impl FilePatch {
    fn display_path(&self) -> String {
        self.new_path
            .clone()
            .or_else(|| self.old_path.clone())
            .unwrap_or_else(|| "<unknown>".into())
    }

    fn lines_touched(&self) -> usize {
        self.hunks
            .iter()
            .flat_map(|h| h.lines.iter())
            .filter(|l| matches!(l, HunkLine::Add(_) | HunkLine::Del(_)))
            .count()
    }
}

fn parse_target(raw: &str) -> Option<String> {
    // `--- a/path`, `+++ b/path`, `--- /dev/null`; tabs may follow the path.
    let path = raw.split('\t').next().unwrap_or(raw).trim();
    if path == "/dev/null" {
        return None;
    }
    let stripped = path
        .strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path);
    Some(stripped.to_string())
}

fn parse_hunk_header(line: &str) -> Option<(usize, usize, usize, usize)> {
    // `@@ -old_start[,old_count] +new_start[,new_count] @@ ...`
    let rest = line.strip_prefix("@@ ")?;
    let end = rest.find(" @@")?;
    let ranges = &rest[..end];
    let mut parts = ranges.split_whitespace();
    let old = parts.next()?.strip_prefix('-')?;
    let new = parts.next()?.strip_prefix('+')?;
    let parse_range = |s: &str| -> Option<(usize, usize)> {
        match s.split_once(',') {
            Some((a, b)) => Some((a.parse().ok()?, b.parse().ok()?)),
            None => Some((s.parse().ok()?, 1)),
        }
    };
    let (os, oc) = parse_range(old)?;
    let (ns, nc) = parse_range(new)?;
    Some((os, oc, ns, nc))
}

fn parse_patch(text: &str) -> Result<Vec<FilePatch>, PatchError> {
    let mut patches: Vec<FilePatch> = Vec::new();
    let mut current: Option<FilePatch> = None;
    // Paths from the last `diff --git` header, used for binary sections
    // that carry no `---`/`+++` lines.
    let mut git_paths: Option<(Option<String>, Option<String>)> = None;

    let mut lines = text.lines().peekable();
    while let Some(line) = lines.next() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some(p) = current.take() {
                patches.push(p);
            }
            let mut parts = rest.split_whitespace();
            let a = parts.next().and_then(parse_target);
            let b = parts.next().and_then(parse_target);
            git_paths = Some((a, b));
            continue;
        }
        if line.starts_with("Binary files ") || line.starts_with("GIT binary patch") {
            let (old_path, new_path) = git_paths.clone().unwrap_or((None, None));
            patches.push(FilePatch {
                old_path,
                new_path,
                hunks: Vec::new(),
                binary: true,
                no_trailing_newline: false,
            });
            current = None;
            continue;
        }
        if let Some(rest) = line.strip_prefix("--- ") {
            if let Some(p) = current.take() {
                patches.push(p);
            }
            let old_path = parse_target(rest);
            let new_path = match lines.peek() {
                Some(next) if next.starts_with("+++ ") => {
                    let next = lines.next().expect("peeked");
                    parse_target(&next["+++ ".len()..])
                }
                _ => {
                    return Err(PatchError::Malformed {
                        detail: format!("'--- ' not followed by '+++ ' near {line:?}"),
                    });
                }
            };
            current = Some(FilePatch {
                old_path,
                new_path,
                hunks: Vec::new(),
                binary: false,
                no_trailing_newline: false,
            });
            continue;
        }
        if line.starts_with("@@ ") {
            let (old_start, old_count, _new_start, new_count) =
                parse_hunk_header(line).ok_or_else(|| PatchError::Malformed {
                    detail: format!("bad hunk header {line:?}"),
                })?;
            // A bare hunk fragment has no file headers; that is only
            // applicable when the engine knows the target out of band, so
            // reject it here.
            let file = current.as_mut().ok_or_else(|| PatchError::Malformed {
                detail: "hunk before any file header".into(),
            })?;
            let hunk = read_hunk_body(&mut lines, old_start, old_count, new_count, file)?;
            file.hunks.push(hunk);
            continue;
        }
        // Headers we tolerate between sections: index/mode/rename/similarity
        // lines and any surrounding prose.
    }
    if let Some(p) = current.take() {
        patches.push(p);
    }
    Ok(patches)
}

fn read_hunk_body<'a, I>(
    lines: &mut std::iter::Peekable<I>,
    old_start: usize,
    old_count: usize,
    new_count: usize,
    file: &mut FilePatch,
) -> Result<Hunk, PatchError>
where
    I: Iterator<Item = &'a str>,
{
    let mut hunk = Hunk {
        old_start,
        lines: Vec::new(),
    };
    let mut old_seen = 0usize;
    let mut new_seen = 0usize;
    while old_seen < old_count || new_seen < new_count {
        let Some(&line) = lines.peek() else { break };
        if line.starts_with("\\ No newline") {
            lines.next();
            file.no_trailing_newline = true;
            continue;
        }
        let parsed = if let Some(rest) = line.strip_prefix('+') {
            new_seen += 1;
            HunkLine::Add(rest.to_string())
        } else if let Some(rest) = line.strip_prefix('-') {
            old_seen += 1;
            HunkLine::Del(rest.to_string())
        } else if let Some(rest) = line.strip_prefix(' ') {
            old_seen += 1;
            new_seen += 1;
            HunkLine::Context(rest.to_string())
        } else if line.is_empty() {
            // Some generators drop the leading space on empty context lines.
            old_seen += 1;
            new_seen += 1;
            HunkLine::Context(String::new())
        } else {
            return Err(PatchError::Malformed {
                detail: format!("unexpected line inside hunk: {line:?}"),
            });
        };
        lines.next();
        hunk.lines.push(parsed);
    }
    // Trailing `\ No newline` for the last hunk line.
    if lines
        .peek()
        .is_some_and(|l| l.starts_with("\\ No newline"))
    {
        lines.next();
        file.no_trailing_newline = true;
    }
    if old_seen < old_count || new_seen < new_count {
        return Err(PatchError::Malformed {
            detail: format!(
                "truncated hunk at -{old_start}: saw {old_seen}/{old_count} old, {new_seen}/{new_count} new"
            ),
        });
    }
    Ok(hunk)
}

// ---------------------------------------------------------------------------
// Staging
// ---------------------------------------------------------------------------

fn safe_join(repo_root: &Path, rel: &str) -> Result<PathBuf, PatchError> {
    let p = Path::new(rel);
    if p.is_absolute()
        || p.components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(PatchError::Malformed {
            detail: format!("path escapes repository root: {rel}"),
        });
    }
    Ok(repo_root.join(p))
}

fn read_current(
    repo_root: &Path,
    rel: &str,
    staged: &HashMap<String, Option<String>>,
) -> Result<Option<String>, PatchError> {
    if let Some(entry) = staged.get(rel) {
        return Ok(entry.clone());
    }
    let abs = safe_join(repo_root, rel)?;
    match std::fs::read_to_string(&abs) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(PatchError::Io {
            path: rel.to_string(),
            source,
        }),
    }
}

/// Resolve one file section into `(relative path, new content or delete)`.
fn stage_file(
    repo_root: &Path,
    patch: &FilePatch,
    staged: &HashMap<String, Option<String>>,
) -> Result<(String, Option<String>), PatchError> {
    match (&patch.old_path, &patch.new_path) {
        // Creation.
        (None, Some(new_rel)) => {
            if read_current(repo_root, new_rel, staged)?.is_some() {
                return Err(PatchError::Conflict {
                    file: new_rel.clone(),
                    line: 1,
                    kind: ConflictKind::TargetExists,
                });
            }
            let mut content = String::new();
            for hunk in &patch.hunks {
                for line in &hunk.lines {
                    match line {
                        HunkLine::Add(s) | HunkLine::Context(s) => {
                            content.push_str(s);
                            content.push('\n');
                        }
                        HunkLine::Del(_) => {
                            return Err(PatchError::Malformed {
                                detail: format!("deletion line in new-file patch {new_rel}"),
                            });
                        }
                    }
                }
            }
            if patch.no_trailing_newline && content.ends_with('\n') {
                content.pop();
            }
            Ok((new_rel.clone(), Some(content)))
        }
        // Deletion.
        (Some(old_rel), None) => {
            if read_current(repo_root, old_rel, staged)?.is_none() {
                return Err(PatchError::Conflict {
                    file: old_rel.clone(),
                    line: 1,
                    kind: ConflictKind::MissingFile,
                });
            }
            Ok((old_rel.clone(), None))
        }
        // Modification (possibly with rename).
        (Some(old_rel), Some(new_rel)) => {
            let Some(original) = read_current(repo_root, old_rel, staged)? else {
                return Err(PatchError::Conflict {
                    file: old_rel.clone(),
                    line: patch.hunks.first().map_or(1, |h| h.old_start),
                    kind: ConflictKind::MissingFile,
                });
            };
            let content = apply_hunks(old_rel, &original, &patch.hunks, patch.no_trailing_newline)?;
            Ok((new_rel.clone(), Some(content)))
        }
        (None, None) => Err(PatchError::Malformed {
            detail: "file section with both sides /dev/null".into(),
        }),
    }
}

/// How far from the declared position a hunk may drift and still match.
const MATCH_WINDOW: usize = 250;

fn apply_hunks(
    rel: &str,
    original: &str,
    hunks: &[Hunk],
    no_trailing_newline: bool,
) -> Result<String, PatchError> {
    let old_lines: Vec<&str> = original.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(old_lines.len());
    let mut cursor = 0usize;

    for hunk in hunks {
        let block = hunk.old_block();
        let expected = hunk.old_start.saturating_sub(1);
        let at = find_block(&old_lines, &block, expected.max(cursor), cursor).ok_or_else(|| {
            PatchError::Conflict {
                file: rel.to_string(),
                line: hunk.old_start,
                kind: ConflictKind::ContextMismatch,
            }
        })?;
        out.extend(old_lines[cursor..at].iter().map(|s| s.to_string()));
        for line in &hunk.lines {
            match line {
                HunkLine::Context(s) | HunkLine::Add(s) => out.push(s.clone()),
                HunkLine::Del(_) => {}
            }
        }
        cursor = at + block.len();
    }
    out.extend(old_lines[cursor..].iter().map(|s| s.to_string()));

    let mut content = out.join("\n");
    if !no_trailing_newline && !content.is_empty() {
        content.push('\n');
    }
    Ok(content)
}

/// Find `block` in `lines`, preferring positions near `expected`, never
/// before `floor` (already-consumed lines).
fn find_block(lines: &[&str], block: &[&str], expected: usize, floor: usize) -> Option<usize> {
    if block.is_empty() {
        // Pure-insertion hunk: trust the declared position, clamped.
        return Some(expected.clamp(floor, lines.len()));
    }
    let fits = |at: usize| -> bool {
        at + block.len() <= lines.len() && block.iter().enumerate().all(|(i, b)| lines[at + i] == *b)
    };
    let start = expected.max(floor);
    if fits(start) {
        return Some(start);
    }
    for delta in 1..=MATCH_WINDOW {
        if start + delta + block.len() <= lines.len() && fits(start + delta) {
            return Some(start + delta);
        }
        if start >= delta && start - delta >= floor && fits(start - delta) {
            return Some(start - delta);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

fn commit_staged(
    repo_root: &Path,
    order: &[String],
    staged: &HashMap<String, Option<String>>,
) -> Result<(), PatchError> {
    // Snapshot originals so a failed write can be rolled back.
    let mut backups: HashMap<String, Option<String>> = HashMap::new();
    let mut written: Vec<String> = Vec::new();

    for rel in order {
        let abs = match safe_join(repo_root, rel) {
            Ok(p) => p,
            Err(e) => {
                restore(repo_root, &written, &backups);
                return Err(e);
            }
        };
        let backup = match std::fs::read_to_string(&abs) {
            Ok(c) => Some(c),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => {
                restore(repo_root, &written, &backups);
                return Err(PatchError::Io {
                    path: rel.clone(),
                    source,
                });
            }
        };
        backups.insert(rel.clone(), backup);

        let result = match staged.get(rel).cloned().flatten() {
            Some(content) => {
                if let Some(parent) = abs.parent() {
                    std::fs::create_dir_all(parent)
                        .and_then(|()| std::fs::write(&abs, content))
                } else {
                    std::fs::write(&abs, content)
                }
            }
            None => std::fs::remove_file(&abs),
        };
        if let Err(source) = result {
            restore(repo_root, &written, &backups);
            return Err(PatchError::Io {
                path: rel.clone(),
                source,
            });
        }
        written.push(rel.clone());
    }
    Ok(())
}

fn restore(repo_root: &Path, written: &[String], backups: &HashMap<String, Option<String>>) {
    for rel in written {
        let Ok(abs) = safe_join(repo_root, rel) else {
            continue;
        };
        match backups.get(rel) {
            Some(Some(content)) => {
                let _ = std::fs::write(&abs, content);
            }
            Some(None) => {
                let _ = std::fs::remove_file(&abs);
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let p = root.join(rel);
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(p, content).unwrap();
    }

    fn read(root: &Path, rel: &str) -> String {
        fs::read_to_string(root.join(rel)).unwrap()
    }

    const SIMPLE: &str = "--- a/src/a.ts\n+++ b/src/a.ts\n@@ -1 +1 @@\n-export const value = 1;\n+export const value = 2;\n";

    #[test]
    fn applies_simple_modification() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.ts", "export const value = 1;\n");
        let applied =
            apply_unified_diff(dir.path(), SIMPLE, &ApplyOptions::default()).unwrap();
        assert_eq!(applied.files_changed, vec!["src/a.ts".to_string()]);
        assert_eq!(read(dir.path(), "src/a.ts"), "export const value = 2;\n");
    }

    #[test]
    fn dry_run_does_not_mutate() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.ts", "export const value = 1;\n");
        let opts = ApplyOptions {
            dry_run: true,
            ..Default::default()
        };
        let applied = apply_unified_diff(dir.path(), SIMPLE, &opts).unwrap();
        assert_eq!(applied.files_changed.len(), 1);
        assert_eq!(read(dir.path(), "src/a.ts"), "export const value = 1;\n");
    }

    #[test]
    fn creates_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let diff = "--- /dev/null\n+++ b/docs/new.md\n@@ -0,0 +1,2 @@\n+# Title\n+Body\n";
        apply_unified_diff(dir.path(), diff, &ApplyOptions::default()).unwrap();
        assert_eq!(read(dir.path(), "docs/new.md"), "# Title\nBody\n");
    }

    #[test]
    fn create_over_existing_file_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "docs/new.md", "already here\n");
        let diff = "--- /dev/null\n+++ b/docs/new.md\n@@ -0,0 +1 @@\n+# Title\n";
        let err = apply_unified_diff(dir.path(), diff, &ApplyOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            PatchError::Conflict {
                kind: ConflictKind::TargetExists,
                ..
            }
        ));
    }

    #[test]
    fn deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "gone.txt", "bye\n");
        let diff = "--- a/gone.txt\n+++ /dev/null\n@@ -1 +0,0 @@\n-bye\n";
        apply_unified_diff(dir.path(), diff, &ApplyOptions::default()).unwrap();
        assert!(!dir.path().join("gone.txt").exists());
    }

    #[test]
    fn context_mismatch_reports_file_and_line() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.ts", "something else entirely\n");
        let err = apply_unified_diff(dir.path(), SIMPLE, &ApplyOptions::default()).unwrap_err();
        match err {
            PatchError::Conflict { file, line, kind } => {
                assert_eq!(file, "src/a.ts");
                assert_eq!(line, 1);
                assert_eq!(kind, ConflictKind::ContextMismatch);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let err = apply_unified_diff(dir.path(), SIMPLE, &ApplyOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            PatchError::Conflict {
                kind: ConflictKind::MissingFile,
                ..
            }
        ));
    }

    #[test]
    fn hunk_drift_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        // Three extra lines shift the hunk away from its declared position.
        write(
            dir.path(),
            "src/a.ts",
            "// new header\n// more\n// and more\nexport const value = 1;\n",
        );
        apply_unified_diff(dir.path(), SIMPLE, &ApplyOptions::default()).unwrap();
        assert!(read(dir.path(), "src/a.ts").contains("value = 2"));
    }

    #[test]
    fn file_limit_is_enforced_before_mutation() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "one\n");
        write(dir.path(), "b.txt", "two\n");
        let diff = "--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-one\n+ONE\n--- a/b.txt\n+++ b/b.txt\n@@ -1 +1 @@\n-two\n+TWO\n";
        let opts = ApplyOptions {
            max_files_changed: Some(1),
            ..Default::default()
        };
        let err = apply_unified_diff(dir.path(), diff, &opts).unwrap_err();
        assert_eq!(err.tag(), "limit");
        assert_eq!(read(dir.path(), "a.txt"), "one\n");
        assert_eq!(read(dir.path(), "b.txt"), "two\n");
    }

    #[test]
    fn line_limit_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "one\ntwo\n");
        let diff = "--- a/a.txt\n+++ b/a.txt\n@@ -1,2 +1,2 @@\n-one\n-two\n+ONE\n+TWO\n";
        let opts = ApplyOptions {
            max_lines_touched: Some(2),
            ..Default::default()
        };
        let err = apply_unified_diff(dir.path(), diff, &opts).unwrap_err();
        assert_eq!(err.tag(), "limit");
    }

    #[test]
    fn binary_sections_are_rejected_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let diff = "diff --git a/logo.png b/logo.png\nBinary files a/logo.png and b/logo.png differ\n";
        let err = apply_unified_diff(dir.path(), diff, &ApplyOptions::default()).unwrap_err();
        assert_eq!(err.tag(), "binary");
    }

    #[test]
    fn binary_sections_are_skipped_when_allowed() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "one\n");
        let diff = "diff --git a/logo.png b/logo.png\nBinary files a/logo.png and b/logo.png differ\n--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-one\n+ONE\n";
        let opts = ApplyOptions {
            allow_binary: true,
            ..Default::default()
        };
        let applied = apply_unified_diff(dir.path(), diff, &opts).unwrap();
        assert_eq!(applied.files_changed, vec!["a.txt".to_string()]);
    }

    #[test]
    fn escaping_paths_are_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let diff = "--- a/../evil.txt\n+++ b/../evil.txt\n@@ -0,0 +1 @@\n+x\n";
        let err = apply_unified_diff(dir.path(), diff, &ApplyOptions::default()).unwrap_err();
        assert_eq!(err.tag(), "malformed");
    }

    #[test]
    fn garbage_input_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let err =
            apply_unified_diff(dir.path(), "not a diff at all\n", &ApplyOptions::default())
                .unwrap_err();
        assert_eq!(err.tag(), "malformed");
    }

    #[test]
    fn truncated_hunk_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "one\ntwo\n");
        let diff = "--- a/a.txt\n+++ b/a.txt\n@@ -1,2 +1,2 @@\n-one\n+ONE\n";
        let err = apply_unified_diff(dir.path(), diff, &ApplyOptions::default()).unwrap_err();
        assert_eq!(err.tag(), "malformed");
    }

    #[test]
    fn multi_hunk_patch_applies_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "1\n2\n3\n4\n5\n6\n7\n8\n");
        let diff = "--- a/a.txt\n+++ b/a.txt\n@@ -1,2 +1,2 @@\n 1\n-2\n+two\n@@ -7,2 +7,2 @@\n 7\n-8\n+eight\n";
        apply_unified_diff(dir.path(), diff, &ApplyOptions::default()).unwrap();
        assert_eq!(read(dir.path(), "a.txt"), "1\ntwo\n3\n4\n5\n6\n7\neight\n");
    }

    #[test]
    fn no_trailing_newline_marker_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        let diff =
            "--- /dev/null\n+++ b/a.txt\n@@ -0,0 +1 @@\n+no newline here\n\\ No newline at end of file\n";
        apply_unified_diff(dir.path(), diff, &ApplyOptions::default()).unwrap();
        assert_eq!(read(dir.path(), "a.txt"), "no newline here");
    }
}
