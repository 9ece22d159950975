// SPDX-License-Identifier: MIT OR Apache-2.0
//! Verification reports and failure signatures.
//!
//! The failure signature is a pure function of the failing checks: equal
//! reports produce equal signatures on any host. Inputs are documented on
//! [`failure_signature`] so independent implementations can reproduce it.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Outcome of one verification command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CheckResult {
    /// Stable check name (`lint`, `typecheck`, `test`, or a custom label).
    pub name: String,
    /// The command line that ran.
    pub command: String,
    /// Exit code; non-zero (or a kill) means failure.
    pub exit_code: i32,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Path of the captured stdout file, relative to the run directory.
    pub stdout_path: String,
    /// Path of the captured stderr file, relative to the run directory.
    pub stderr_path: String,
    /// Whether the check passed.
    pub passed: bool,
}

/// Result of one verification pass over the working tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VerificationReport {
    /// `true` iff every check passed.
    pub passed: bool,
    /// Individual check outcomes, in execution order.
    pub checks: Vec<CheckResult>,
    /// Human-readable one-liner (`"3 checks passed"`, `"test failed"`).
    pub summary: String,
    /// Deterministic fingerprint of the failure; `None` when passed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_signature: Option<String>,
}

impl VerificationReport {
    /// Assemble a report, deriving `passed` and `summary` from the checks.
    ///
    /// `failing_tails` pairs each failing check's name with the normalized
    /// tail of its error output (see [`normalize_output_tail`]).
    pub fn from_checks(checks: Vec<CheckResult>, failing_tails: &[(String, String)]) -> Self {
        let passed = checks.iter().all(|c| c.passed);
        let summary = if passed {
            format!("{} check(s) passed", checks.len())
        } else {
            let failed: Vec<&str> = checks
                .iter()
                .filter(|c| !c.passed)
                .map(|c| c.name.as_str())
                .collect();
            format!("failed: {}", failed.join(", "))
        };
        let failure_signature = if passed {
            None
        } else {
            Some(failure_signature(failing_tails))
        };
        Self {
            passed,
            checks,
            summary,
            failure_signature,
        }
    }
}

/// Normalize the tail of a command's error output for fingerprinting.
///
/// Keeps the last 12 non-empty lines, trims each line, and strips absolute
/// path segments down to basenames so the signature survives different
/// checkout locations.
pub fn normalize_output_tail(output: &str) -> String {
    let lines: Vec<String> = output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| strip_paths(l.trim()))
        .collect();
    let start = lines.len().saturating_sub(12);
    lines[start..].join("\n")
}

fn strip_paths(line: &str) -> String {
    line.split_whitespace()
        .map(|tok| {
            if tok.starts_with('/') && tok.len() > 1 {
                tok.rsplit('/').next().unwrap_or(tok)
            } else {
                tok
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compute the failure signature over `(check name, normalized tail)` pairs.
///
/// Hash input: pairs sorted by name then tail, each encoded as
/// `name 0x1f tail 0x1e`, digested with SHA-256 and hex-encoded. Used only
/// for equality comparisons.
pub fn failure_signature(failing: &[(String, String)]) -> String {
    let mut parts: Vec<&(String, String)> = failing.iter().collect();
    parts.sort();
    let mut hasher = Sha256::new();
    for (name, tail) in parts {
        hasher.update(name.as_bytes());
        hasher.update([0x1f]);
        hasher.update(tail.as_bytes());
        hasher.update([0x1e]);
    }
    hex_string(&hasher.finalize())
}

/// Hash arbitrary error text; used to key consecutive apply failures.
pub fn error_key(text: &str) -> String {
    hex_string(&Sha256::digest(text.as_bytes()))
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(name: &str, passed: bool) -> CheckResult {
        CheckResult {
            name: name.into(),
            command: format!("run {name}"),
            exit_code: if passed { 0 } else { 1 },
            duration_ms: 5,
            stdout_path: format!("tool_logs/{name}.stdout"),
            stderr_path: format!("tool_logs/{name}.stderr"),
            passed,
        }
    }

    #[test]
    fn passed_iff_every_check_passed() {
        let ok = VerificationReport::from_checks(vec![check("lint", true), check("test", true)], &[]);
        assert!(ok.passed);
        assert!(ok.failure_signature.is_none());

        let bad = VerificationReport::from_checks(
            vec![check("lint", true), check("test", false)],
            &[("test".into(), "assertion failed".into())],
        );
        assert!(!bad.passed);
        assert!(bad.failure_signature.is_some());
        assert!(bad.summary.contains("test"));
    }

    #[test]
    fn equal_inputs_give_equal_signatures() {
        let a = failure_signature(&[("test".into(), "boom".into())]);
        let b = failure_signature(&[("test".into(), "boom".into())]);
        assert_eq!(a, b);
    }

    #[test]
    fn signature_is_order_independent() {
        let a = failure_signature(&[
            ("lint".into(), "x".into()),
            ("test".into(), "y".into()),
        ]);
        let b = failure_signature(&[
            ("test".into(), "y".into()),
            ("lint".into(), "x".into()),
        ]);
        assert_eq!(a, b);
    }

    #[test]
    fn signature_distinguishes_different_failures() {
        let a = failure_signature(&[("test".into(), "boom".into())]);
        let b = failure_signature(&[("test".into(), "bang".into())]);
        assert_ne!(a, b);
    }

    #[test]
    fn tail_keeps_last_lines_and_strips_paths() {
        let mut text = String::new();
        for i in 0..20 {
            text.push_str(&format!("line {i}\n"));
        }
        text.push_str("error at /home/user/repo/src/main.rs:10\n");
        let tail = normalize_output_tail(&text);
        assert!(tail.contains("error at main.rs:10"));
        assert!(!tail.contains("line 0"));
        assert_eq!(tail.lines().count(), 12);
    }

    #[test]
    fn error_key_is_stable() {
        assert_eq!(error_key("same"), error_key("same"));
        assert_ne!(error_key("same"), error_key("other"));
    }
}
