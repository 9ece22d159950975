// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end engine scenarios over temp git repositories with scripted
//! mock providers.

use orc_config::{OrcConfig, ProviderEntry, VerificationMode, VerificationStep};
use orc_core::summary::RunSummary;
use orc_core::{RunStatus, StopReason, ThinkLevel};
use orc_engine::run::RunOptions;
use orc_engine::{CancellationToken, run};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn fixture_repo(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (rel, content) in files {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }
    dir
}

fn mock(responses: &[&str]) -> ProviderEntry {
    ProviderEntry {
        kind: "mock".into(),
        responses: responses.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

fn config(
    level: ThinkLevel,
    planner: &[&str],
    executor: &[&str],
    reviewer: &[&str],
) -> OrcConfig {
    let mut config = OrcConfig::default();
    config.think_level = level;
    config.providers = BTreeMap::from([
        ("planner".to_string(), mock(planner)),
        ("executor".to_string(), mock(executor)),
        ("reviewer".to_string(), mock(reviewer)),
    ]);
    config.defaults.planner = Some("planner".into());
    config.defaults.executor = Some("executor".into());
    config.defaults.reviewer = Some("reviewer".into());
    config.verification.enabled = false;
    config
}

fn with_verification(mut config: OrcConfig, name: &str, command: &str) -> OrcConfig {
    config.verification.enabled = true;
    config.verification.mode = VerificationMode::Custom;
    config.verification.steps = vec![VerificationStep {
        name: name.into(),
        command: command.into(),
    }];
    config
}

async fn run_goal(dir: &Path, config: OrcConfig, goal: &str) -> RunSummary {
    run(RunOptions {
        repo_root: dir.to_path_buf(),
        config,
        goal: goal.into(),
        run_id: None,
        command_line: format!("orc run {goal}"),
        cancel: CancellationToken::new(),
        event_tap: None,
        confirmation: None,
    })
    .await
    .expect("engine setup must succeed")
}

fn run_dir(repo: &Path, summary: &RunSummary) -> PathBuf {
    repo.join(".orchestrator/runs").join(&summary.run_id)
}

fn trace_events(repo: &Path, summary: &RunSummary) -> Vec<serde_json::Value> {
    std::fs::read_to_string(run_dir(repo, summary).join("trace.jsonl"))
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn count_events(events: &[serde_json::Value], kind: &str) -> usize {
    events.iter().filter(|e| e["type"] == kind).count()
}

const A_TS_DIFF: &str = "BEGIN_DIFF\n--- a/a.ts\n+++ b/a.ts\n@@ -1 +1 @@\n-export const value = 1;\n+export const value = 2;\nEND_DIFF";

// -- 1. L0 happy path -------------------------------------------------------

#[tokio::test]
async fn l0_happy_path_applies_and_references_patches() {
    let dir = fixture_repo(&[("a.ts", "export const value = 1;\n")]);
    let summary = run_goal(
        dir.path(),
        config(ThinkLevel::L0, &[], &[A_TS_DIFF], &[]),
        "Fix the bug",
    )
    .await;

    assert_eq!(summary.status, RunStatus::Success);
    assert!(
        std::fs::read_to_string(dir.path().join("a.ts"))
            .unwrap()
            .contains("value = 2")
    );

    let manifest: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(run_dir(dir.path(), &summary).join("manifest.json")).unwrap(),
    )
    .unwrap();
    let patch_paths = manifest["patch_paths"].as_array().unwrap();
    assert!(patch_paths.len() >= 2, "selected + final: {patch_paths:?}");
    // Every referenced patch exists on disk.
    for rel in patch_paths {
        assert!(run_dir(dir.path(), &summary).join(rel.as_str().unwrap()).exists());
    }
}

// -- 2. L1 multi-step -------------------------------------------------------

#[tokio::test]
async fn l1_multi_step_applies_each_step() {
    let dir = fixture_repo(&[("a.txt", "aaa\n"), ("b.txt", "bbb\n")]);
    let plan = r#"{"steps": ["Update a", "Update b"]}"#;
    let diff_a = "BEGIN_DIFF\n--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-aaa\n+AAA\nEND_DIFF";
    let diff_b = "BEGIN_DIFF\n--- a/b.txt\n+++ b/b.txt\n@@ -1 +1 @@\n-bbb\n+BBB\nEND_DIFF";
    let summary = run_goal(
        dir.path(),
        config(ThinkLevel::L1, &[plan], &[diff_a, diff_b], &[]),
        "Update both files",
    )
    .await;

    assert_eq!(summary.status, RunStatus::Success);
    assert_eq!(summary.steps_completed, 2);
    assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "AAA\n");
    assert_eq!(std::fs::read_to_string(dir.path().join("b.txt")).unwrap(), "BBB\n");

    let events = trace_events(dir.path(), &summary);
    assert_eq!(count_events(&events, "patch_applied"), 2);
    assert_eq!(events.last().unwrap()["type"], "run_finished");
}

// -- 3. L1 invalid-output stop ----------------------------------------------

#[tokio::test]
async fn l1_invalid_output_stops_without_mutation() {
    let dir = fixture_repo(&[("a.txt", "original\n")]);
    let plan = r#"{"steps": ["Change the file"]}"#;
    let summary = run_goal(
        dir.path(),
        config(
            ThinkLevel::L1,
            &[plan],
            &["I cannot produce a diff.", "Still no diff, sorry."],
            &[],
        ),
        "Change something",
    )
    .await;

    assert_eq!(summary.status, RunStatus::Failure);
    assert_eq!(summary.stop_reason, Some(StopReason::InvalidOutput));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
        "original\n"
    );

    let events = trace_events(dir.path(), &summary);
    let stopped = events
        .iter()
        .find(|e| e["type"] == "run_stopped")
        .expect("run_stopped emitted");
    assert_eq!(stopped["reason"], "invalid_output");
    assert_eq!(events.last().unwrap()["type"], "run_finished");
}

// -- 4. L2 repair success ---------------------------------------------------

#[tokio::test]
async fn l2_repairs_failing_verification() {
    let dir = fixture_repo(&[("a.txt", "value=1\n")]);
    let plan = r#"{"steps": ["Set the value"]}"#;
    let wrong = "BEGIN_DIFF\n--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-value=1\n+value=3\nEND_DIFF";
    let fix = "BEGIN_DIFF\n--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-value=3\n+value=2\nEND_DIFF";
    let cfg = with_verification(
        config(ThinkLevel::L2, &[plan], &[wrong, fix], &[]),
        "value-check",
        "grep -q value=2 a.txt",
    );
    let summary = run_goal(dir.path(), cfg, "Set value to 2").await;

    assert_eq!(summary.status, RunStatus::Success, "{}", summary.summary);
    assert!(summary.summary.contains("L2 Verified Success after 1 iterations"));
    assert_eq!(summary.report_paths.len(), 2);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
        "value=2\n"
    );
}

// -- 5. L2 non-improving ----------------------------------------------------

#[tokio::test]
async fn l2_stops_on_unchanged_failure_signature() {
    let dir = fixture_repo(&[("a.txt", "value=1\n")]);
    let plan = r#"{"steps": ["Set the value"]}"#;
    let wrong = "BEGIN_DIFF\n--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-value=1\n+value=3\nEND_DIFF";
    let note1 = "BEGIN_DIFF\n--- /dev/null\n+++ b/note1.txt\n@@ -0,0 +1 @@\n+note one\nEND_DIFF";
    let note2 = "BEGIN_DIFF\n--- /dev/null\n+++ b/note2.txt\n@@ -0,0 +1 @@\n+note two\nEND_DIFF";
    let cfg = with_verification(
        config(ThinkLevel::L2, &[plan], &[wrong, note1, note2], &[]),
        "value-check",
        "grep -q value=2 a.txt",
    );
    let summary = run_goal(dir.path(), cfg, "Set value to 2").await;

    assert_eq!(summary.status, RunStatus::Failure);
    assert_eq!(summary.stop_reason, Some(StopReason::NonImproving));

    let events = trace_events(dir.path(), &summary);
    // Initial verification plus two repair verifications.
    assert_eq!(count_events(&events, "verification_started"), 3);
}

// -- 6. L3 best-of-N selection ----------------------------------------------

#[tokio::test]
async fn l3_selects_smallest_passing_candidate_without_reviewer() {
    let dir = fixture_repo(&[("a.txt", "value=1\n")]);
    let plan = r#"{"steps": ["Fix the value"]}"#;
    let invalid = "I am not able to propose a change here.";
    let big = "BEGIN_DIFF\n--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-value=1\n+value=2\n--- /dev/null\n+++ b/extra.txt\n@@ -0,0 +1,6 @@\n+one\n+two\n+three\n+four\n+five\n+six\nEND_DIFF";
    let small = "BEGIN_DIFF\n--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-value=1\n+value=2\nEND_DIFF";
    let cfg = with_verification(
        config(ThinkLevel::L3, &[plan], &[invalid, big, small], &[]),
        "value-check",
        "grep -q value=2 a.txt",
    );
    let summary = run_goal(dir.path(), cfg, "Fix the value").await;

    assert_eq!(summary.status, RunStatus::Success, "{}", summary.summary);
    assert!(summary.passing_candidate_selected);
    assert!(!summary.judge_invoked);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
        "value=2\n"
    );
    // The smaller diff won: no extra.txt in the tree.
    assert!(!dir.path().join("extra.txt").exists());

    // The reviewer was never consulted: a passing candidate existed.
    let ranking: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(
            run_dir(dir.path(), &summary).join("selection/iter_0_ranking.json"),
        )
        .unwrap(),
    )
    .unwrap();
    assert!(ranking["reviewer"].is_null());
    assert_eq!(ranking["selected"], 2);
}

// -- invariants -------------------------------------------------------------

#[tokio::test]
async fn apply_failures_pair_with_head_rollbacks() {
    let dir = fixture_repo(&[("a.txt", "actual content\n")]);
    let plan = r#"{"steps": ["Change the file"]}"#;
    // Valid diff shape, wrong context: conflicts every time.
    let bad = "BEGIN_DIFF\n--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-something else\n+changed\nEND_DIFF";
    let summary = run_goal(
        dir.path(),
        config(ThinkLevel::L1, &[plan], &[bad, bad], &[]),
        "Change it",
    )
    .await;

    assert_eq!(summary.stop_reason, Some(StopReason::RepeatedFailure));
    let events = trace_events(dir.path(), &summary);
    let failures = count_events(&events, "patch_apply_failed");
    assert!(failures >= 1);
    let rollbacks: Vec<&serde_json::Value> = events
        .iter()
        .filter(|e| e["type"] == "rollback_performed")
        .collect();
    assert!(rollbacks.len() >= failures);
    assert!(rollbacks.iter().all(|r| r["target_ref"] == "HEAD"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
        "actual content\n"
    );
}

#[tokio::test]
async fn cancelled_run_stops_then_finishes() {
    let dir = fixture_repo(&[("a.txt", "x\n")]);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let plan = r#"{"steps": ["Do the thing"]}"#;
    let summary = run(RunOptions {
        repo_root: dir.path().to_path_buf(),
        config: config(ThinkLevel::L1, &[plan], &[A_TS_DIFF], &[]),
        goal: "goal".into(),
        run_id: Some("cancelled-run".into()),
        command_line: "orc run goal".into(),
        cancel,
        event_tap: None,
        confirmation: None,
    })
    .await
    .unwrap();

    assert_eq!(summary.stop_reason, Some(StopReason::Cancelled));
    let events = trace_events(dir.path(), &summary);
    let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    let stopped_at = types.iter().position(|t| *t == "run_stopped").unwrap();
    assert_eq!(types.last().unwrap(), &"run_finished");
    assert!(stopped_at < types.len() - 1);
}

#[tokio::test]
async fn empty_plan_fails_the_run() {
    let dir = fixture_repo(&[("a.txt", "x\n")]);
    let summary = run_goal(
        dir.path(),
        config(
            ThinkLevel::L1,
            &["I would suggest thinking about it differently."],
            &[A_TS_DIFF],
            &[],
        ),
        "goal",
    )
    .await;
    assert_eq!(summary.status, RunStatus::Failure);
    assert!(summary.summary.contains("Planning failed to produce any steps."));
}

#[tokio::test]
async fn effective_config_and_summary_are_persisted() {
    let dir = fixture_repo(&[("a.ts", "export const value = 1;\n")]);
    let summary = run_goal(
        dir.path(),
        config(ThinkLevel::L0, &[], &[A_TS_DIFF], &[]),
        "Fix the bug",
    )
    .await;

    let dir_path = run_dir(dir.path(), &summary);
    assert!(dir_path.join("effective-config.json").exists());
    let persisted: RunSummary =
        serde_json::from_str(&std::fs::read_to_string(dir_path.join("summary.json")).unwrap())
            .unwrap();
    assert_eq!(persisted.run_id, summary.run_id);
    assert_eq!(persisted.status, summary.status);
    // Mock providers report usage but carry no pricing: cost stays null.
    assert!(persisted.cost.total.total_tokens > 0);
    assert_eq!(persisted.cost.total.estimated_cost_usd, None);
}
