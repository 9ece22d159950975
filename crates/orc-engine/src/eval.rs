// SPDX-License-Identifier: MIT OR Apache-2.0
//! Offline scenario evaluation (`orc eval <suite>`).
//!
//! A suite is a YAML (or JSON) file of scenarios; each scenario seeds a
//! temp repository, wires scripted mock providers for the three roles,
//! runs the real engine, and compares the outcome against expectations.
//! Nothing touches the network.

use crate::cancel::CancellationToken;
use crate::run::{RunOptions, run};
use anyhow::{Context, Result};
use orc_config::{OrcConfig, ProviderEntry, parse_config};
use orc_core::{RunStatus, ThinkLevel};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// A whole evaluation suite.
#[derive(Debug, Deserialize)]
pub struct EvalSuite {
    /// Scenarios, run in order.
    pub scenarios: Vec<EvalScenario>,
}

/// One offline scenario.
#[derive(Debug, Deserialize)]
pub struct EvalScenario {
    /// Display name.
    pub name: String,
    /// The goal handed to the engine.
    pub goal: String,
    /// Tier to run at (default L1).
    #[serde(default)]
    pub think_level: Option<ThinkLevel>,
    /// Fixture files seeded into the temp repository.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    /// Scripted provider responses per role.
    #[serde(default)]
    pub script: RoleScripts,
    /// Extra config YAML merged into the scenario config.
    #[serde(default)]
    pub config: Option<String>,
    /// Expected outcome.
    pub expect: Expectation,
}

/// Scripted responses for each role.
#[derive(Debug, Default, Deserialize)]
pub struct RoleScripts {
    /// Planner responses, played in order.
    #[serde(default)]
    pub planner: Vec<String>,
    /// Executor responses, played in order.
    #[serde(default)]
    pub executor: Vec<String>,
    /// Reviewer responses, played in order.
    #[serde(default)]
    pub reviewer: Vec<String>,
}

/// Expected scenario outcome.
#[derive(Debug, Deserialize)]
pub struct Expectation {
    /// `success` or `failure`.
    pub status: String,
    /// Expected stop reason, when any.
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// Result of one scenario.
#[derive(Debug)]
pub struct EvalOutcome {
    /// Scenario name.
    pub name: String,
    /// Whether expectations held.
    pub passed: bool,
    /// Human-readable detail on mismatch.
    pub detail: String,
}

/// Load a suite from YAML or JSON (by extension).
pub fn load_suite(path: &Path) -> Result<EvalSuite> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read eval suite {}", path.display()))?;
    if path.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&content).context("parse eval suite JSON")
    } else {
        serde_yaml::from_str(&content).context("parse eval suite YAML")
    }
}

/// Run every scenario and collect outcomes.
pub async fn run_suite(suite: &EvalSuite) -> Result<Vec<EvalOutcome>> {
    let mut outcomes = Vec::new();
    for scenario in &suite.scenarios {
        info!(scenario = %scenario.name, "running eval scenario");
        outcomes.push(run_scenario(scenario).await?);
    }
    Ok(outcomes)
}

async fn run_scenario(scenario: &EvalScenario) -> Result<EvalOutcome> {
    let dir = tempfile::tempdir().context("create scenario dir")?;
    for (rel, content) in &scenario.files {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
    }

    let mut config = match &scenario.config {
        Some(yaml) => parse_config(yaml).map_err(|e| anyhow::anyhow!("scenario config: {e}"))?,
        None => OrcConfig::default(),
    };
    config.think_level = scenario.think_level.unwrap_or(ThinkLevel::L1);
    wire_role(&mut config, "planner", &scenario.script.planner);
    wire_role(&mut config, "executor", &scenario.script.executor);
    wire_role(&mut config, "reviewer", &scenario.script.reviewer);
    config.defaults.planner = Some("planner".into());
    config.defaults.executor = Some("executor".into());
    config.defaults.reviewer = Some("reviewer".into());
    // Scenario repos are throwaway; verification defaults to none unless
    // the scenario config supplies custom steps.
    if scenario.config.is_none() {
        config.verification.enabled = false;
    }

    let summary = run(RunOptions {
        repo_root: dir.path().to_path_buf(),
        config,
        goal: scenario.goal.clone(),
        run_id: None,
        command_line: format!("orc eval scenario {}", scenario.name),
        cancel: CancellationToken::new(),
        event_tap: None,
        confirmation: None,
    })
    .await
    .map_err(|e| anyhow::anyhow!("scenario '{}': {e}", scenario.name))?;

    let status = match summary.status {
        RunStatus::Success => "success",
        RunStatus::Failure => "failure",
    };
    let stop = summary.stop_reason.map(|r| r.to_string());

    let mut mismatches = Vec::new();
    if status != scenario.expect.status {
        mismatches.push(format!(
            "status: expected {}, got {status} ({})",
            scenario.expect.status, summary.summary
        ));
    }
    if let Some(expected_stop) = &scenario.expect.stop_reason {
        if stop.as_deref() != Some(expected_stop.as_str()) {
            mismatches.push(format!(
                "stop_reason: expected {expected_stop}, got {}",
                stop.as_deref().unwrap_or("none")
            ));
        }
    }

    Ok(EvalOutcome {
        name: scenario.name.clone(),
        passed: mismatches.is_empty(),
        detail: if mismatches.is_empty() {
            summary.summary
        } else {
            mismatches.join("; ")
        },
    })
}

fn wire_role(config: &mut OrcConfig, role: &str, responses: &[String]) {
    config.providers.insert(
        role.to_string(),
        ProviderEntry {
            kind: "mock".into(),
            responses: responses.to_vec(),
            ..Default::default()
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUITE_YAML: &str = r#"
scenarios:
  - name: l0-happy
    goal: Fix the bug
    think_level: L0
    files:
      a.ts: "export const value = 1;\n"
    script:
      executor:
        - "BEGIN_DIFF\n--- a/a.ts\n+++ b/a.ts\n@@ -1 +1 @@\n-export const value = 1;\n+export const value = 2;\nEND_DIFF"
    expect:
      status: success
"#;

    #[test]
    fn suite_parses_from_yaml() {
        let suite: EvalSuite = serde_yaml::from_str(SUITE_YAML).unwrap();
        assert_eq!(suite.scenarios.len(), 1);
        assert_eq!(suite.scenarios[0].expect.status, "success");
    }

    #[tokio::test]
    async fn happy_scenario_passes() {
        let suite: EvalSuite = serde_yaml::from_str(SUITE_YAML).unwrap();
        let outcomes = run_suite(&suite).await.unwrap();
        assert!(outcomes[0].passed, "detail: {}", outcomes[0].detail);
    }

    #[tokio::test]
    async fn failed_expectation_is_reported() {
        let yaml = SUITE_YAML.replace("status: success", "status: failure");
        let suite: EvalSuite = serde_yaml::from_str(&yaml).unwrap();
        let outcomes = run_suite(&suite).await.unwrap();
        assert!(!outcomes[0].passed);
        assert!(outcomes[0].detail.contains("expected failure"));
    }
}
