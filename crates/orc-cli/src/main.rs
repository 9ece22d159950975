// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! The `orc` binary: run, plan, doctor, eval.

mod doctor;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orc_config::CliOverrides;
use orc_core::event::RunEventKind;
use orc_core::{Budget, RunStatus, ThinkLevel};
use orc_engine::run::RunOptions;
use orc_engine::{CancellationToken, EngineError};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Exit code for failed runs.
const EXIT_FAILURE: i32 = 1;
/// Exit code for configuration / registry errors.
const EXIT_CONFIG_ERROR: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "orc", version, about = "Tiered agentic code-change orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (and per-event progress output).
    #[arg(long, global = true)]
    verbose: bool,

    /// Explicit config file (highest-precedence file layer).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Repository root to operate on.
    #[arg(long, default_value = ".", global = true)]
    repo: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a run toward a goal.
    Run {
        /// The natural-language goal.
        goal: String,

        /// Think level: L0 | L1 | L2 | L3.
        #[arg(long)]
        think: Option<String>,

        /// Budget overrides: time=10m,cost=2.5,iter=4,tool=6.
        #[arg(long)]
        budget: Option<String>,

        /// Run id (generated when omitted).
        #[arg(long)]
        run_id: Option<String>,

        /// Print the final summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Produce plan.json for a goal without executing it.
    Plan {
        /// The natural-language goal.
        goal: String,
    },

    /// Check the environment: git, ripgrep, config, providers.
    Doctor,

    /// Run an offline scenario suite.
    Eval {
        /// Path to the suite file (YAML or JSON).
        suite: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let code = runtime.block_on(dispatch(cli));
    std::process::exit(code);
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> i32 {
    match cli.command {
        Commands::Run {
            ref goal,
            ref think,
            ref budget,
            ref run_id,
            json,
        } => run_command(&cli, goal, think.as_deref(), budget.as_deref(), run_id.clone(), json).await,
        Commands::Plan { ref goal } => plan_command(&cli, goal).await,
        Commands::Doctor => doctor::doctor_command(&cli.repo, cli.config.as_deref()),
        Commands::Eval { ref suite } => eval_command(suite).await,
    }
}

async fn run_command(
    cli: &Cli,
    goal: &str,
    think: Option<&str>,
    budget: Option<&str>,
    run_id: Option<String>,
    json: bool,
) -> i32 {
    let overrides = match build_overrides(think, budget) {
        Ok(overrides) => overrides,
        Err(e) => {
            eprintln!("error: {e}");
            return EXIT_CONFIG_ERROR;
        }
    };
    let config = match orc_config::load_stack(&cli.repo, cli.config.as_deref(), &overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {e}");
            return EXIT_CONFIG_ERROR;
        }
    };

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    let event_tap = if cli.verbose && !json {
        Some(progress_tap())
    } else {
        None
    };

    let result = orc_engine::run(RunOptions {
        repo_root: cli.repo.clone(),
        config,
        goal: goal.to_string(),
        run_id,
        command_line: std::env::args().collect::<Vec<_>>().join(" "),
        cancel,
        event_tap,
        confirmation: None,
    })
    .await;

    match result {
        Ok(summary) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&summary).unwrap_or_default()
                );
            } else {
                println!("{}: {}", status_word(summary.status), summary.summary);
                println!(
                    "  run {} | steps {} | iterations {}{}",
                    summary.run_id,
                    summary.steps_completed,
                    summary.iterations,
                    summary
                        .cost
                        .total
                        .estimated_cost_usd
                        .map(|c| format!(" | est. ${c:.4}"))
                        .unwrap_or_default()
                );
            }
            match summary.status {
                RunStatus::Success => 0,
                RunStatus::Failure => EXIT_FAILURE,
            }
        }
        Err(error) => {
            eprintln!("error: {error}");
            engine_exit_code(&error)
        }
    }
}

async fn plan_command(cli: &Cli, goal: &str) -> i32 {
    let config = match orc_config::load_stack(&cli.repo, cli.config.as_deref(), &CliOverrides::default())
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {e}");
            return EXIT_CONFIG_ERROR;
        }
    };
    let result = orc_engine::plan_only(RunOptions {
        repo_root: cli.repo.clone(),
        config,
        goal: goal.to_string(),
        run_id: None,
        command_line: std::env::args().collect::<Vec<_>>().join(" "),
        cancel: CancellationToken::new(),
        event_tap: None,
        confirmation: None,
    })
    .await;
    match result {
        Ok(plan) => {
            if plan.is_empty() {
                println!("planner produced no steps");
            }
            for step in &plan.steps {
                println!("{}. {}", step.id, step.step);
            }
            0
        }
        Err(error) => {
            eprintln!("error: {error}");
            engine_exit_code(&error)
        }
    }
}

async fn eval_command(suite_path: &std::path::Path) -> i32 {
    let suite = match orc_engine::eval::load_suite(suite_path) {
        Ok(suite) => suite,
        Err(e) => {
            eprintln!("error: {e:#}");
            return EXIT_CONFIG_ERROR;
        }
    };
    match orc_engine::eval::run_suite(&suite).await {
        Ok(outcomes) => {
            let mut failed = 0;
            for outcome in &outcomes {
                let mark = if outcome.passed { "PASS" } else { "FAIL" };
                println!("{mark}  {}  {}", outcome.name, outcome.detail);
                if !outcome.passed {
                    failed += 1;
                }
            }
            println!("{} scenario(s), {failed} failed", outcomes.len());
            if failed == 0 { 0 } else { EXIT_FAILURE }
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_FAILURE
        }
    }
}

fn build_overrides(think: Option<&str>, budget: Option<&str>) -> Result<CliOverrides> {
    let think_level = match think {
        Some(raw) => Some(
            ThinkLevel::parse(raw)
                .with_context(|| format!("invalid think level '{raw}' (expected L0..L3)"))?,
        ),
        None => None,
    };
    let budget = match budget {
        Some(raw) => Some(parse_budget_flag(raw)?),
        None => None,
    };
    Ok(CliOverrides { think_level, budget })
}

/// Parse `time=10m,cost=2.5,iter=4,tool=6`.
fn parse_budget_flag(raw: &str) -> Result<Budget> {
    let mut budget = Budget {
        iter: None,
        time_ms: None,
        cost_usd: None,
        tool: None,
    };
    for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let (key, value) = part
            .split_once('=')
            .with_context(|| format!("budget part '{part}' is not key=value"))?;
        match key.trim() {
            "time" => budget.time_ms = Some(parse_duration_ms(value.trim())?),
            "cost" => {
                budget.cost_usd =
                    Some(value.trim().parse().with_context(|| format!("bad cost '{value}'"))?);
            }
            "iter" => {
                budget.iter =
                    Some(value.trim().parse().with_context(|| format!("bad iter '{value}'"))?);
            }
            "tool" => {
                budget.tool =
                    Some(value.trim().parse().with_context(|| format!("bad tool '{value}'"))?);
            }
            other => anyhow::bail!("unknown budget dimension '{other}'"),
        }
    }
    Ok(budget)
}

/// `500` (ms), `30s`, or `10m`.
fn parse_duration_ms(raw: &str) -> Result<u64> {
    if let Some(minutes) = raw.strip_suffix('m') {
        return Ok(minutes.parse::<u64>().context("bad minutes")? * 60_000);
    }
    if let Some(seconds) = raw.strip_suffix('s') {
        return Ok(seconds.parse::<u64>().context("bad seconds")? * 1_000);
    }
    raw.parse::<u64>().context("bad milliseconds")
}

fn status_word(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Success => "success",
        RunStatus::Failure => "failure",
    }
}

fn engine_exit_code(error: &EngineError) -> i32 {
    error.exit_code()
}

fn progress_tap() -> orc_engine::trace::EventTap {
    Box::new(|event| {
        let detail = match &event.kind {
            RunEventKind::PlanCreated { step_count, .. } => format!("{step_count} step(s)"),
            RunEventKind::StepStateChanged { step_id, state } => {
                format!("step {step_id} -> {state:?}")
            }
            RunEventKind::PatchApplied { files_changed, .. } => {
                format!("{files_changed} file(s)")
            }
            RunEventKind::VerificationFinished { passed, .. } => {
                if *passed { "passed".into() } else { "failed".into() }
            }
            _ => String::new(),
        };
        eprintln!("[{}] {}", event.kind.type_name(), detail);
    })
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling run");
            cancel.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_flag_parses_all_dimensions() {
        let budget = parse_budget_flag("time=10m,cost=2.5,iter=4,tool=6").unwrap();
        assert_eq!(budget.time_ms, Some(600_000));
        assert_eq!(budget.cost_usd, Some(2.5));
        assert_eq!(budget.iter, Some(4));
        assert_eq!(budget.tool, Some(6));
    }

    #[test]
    fn budget_flag_accepts_partial_sets() {
        let budget = parse_budget_flag("iter=2").unwrap();
        assert_eq!(budget.iter, Some(2));
        assert_eq!(budget.time_ms, None);
    }

    #[test]
    fn budget_flag_rejects_unknown_keys() {
        assert!(parse_budget_flag("fuel=9").is_err());
    }

    #[test]
    fn durations_parse_with_suffixes() {
        assert_eq!(parse_duration_ms("250").unwrap(), 250);
        assert_eq!(parse_duration_ms("30s").unwrap(), 30_000);
        assert_eq!(parse_duration_ms("2m").unwrap(), 120_000);
        assert!(parse_duration_ms("abc").is_err());
    }

    #[test]
    fn think_override_validates() {
        assert!(build_overrides(Some("L2"), None).is_ok());
        assert!(build_overrides(Some("L9"), None).is_err());
    }
}
