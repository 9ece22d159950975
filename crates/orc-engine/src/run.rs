// SPDX-License-Identifier: MIT OR Apache-2.0
//! The tiered run engine.
//!
//! One [`Engine`] instance drives one run: L0 single-shot, L1 planned
//! execution, L2 plan+verify+repair, L3 best-of-N with judge and
//! diagnosis. Every exit path flows through [`Engine::finalize`], which
//! emits `RunStopped`/`RunFinished`, persists the summary and final
//! manifest, and writes the episodic memory record (failures swallowed).

use crate::artifacts::{ArtifactStore, ManifestHandle, PatchStore};
use crate::budget::BudgetTracker;
use crate::cancel::CancellationToken;
use crate::candidates;
use crate::diagnose;
use crate::execute::{ExecutionLimits, ExecutionService};
use crate::planner::request_plan;
use crate::review::run_review_loop;
use crate::trace::{EventTap, TraceBus};
use crate::{EngineError, prompts};
use orc_config::{OrcConfig, VerificationMode};
use orc_context::{BuildOptions, BuiltContext, ContextBuilder};
use orc_core::event::RunEventKind;
use orc_core::manifest::Manifest;
use orc_core::summary::RunSummary;
use orc_core::verify::error_key;
use orc_core::{RunStatus, StepState, StopReason, ThinkLevel};
use orc_memory::{Cipher, EpisodeRecord, JsonMemoryStore, MemoryStore};
use orc_patch::extract_diff;
use orc_providers::{
    Confirmation, CostTracker, DenyAll, GenerateRequest, Provider, ProviderRegistry, RoleSet,
};
use orc_vcs::GitGateway;
use orc_verify::{
    DeriveOptions, NetworkPolicy, ToolPolicy, VerificationRunner, VerifyCommand, derive_commands,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Repair iterations L2 attempts before giving up.
const MAX_REPAIR_ITERATIONS: u32 = 5;
/// Consecutive invalid-output generations that stop a run.
const INVALID_OUTPUT_THRESHOLD: u32 = 2;
/// Consecutive same-error apply failures that stop a run.
const REPEATED_FAILURE_THRESHOLD: u32 = 2;
/// Consecutive identical failure signatures that stop L2.
const NON_IMPROVING_THRESHOLD: u32 = 2;

/// Everything needed to start a run.
pub struct RunOptions {
    /// Repository root the run operates on.
    pub repo_root: PathBuf,
    /// Fully merged configuration.
    pub config: OrcConfig,
    /// The user's goal.
    pub goal: String,
    /// Run id; generated when absent.
    pub run_id: Option<String>,
    /// Invoking command line, recorded in the manifest.
    pub command_line: String,
    /// Cancellation signal.
    pub cancel: CancellationToken,
    /// Optional in-process event observer.
    pub event_tap: Option<EventTap>,
    /// Confirmation provider; denies everything when absent.
    pub confirmation: Option<Arc<dyn Confirmation>>,
}

/// How a tier ended; consumed by finalization.
struct TierEnd {
    status: RunStatus,
    stop: Option<(StopReason, String)>,
    line: String,
}

impl TierEnd {
    fn success(line: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Success,
            stop: None,
            line: line.into(),
        }
    }

    fn failure(line: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failure,
            stop: None,
            line: line.into(),
        }
    }

    fn stopped(reason: StopReason, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            status: RunStatus::Failure,
            stop: Some((reason, detail.clone())),
            line: detail,
        }
    }
}

/// Execute a run to completion and return its summary.
pub async fn run(options: RunOptions) -> Result<RunSummary, EngineError> {
    let mut engine = Engine::initialize(options)?;
    let level = engine.config.think_level;
    engine.bus.emit(RunEventKind::RunStarted {
        goal: engine.goal.clone(),
        think_level: level,
    });

    let end = match level {
        ThinkLevel::L0 => engine.run_l0().await,
        ThinkLevel::L1 => engine.run_l1().await,
        ThinkLevel::L2 => engine.run_l2().await,
        ThinkLevel::L3 => engine.run_l3().await,
    };
    let end = match end {
        Ok(end) => end,
        Err(error) => {
            // Unexpected failures roll back and finish as a failed run.
            warn!(error = %error, "engine error; rolling back");
            if let Err(e) = engine.git.rollback_to_checkpoint("HEAD") {
                warn!(error = %e, "rollback after engine error failed");
            }
            engine.bus.emit(RunEventKind::RollbackPerformed {
                target_ref: "HEAD".into(),
            });
            TierEnd::failure(error.to_string())
        }
    };
    Ok(engine.finalize(end))
}

/// Produce and persist a plan without executing it (`orc plan`).
///
/// Uses the same setup path as a full run, so the plan lands in a normal
/// run directory with its trace and effective config.
pub async fn plan_only(options: RunOptions) -> Result<orc_core::plan::Plan, EngineError> {
    let mut engine = Engine::initialize(options)?;
    engine.bus.emit(RunEventKind::RunStarted {
        goal: engine.goal.clone(),
        think_level: engine.config.think_level,
    });
    let built = engine.build_context(&engine.goal.clone())?;
    let planner = Arc::clone(&engine.roles.planner.1);
    let plan = request_plan(
        &engine.bus,
        &engine.artifacts,
        planner.as_ref(),
        &engine.goal.clone(),
        &built.fused.text,
    )
    .await?;
    let line = format!("planned {} step(s) without executing", plan.len());
    engine.finalize(TierEnd::success(line));
    Ok(plan)
}

/// One run's mutable state and wiring.
struct Engine {
    repo_root: PathBuf,
    config: OrcConfig,
    goal: String,
    run_id: String,
    artifacts: Arc<ArtifactStore>,
    manifest: Arc<ManifestHandle>,
    patches: PatchStore,
    bus: Arc<TraceBus>,
    budget: BudgetTracker,
    cost: Arc<CostTracker>,
    registry: ProviderRegistry,
    roles: RoleSet,
    git: GitGateway,
    execution: ExecutionService,
    cancel: CancellationToken,
    memory: Option<JsonMemoryStore>,
    summary: RunSummary,
    /// Diffs applied so far, concatenated into `final.diff.patch`.
    applied_diffs: Vec<String>,
    /// Files touched so far; carried over into later contexts.
    touched_files: Vec<String>,
    /// Signals injected into the next fused context (diagnoses, errors).
    signals: Vec<String>,
    /// Last checkpoint ref, for cancellation rollback.
    last_checkpoint: Option<String>,
    /// Sequence number for fused-context artifacts.
    context_seq: u32,
}

impl Engine {
    fn initialize(options: RunOptions) -> Result<Self, EngineError> {
        let RunOptions {
            repo_root,
            config,
            goal,
            run_id,
            command_line,
            cancel,
            event_tap,
            confirmation,
        } = options;

        let run_id = match run_id {
            Some(raw) => orc_core::sanitize_run_id(&raw),
            None => orc_core::new_run_id(),
        };
        let artifacts = Arc::new(ArtifactStore::create(&repo_root, &run_id)?);
        let mut bus = TraceBus::open(
            &artifacts.path("trace.jsonl"),
            &run_id,
            config.security.redaction.enabled,
        )?;
        if let Some(tap) = event_tap {
            bus = bus.with_tap(tap);
        }
        let bus = Arc::new(bus);

        let manifest = Manifest::new(
            &run_id,
            command_line,
            repo_root.display().to_string(),
            artifacts.dir().display().to_string(),
        );
        let manifest = Arc::new(ManifestHandle::new(Arc::clone(&artifacts), manifest)?);
        let patches = PatchStore::new(Arc::clone(&artifacts), Arc::clone(&manifest));

        // Reproducibility: the post-merge config snapshot is mandatory.
        artifacts.write_json(
            "effective-config.json",
            &orc_config::effective_config_json(&config),
        )?;

        let cost = Arc::new(CostTracker::new());
        let provider_configs = config
            .providers
            .iter()
            .map(|(id, entry)| (id.clone(), entry.to_provider_config(id)))
            .collect();
        let registry = ProviderRegistry::new(provider_configs, Arc::clone(&cost));
        let roles = registry.resolve_roles(
            config.defaults.planner.as_deref(),
            config.defaults.executor.as_deref(),
            config.defaults.reviewer.as_deref(),
        )?;
        for (role, id) in [
            ("planner", &roles.planner.0),
            ("executor", &roles.executor.0),
            ("reviewer", &roles.reviewer.0),
        ] {
            bus.emit(RunEventKind::ProviderSelected {
                role: role.into(),
                provider_id: id.clone(),
            });
        }

        let git = GitGateway::new(&repo_root);
        git.ensure_repo()?;
        git.ensure_ignored(".orchestrator/")?;

        let confirmation: Arc<dyn Confirmation> =
            confirmation.unwrap_or_else(|| Arc::new(DenyAll));
        let execution = ExecutionService::new(
            git.clone(),
            Arc::clone(&bus),
            ExecutionLimits {
                max_files_changed: config.patch.max_files_changed,
                max_lines_changed: config.patch.max_lines_changed,
                allow_binary: config.patch.allow_binary,
            },
            confirmation,
            config.execution.no_checkpoints,
        );

        let memory = if config.memory.enabled {
            let store_path = repo_root.join(&config.memory.storage.path);
            let mut store =
                JsonMemoryStore::new(store_path, config.memory.retrieval.stale_downrank);
            if config.memory.storage.encrypt_at_rest {
                let var = config.security.encryption.key_env.clone();
                let cipher = Cipher::from_env(&var).map_err(|_| {
                    EngineError::Config(orc_config::ConfigError::MissingEnv {
                        var,
                        what: "memory encryption at rest".into(),
                    })
                })?;
                store = store.with_cipher(cipher);
            }
            Some(store)
        } else {
            None
        };

        let budget = BudgetTracker::start(config.budget.clone(), Arc::clone(&cost));
        let summary = RunSummary::begin(&run_id, config.think_level);

        Ok(Self {
            repo_root,
            config,
            goal,
            run_id,
            artifacts,
            manifest,
            patches,
            bus,
            budget,
            cost,
            registry,
            roles,
            git,
            execution,
            cancel,
            memory,
            summary,
            applied_diffs: Vec::new(),
            touched_files: Vec::new(),
            signals: Vec::new(),
            last_checkpoint: None,
            context_seq: 0,
        })
    }

    // -- shared helpers ----------------------------------------------------

    fn check_budget(&self) -> Option<TierEnd> {
        self.budget
            .check()
            .map(|violation| TierEnd::stopped(StopReason::BudgetExceeded, violation.to_string()))
    }

    fn check_cancel(&mut self) -> Option<TierEnd> {
        if !self.cancel.is_cancelled() {
            return None;
        }
        let target = self.last_checkpoint.clone().unwrap_or_else(|| "HEAD".into());
        if let Err(e) = self.git.rollback_to_checkpoint(&target) {
            warn!(error = %e, "rollback on cancel failed");
        }
        self.bus.emit(RunEventKind::RollbackPerformed { target_ref: target });
        Some(TierEnd::stopped(StopReason::Cancelled, "run cancelled"))
    }

    fn step_state(&self, step_id: &str, state: StepState) {
        self.bus.emit(RunEventKind::StepStateChanged {
            step_id: step_id.to_string(),
            state,
        });
    }

    /// Build and persist a fused context for `query`.
    fn build_context(&mut self, query: &str) -> Result<BuiltContext, EngineError> {
        let memory_paragraphs = match &self.memory {
            Some(store) => match store.search(query, self.config.memory.retrieval.top_k) {
                Ok(hits) => hits.iter().map(|h| h.to_context_paragraph()).collect(),
                Err(e) => {
                    debug!(error = %e, "memory search failed");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let builder = ContextBuilder::new(
            &self.repo_root,
            BuildOptions {
                token_budget: self.config.context.token_budget,
                exclude: self.config.context.exclude.clone(),
                rg_path: self.config.context.rg_path.clone(),
                ..Default::default()
            },
        );
        let built = builder.build(
            &self.goal,
            query,
            &self.touched_files,
            &memory_paragraphs,
            &self.signals,
        )?;
        if let Some(error) = &built.semantic_error {
            self.bus.emit(RunEventKind::SemanticSearchFailed {
                error: error.clone(),
            });
        }

        let seq = self.context_seq;
        self.context_seq += 1;
        let json_rel = format!("fused_context_{seq}.json");
        let txt_rel = format!("fused_context_{seq}.txt");
        self.artifacts.write_json(&json_rel, &built.items)?;
        self.artifacts.write_text(&txt_rel, &built.fused.text)?;
        self.manifest.update(|m| {
            m.push_context_path(&json_rel);
            m.push_context_path(&txt_rel);
        })?;
        Ok(built)
    }

    fn tool_policy(&self) -> ToolPolicy {
        let tools = &self.config.execution.tools;
        ToolPolicy {
            require_confirmation: tools.require_confirmation,
            network: if tools.network_policy == "allow" {
                NetworkPolicy::Allow
            } else {
                NetworkPolicy::Deny
            },
            allow_shell: tools.allow_shell,
            allow_prefixes: tools.allow_prefixes.clone(),
            deny_prefixes: tools.deny_prefixes.clone(),
            timeout: Duration::from_millis(tools.timeout_ms),
            max_output_bytes: tools.max_output_bytes,
        }
    }

    fn verification_commands(&self) -> Vec<VerifyCommand> {
        if !self.config.verification.enabled || !self.config.execution.tools.enabled {
            return Vec::new();
        }
        match self.config.verification.mode {
            VerificationMode::Custom => self
                .config
                .verification
                .steps
                .iter()
                .map(|s| VerifyCommand::new(&s.name, &s.command))
                .collect(),
            VerificationMode::Auto => {
                let auto = &self.config.verification.auto;
                derive_commands(
                    &self.repo_root,
                    &DeriveOptions {
                        enable_lint: auto.enable_lint,
                        enable_typecheck: auto.enable_typecheck,
                        enable_tests: auto.enable_tests,
                        test_scope: auto.test_scope.clone(),
                        touched_files: self.touched_files.clone(),
                        max_commands: auto.max_commands_per_iteration,
                    },
                )
            }
        }
    }

    fn verification_runner(&self) -> VerificationRunner {
        VerificationRunner::new(
            &self.repo_root,
            self.artifacts.path("tool_logs"),
            "tool_logs",
            self.tool_policy(),
        )
    }

    /// Run one verification pass, record events, logs, and the report.
    async fn verify(&mut self, iteration: u32, tag: &str) -> Result<orc_core::verify::VerificationReport, EngineError> {
        let commands = self.verification_commands();
        self.bus.emit(RunEventKind::VerificationStarted {
            iteration,
            command_count: commands.len(),
        });
        for _ in &commands {
            self.budget.record_tool();
        }
        let outcome = self.verification_runner().run(&commands, tag).await;
        self.bus.emit(RunEventKind::VerificationFinished {
            iteration,
            passed: outcome.report.passed,
            failure_signature: outcome.report.failure_signature.clone(),
        });
        let report_rel = format!("verification/{tag}_report.json");
        self.artifacts.write_json(&report_rel, &outcome.report)?;
        self.manifest.update(|m| {
            m.push_verification_path(&report_rel);
            for path in &outcome.log_paths {
                m.push_tool_log_path(path);
            }
        })?;
        self.summary.report_paths.push(report_rel);
        Ok(outcome.report)
    }

    /// The failing tail used for repair prompts and memory queries.
    fn failure_tail(&self, report: &orc_core::verify::VerificationReport) -> String {
        let mut parts = Vec::new();
        for check in report.checks.iter().filter(|c| !c.passed) {
            let body = std::fs::read_to_string(self.artifacts.path(&check.stderr_path))
                .or_else(|_| std::fs::read_to_string(self.artifacts.path(&check.stdout_path)))
                .unwrap_or_default();
            parts.push(format!(
                "{} (exit {}):\n{}",
                check.name,
                check.exit_code,
                orc_core::verify::normalize_output_tail(&body)
            ));
        }
        parts.join("\n\n")
    }

    // -- L0 ----------------------------------------------------------------

    async fn run_l0(&mut self) -> Result<TierEnd, EngineError> {
        let built = self.build_context(&self.goal.clone())?;
        if let Some(end) = self.check_budget() {
            return Ok(end);
        }

        let executor = Arc::clone(&self.roles.executor.1);
        let prompt = prompts::executor(&self.goal, &built.fused.text, None);
        let response = match executor.generate(GenerateRequest::prompt(prompt)).await {
            Ok(response) => response,
            Err(error) => {
                self.bus.emit(RunEventKind::ProviderCallFailed {
                    provider_id: self.roles.executor.0.clone(),
                    error: error.to_string(),
                });
                return Ok(TierEnd::failure(format!("executor call failed: {error}")));
            }
        };

        let Some(diff) = extract_diff(&response.text) else {
            return Ok(TierEnd::failure(
                "executor output contained no extractable diff",
            ));
        };
        self.patches.save_candidate(0, 0, &diff)?;
        self.patches.save_selected(0, &diff)?;

        let outcome = self.execution.apply("1", &diff).await;
        if !outcome.success {
            return Ok(TierEnd::failure(format!(
                "patch apply failed: {}",
                outcome.error.unwrap_or_default()
            )));
        }
        self.last_checkpoint = outcome.checkpoint;
        self.applied_diffs.push(diff);
        self.touched_files.extend(outcome.files_changed);
        self.summary.steps_completed = 1;
        Ok(TierEnd::success("L0 single-shot change applied"))
    }

    // -- L1 ----------------------------------------------------------------

    async fn run_l1(&mut self) -> Result<TierEnd, EngineError> {
        let (end, _) = self.run_planned().await?;
        Ok(end)
    }

    /// Planned execution shared by L1, L2 (first phase), and L3's plan
    /// handling. Returns the tier end plus whether any apply failure
    /// pattern was left unresolved (used by L2's escalation counters).
    async fn run_planned(&mut self) -> Result<(TierEnd, u32), EngineError> {
        let planner = Arc::clone(&self.roles.planner.1);
        let built = self.build_context(&self.goal.clone())?;
        let plan = request_plan(
            &self.bus,
            &self.artifacts,
            planner.as_ref(),
            &self.goal.clone(),
            &built.fused.text,
        )
        .await?;
        if plan.is_empty() {
            return Ok((
                TierEnd::failure("Planning failed to produce any steps."),
                0,
            ));
        }

        let executor = Arc::clone(&self.roles.executor.1);
        let reviewer = Arc::clone(&self.roles.reviewer.1);
        let mut consecutive_invalid: u32 = 0;
        let mut apply_failures: u32 = 0;
        let mut last_apply_key: Option<String> = None;

        for (step_index, step) in plan.steps.clone().into_iter().enumerate() {
            if let Some(end) = self.check_cancel() {
                return Ok((end, apply_failures));
            }
            if let Some(end) = self.check_budget() {
                return Ok((end, apply_failures));
            }
            self.step_state(&step.id, StepState::Pending);

            let built = self.build_context(&step.step)?;
            let mut error_hint: Option<String> = None;
            let mut applied = false;

            for attempt in 0..2u32 {
                if let Some(end) = self.check_budget() {
                    return Ok((end, apply_failures));
                }
                self.budget.record_iteration();
                self.summary.iterations = self.budget.iterations();
                self.step_state(&step.id, StepState::Generating);

                let prompt =
                    prompts::executor(&step.step, &built.fused.text, error_hint.as_deref());
                let response = match executor.generate(GenerateRequest::prompt(prompt)).await {
                    Ok(response) => response,
                    Err(error) => {
                        self.bus.emit(RunEventKind::ProviderCallFailed {
                            provider_id: self.roles.executor.0.clone(),
                            error: error.to_string(),
                        });
                        error_hint = Some(error.to_string());
                        consecutive_invalid += 1;
                        if consecutive_invalid >= INVALID_OUTPUT_THRESHOLD {
                            self.step_state(&step.id, StepState::Failed);
                            return Ok((
                                TierEnd::stopped(
                                    StopReason::InvalidOutput,
                                    "executor produced no usable output twice in a row",
                                ),
                                apply_failures,
                            ));
                        }
                        continue;
                    }
                };

                let Some(mut patch) = extract_diff(&response.text) else {
                    consecutive_invalid += 1;
                    if consecutive_invalid >= INVALID_OUTPUT_THRESHOLD {
                        self.step_state(&step.id, StepState::Failed);
                        return Ok((
                            TierEnd::stopped(
                                StopReason::InvalidOutput,
                                "executor produced no extractable diff twice in a row",
                            ),
                            apply_failures,
                        ));
                    }
                    error_hint =
                        Some("your reply contained no extractable unified diff".into());
                    continue;
                };
                consecutive_invalid = 0;
                self.patches
                    .save_candidate(step_index as u32, attempt as usize, &patch)?;

                if self.config.execution.review_loop.enabled {
                    let outcome = run_review_loop(
                        &self.artifacts,
                        &self.execution,
                        executor.as_ref(),
                        reviewer.as_ref(),
                        step_index + 1,
                        &step.step,
                        patch.clone(),
                        self.config.execution.review_loop.max_reviews,
                    )
                    .await;
                    patch = outcome.patch;
                }
                self.patches.save_selected(step_index as u32, &patch)?;

                self.step_state(&step.id, StepState::Applying);
                let outcome = self.execution.apply(&step.id, &patch).await;
                if outcome.success {
                    self.step_state(&step.id, StepState::Applied);
                    self.last_checkpoint = outcome.checkpoint.or(self.last_checkpoint.take());
                    self.applied_diffs.push(patch);
                    for file in outcome.files_changed {
                        if !self.touched_files.contains(&file) {
                            self.touched_files.push(file);
                        }
                    }
                    self.summary.steps_completed += 1;
                    apply_failures = 0;
                    last_apply_key = None;
                    applied = true;
                    break;
                }

                let error_text = outcome.error.unwrap_or_default();
                let key = error_key(&error_text);
                if last_apply_key.as_deref() == Some(key.as_str()) {
                    apply_failures += 1;
                } else {
                    apply_failures = 1;
                    last_apply_key = Some(key);
                }
                if apply_failures >= REPEATED_FAILURE_THRESHOLD {
                    self.step_state(&step.id, StepState::Failed);
                    return Ok((
                        TierEnd::stopped(
                            StopReason::RepeatedFailure,
                            format!("same apply error twice in a row: {error_text}"),
                        ),
                        apply_failures,
                    ));
                }
                error_hint = Some(error_text);
            }

            if !applied {
                self.step_state(&step.id, StepState::Failed);
            }
        }

        let total = plan.len();
        let done = self.summary.steps_completed;
        if done == total {
            Ok((
                TierEnd::success(format!("completed {done} of {total} planned steps")),
                apply_failures,
            ))
        } else {
            Ok((
                TierEnd::failure(format!("completed {done} of {total} planned steps")),
                apply_failures,
            ))
        }
    }

    // -- L2 ----------------------------------------------------------------

    async fn run_l2(&mut self) -> Result<TierEnd, EngineError> {
        let (l1_end, mut apply_failures) = self.run_planned().await?;
        if l1_end.stop.is_some() {
            // Budget (or another stop) already ends the run.
            return Ok(l1_end);
        }
        if self.summary.steps_completed == 0 {
            return Ok(l1_end);
        }
        let commands = self.verification_commands();
        if commands.is_empty() {
            info!("no verification commands; returning planned result");
            return Ok(l1_end);
        }

        let mut report = self.verify(0, "iter_0").await?;
        if report.passed {
            return Ok(TierEnd::success("L2 Verified Success after 0 iterations"));
        }

        let executor = Arc::clone(&self.roles.executor.1);
        let mut previous_signature = report.failure_signature.clone();
        let mut same_signature_count: u32 = 0;
        let mut consecutive_invalid: u32 = 0;

        for iteration in 1..=MAX_REPAIR_ITERATIONS {
            if let Some(end) = self.check_cancel() {
                return Ok(end);
            }
            if let Some(end) = self.check_budget() {
                return Ok(end);
            }

            // Escalation wins over giving up when it is enabled.
            let escalation = &self.config.escalation;
            if escalation.enabled
                && self.summary.escalation_count < escalation.max_escalations
                && (same_signature_count >= escalation.to_l3_after_non_improving_iterations
                    || apply_failures >= escalation.to_l3_after_patch_apply_failures)
            {
                self.bus.emit(RunEventKind::RunEscalated {
                    from: ThinkLevel::L2,
                    to: ThinkLevel::L3,
                    reason: format!(
                        "{same_signature_count} non-improving iterations, {apply_failures} apply failures"
                    ),
                });
                self.summary.escalation_count += 1;
                self.summary.final_think_level = ThinkLevel::L3;
                return self.run_l3().await;
            }
            if same_signature_count >= NON_IMPROVING_THRESHOLD {
                return Ok(TierEnd::stopped(
                    StopReason::NonImproving,
                    "verification failure signature unchanged for two consecutive iterations",
                ));
            }

            self.budget.record_iteration();
            self.summary.iterations = self.budget.iterations();

            let failure_tail = self.failure_tail(&report);
            if let Some(memory) = &self.memory {
                if let Ok(hits) = memory.search(&failure_tail, self.config.memory.retrieval.top_k)
                {
                    for hit in hits {
                        let paragraph = hit.to_context_paragraph();
                        if !self.signals.contains(&paragraph) {
                            self.signals.push(paragraph);
                        }
                    }
                }
            }

            let built = self.build_context(&self.goal.clone())?;
            let prompt = prompts::repair(&self.goal, &built.fused.text, &failure_tail);
            let response = match executor.generate(GenerateRequest::prompt(prompt)).await {
                Ok(response) => response,
                Err(error) => {
                    self.bus.emit(RunEventKind::ProviderCallFailed {
                        provider_id: self.roles.executor.0.clone(),
                        error: error.to_string(),
                    });
                    consecutive_invalid += 1;
                    if consecutive_invalid >= INVALID_OUTPUT_THRESHOLD {
                        return Ok(TierEnd::stopped(
                            StopReason::InvalidOutput,
                            "repair executor produced no usable output twice in a row",
                        ));
                    }
                    continue;
                }
            };

            if let Some(patch) = extract_diff(&response.text) {
                consecutive_invalid = 0;
                self.patches.save_candidate(iteration, 0, &patch)?;
                self.patches.save_selected(iteration, &patch)?;
                let outcome = self.execution.apply(&format!("repair-{iteration}"), &patch).await;
                if outcome.success {
                    self.last_checkpoint = outcome.checkpoint.or(self.last_checkpoint.take());
                    self.applied_diffs.push(patch);
                    for file in outcome.files_changed {
                        if !self.touched_files.contains(&file) {
                            self.touched_files.push(file);
                        }
                    }
                    apply_failures = 0;
                } else {
                    apply_failures += 1;
                }
                // Partial-success path: verify even when the apply failed.
            } else {
                consecutive_invalid += 1;
                if consecutive_invalid >= INVALID_OUTPUT_THRESHOLD {
                    return Ok(TierEnd::stopped(
                        StopReason::InvalidOutput,
                        "repair executor produced no extractable diff twice in a row",
                    ));
                }
            }

            report = self.verify(iteration, &format!("iter_{iteration}")).await?;
            if report.passed {
                return Ok(TierEnd::success(format!(
                    "L2 Verified Success after {iteration} iterations"
                )));
            }
            if report.failure_signature == previous_signature {
                same_signature_count += 1;
            } else {
                same_signature_count = 0;
                previous_signature = report.failure_signature.clone();
            }
        }

        Ok(TierEnd::failure(format!(
            "verification still failing after {MAX_REPAIR_ITERATIONS} repair iterations"
        )))
    }

    // -- L3 ----------------------------------------------------------------

    async fn run_l3(&mut self) -> Result<TierEnd, EngineError> {
        let planner = Arc::clone(&self.roles.planner.1);
        let built = self.build_context(&self.goal.clone())?;
        let plan = request_plan(
            &self.bus,
            &self.artifacts,
            planner.as_ref(),
            &self.goal.clone(),
            &built.fused.text,
        )
        .await?;
        if plan.is_empty() {
            return Ok(TierEnd::failure("Planning failed to produce any steps."));
        }

        let executor_id = self.roles.executor.0.clone();
        let executor = Arc::clone(&self.roles.executor.1);
        let reviewer_id = self.roles.reviewer.0.clone();
        let reviewer = Arc::clone(&self.roles.reviewer.1);
        let concurrent = self.registry.supports_concurrency(&executor_id);
        let best_of_n = self.config.l3.best_of_n;
        let commands = self.verification_commands();

        let mut consecutive_invalid: u32 = 0;
        let mut apply_failures: u32 = 0;
        let mut last_apply_key: Option<String> = None;
        let steps_done_before = self.summary.steps_completed;

        for (step_index, step) in plan.steps.clone().into_iter().enumerate() {
            if let Some(end) = self.check_cancel() {
                return Ok(end);
            }
            if let Some(end) = self.check_budget() {
                return Ok(end);
            }
            self.step_state(&step.id, StepState::Pending);

            // One extra round is allowed after a diagnosis resets the
            // apply-failure counter.
            let mut rounds_left = 2u32;
            let mut step_applied = false;
            while rounds_left > 0 && !step_applied {
                rounds_left -= 1;
                if let Some(end) = self.check_budget() {
                    return Ok(end);
                }
                self.budget.record_iteration();
                self.summary.iterations = self.budget.iterations();
                self.step_state(&step.id, StepState::Generating);

                let built = self.build_context(&step.step)?;
                let iter = step_index as u32;
                let prompt = prompts::executor(&step.step, &built.fused.text, None);
                let candidates = candidates::generate_candidates(
                    &self.bus,
                    &self.patches,
                    &executor_id,
                    Arc::clone(&executor),
                    concurrent,
                    best_of_n,
                    &prompt,
                    iter,
                )
                .await?;

                if candidates.iter().all(|c| !c.valid) {
                    consecutive_invalid += 1;
                    if consecutive_invalid >= INVALID_OUTPUT_THRESHOLD {
                        self.step_state(&step.id, StepState::Failed);
                        return Ok(TierEnd::stopped(
                            StopReason::InvalidOutput,
                            "no candidate produced an extractable diff twice in a row",
                        ));
                    }
                    continue;
                }
                consecutive_invalid = 0;

                self.step_state(&step.id, StepState::Verifying);
                let runner = self.verification_runner();
                for _ in 0..(commands.len() * candidates.iter().filter(|c| c.valid).count()) {
                    self.budget.record_tool();
                }
                let evaluations = candidates::evaluate_candidates(
                    &self.bus,
                    &self.artifacts,
                    &self.manifest,
                    &self.git,
                    &runner,
                    &commands,
                    &candidates,
                    iter,
                )
                .await?;

                let reviewer_opt = if self.config.l3.enable_reviewer {
                    Some((reviewer_id.as_str(), reviewer.as_ref()))
                } else {
                    None
                };
                let selection = candidates::select_candidate(
                    &self.artifacts,
                    reviewer_opt,
                    self.config.l3.enable_judge,
                    &step.step,
                    &candidates,
                    &evaluations,
                    iter,
                )
                .await?;
                if selection.judge_invoked {
                    self.summary.judge_invoked = true;
                    self.summary.judge_invocation_reason = selection.judge_reason.clone();
                }

                let Some(selected_index) = selection.index else {
                    self.step_state(&step.id, StepState::Failed);
                    continue;
                };
                let patch = candidates
                    .iter()
                    .find(|c| c.index == selected_index)
                    .and_then(|c| c.patch.clone())
                    .unwrap_or_default();
                self.patches.save_selected(iter, &patch)?;
                self.summary.passing_candidate_selected |= selection.passing;

                self.step_state(&step.id, StepState::Applying);
                let outcome = self.execution.apply(&step.id, &patch).await;
                if outcome.success {
                    self.step_state(&step.id, StepState::Applied);
                    self.last_checkpoint = outcome.checkpoint.or(self.last_checkpoint.take());
                    self.applied_diffs.push(patch);
                    for file in outcome.files_changed {
                        if !self.touched_files.contains(&file) {
                            self.touched_files.push(file);
                        }
                    }
                    self.summary.steps_completed += 1;
                    apply_failures = 0;
                    last_apply_key = None;
                    step_applied = true;

                    if !commands.is_empty() {
                        let report = self
                            .verify(iter, &format!("iter_{iter}_final"))
                            .await?;
                        if !report.passed {
                            debug!(step = %step.id, "final verification failing after apply");
                        }
                    }
                    break;
                }

                // Apply failed: track the repeated-failure pattern and let
                // the diagnoser reset it when configured.
                let error_text = outcome.error.unwrap_or_default();
                let key = error_key(&error_text);
                if last_apply_key.as_deref() == Some(key.as_str()) {
                    apply_failures += 1;
                } else {
                    apply_failures = 1;
                    last_apply_key = Some(key);
                }
                let diagnosis_config = &self.config.l3.diagnosis;
                if diagnosis_config.enabled
                    && apply_failures >= diagnosis_config.trigger_on_repeated_failures
                {
                    if let Some(hypothesis) = diagnose::diagnose(
                        &self.bus,
                        &self.artifacts,
                        reviewer.as_ref(),
                        &built.fused.text,
                        &error_text,
                        iter,
                    )
                    .await
                    {
                        self.signals
                            .push(format!("diagnosis: {}", hypothesis.hypothesis));
                    }
                    apply_failures = 0;
                    last_apply_key = None;
                    rounds_left += 1;
                } else if apply_failures >= REPEATED_FAILURE_THRESHOLD {
                    self.step_state(&step.id, StepState::Failed);
                    return Ok(TierEnd::stopped(
                        StopReason::RepeatedFailure,
                        format!("same apply error twice in a row: {error_text}"),
                    ));
                }
            }

            if !step_applied {
                self.step_state(&step.id, StepState::Failed);
            }
        }

        let done = self.summary.steps_completed - steps_done_before;
        let total = plan.len();
        if done == total {
            Ok(TierEnd::success(format!(
                "L3 best-of-{best_of_n} completed {done} of {total} steps"
            )))
        } else {
            Ok(TierEnd::failure(format!(
                "L3 best-of-{best_of_n} completed {done} of {total} steps"
            )))
        }
    }

    // -- finalization ------------------------------------------------------

    fn finalize(mut self, end: TierEnd) -> RunSummary {
        if let Some((reason, detail)) = &end.stop {
            self.summary.stop_reason = Some(*reason);
            self.bus.emit(RunEventKind::RunStopped {
                reason: *reason,
                detail: detail.clone(),
            });
        }

        if !self.applied_diffs.is_empty() {
            let combined = self.applied_diffs.join("\n");
            if let Err(e) = self.patches.save_final(&combined) {
                warn!(error = %e, "failed to persist final diff");
            }
        }

        self.summary.cost = self.cost.totals();
        self.summary.iterations = self.budget.iterations();
        self.summary.finish(end.status, end.line);

        if let Err(e) = self.artifacts.write_json("summary.json", &self.summary) {
            warn!(error = %e, "failed to persist summary");
        }
        if let Err(e) = self.manifest.update(|_| {}) {
            warn!(error = %e, "failed to persist final manifest");
        }

        // RunFinished is flushed by the bus before emit returns; it is
        // always the last record.
        self.bus.emit(RunEventKind::RunFinished {
            status: self.summary.status,
            summary: self.summary.summary.clone(),
        });

        // Episodic memory: failures are swallowed.
        if let Some(memory) = &self.memory {
            if self.config.memory.write_policy.enabled
                && self.config.memory.write_policy.store_episodes
            {
                let record = EpisodeRecord {
                    id: self.run_id.clone(),
                    created_at: chrono::Utc::now(),
                    goal: self.goal.clone(),
                    summary: self.summary.summary.clone(),
                    status: match self.summary.status {
                        RunStatus::Success => "success".into(),
                        RunStatus::Failure => "failure".into(),
                    },
                    failure_signature: None,
                    artifact_paths: self.manifest.snapshot().patch_paths,
                };
                if let Err(e) = memory.write_episode(&record) {
                    debug!(error = %e, "episodic memory write failed (ignored)");
                }
            }
        }

        info!(
            run_id = %self.run_id,
            status = ?self.summary.status,
            steps = self.summary.steps_completed,
            "run finished"
        );
        self.summary
    }
}
