// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `.orchestrator.yaml` schema.
//!
//! Every section derives `Default` so an empty file is a valid config, and
//! every struct denies unknown keys so validation is total. Keys accept
//! both snake_case and the camelCase spellings used by older configs.

use orc_core::cost::Pricing;
use orc_core::provider::ProviderConfig;
use orc_core::{Budget, ThinkLevel};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct OrcConfig {
    /// Config schema version.
    #[serde(default = "default_config_version", alias = "configVersion")]
    pub config_version: u32,

    /// Default think level when `--think` is not given.
    #[serde(default = "default_think_level", alias = "thinkLevel")]
    pub think_level: ThinkLevel,

    /// Named provider definitions.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderEntry>,

    /// Role → provider id defaults.
    #[serde(default)]
    pub defaults: RoleDefaults,

    /// Run budget ceilings.
    #[serde(default)]
    pub budget: Budget,

    /// Context builder settings.
    #[serde(default)]
    pub context: ContextConfig,

    /// Repository indexing settings.
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Memory subsystem settings.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Patch applier ceilings.
    #[serde(default)]
    pub patch: PatchConfig,

    /// Execution service settings.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Verification runner settings.
    #[serde(default)]
    pub verification: VerificationConfig,

    /// L3 candidate generation settings.
    #[serde(default)]
    pub l3: L3Config,

    /// L2 → L3 escalation policy.
    #[serde(default)]
    pub escalation: EscalationConfig,

    /// Redaction and encryption settings.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Telemetry switches.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for OrcConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            think_level: default_think_level(),
            providers: BTreeMap::new(),
            defaults: RoleDefaults::default(),
            budget: Budget::default(),
            context: ContextConfig::default(),
            indexing: IndexingConfig::default(),
            memory: MemoryConfig::default(),
            patch: PatchConfig::default(),
            execution: ExecutionConfig::default(),
            verification: VerificationConfig::default(),
            l3: L3Config::default(),
            escalation: EscalationConfig::default(),
            security: SecurityConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// One provider definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ProviderEntry {
    /// Adapter type: `mock`, `command`, `openai`, `anthropic`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Model identifier passed through to the adapter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Subprocess command line (`command` adapters).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// API base URL override (HTTP adapters).
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "baseUrl")]
    pub base_url: Option<String>,
    /// Inline API key. Prefer `api_key_env`.
    #[serde(default, skip_serializing, alias = "apiKey")]
    pub api_key: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "apiKeyEnv")]
    pub api_key_env: Option<String>,
    /// Unit pricing for cost estimation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PricingEntry>,
    /// Advertised capabilities (`"stream"`, `"concurrent"`).
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Scripted responses for `mock` adapters (used by the eval harness).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responses: Vec<String>,
}

impl ProviderEntry {
    /// Convert to the contract type the registry consumes.
    pub fn to_provider_config(&self, id: &str) -> ProviderConfig {
        ProviderConfig {
            id: id.to_string(),
            kind: self.kind.clone(),
            model: self.model.clone(),
            command: self.command.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            pricing: self.pricing.map(|p| p.into()),
            capabilities: self.capabilities.clone(),
            responses: self.responses.clone(),
        }
    }
}

/// Per-MTok unit prices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PricingEntry {
    /// USD per million input tokens.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "inputPerMTokUsd")]
    pub input_per_mtok_usd: Option<f64>,
    /// USD per million output tokens.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "outputPerMTokUsd")]
    pub output_per_mtok_usd: Option<f64>,
}

impl From<PricingEntry> for Pricing {
    fn from(p: PricingEntry) -> Self {
        Pricing {
            input_per_mtok_usd: p.input_per_mtok_usd,
            output_per_mtok_usd: p.output_per_mtok_usd,
        }
    }
}

/// Role → provider id defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RoleDefaults {
    /// Provider used for planning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planner: Option<String>,
    /// Provider used for diff generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<String>,
    /// Provider used for review, ranking, judging, diagnosis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
}

/// Context builder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ContextConfig {
    /// Token budget for the packed snippet set.
    #[serde(default = "default_token_budget", alias = "tokenBudget")]
    pub token_budget: usize,
    /// Glob patterns excluded from scanning and search.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Explicit ripgrep binary path; `rg` from PATH otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "rgPath")]
    pub rg_path: Option<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            exclude: Vec::new(),
            rg_path: None,
        }
    }
}

/// Repository indexing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct IndexingConfig {
    /// Master switch.
    #[serde(default)]
    pub enabled: bool,
    /// Index directory, relative to the repo root.
    #[serde(default = "default_index_path")]
    pub path: String,
    /// Refresh the index at run start.
    #[serde(default, alias = "autoUpdateOnRun")]
    pub auto_update_on_run: bool,
    /// Cap on files re-indexed per auto-update.
    #[serde(default = "default_max_auto_update_files", alias = "maxAutoUpdateFiles")]
    pub max_auto_update_files: usize,
    /// Semantic neighbor search settings.
    #[serde(default)]
    pub semantic: SemanticConfig,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_index_path(),
            auto_update_on_run: false,
            max_auto_update_files: default_max_auto_update_files(),
            semantic: SemanticConfig::default(),
        }
    }
}

/// Semantic neighbor search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SemanticConfig {
    /// Whether semantic search participates in context building.
    #[serde(default)]
    pub enabled: bool,
    /// Neighbors fetched per query.
    #[serde(default = "default_top_k", alias = "topK")]
    pub top_k: usize,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            top_k: default_top_k(),
        }
    }
}

/// Memory subsystem settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// Master switch.
    #[serde(default)]
    pub enabled: bool,
    /// Retrieval tuning.
    #[serde(default)]
    pub retrieval: MemoryRetrieval,
    /// Write policy.
    #[serde(default, alias = "writePolicy")]
    pub write_policy: MemoryWritePolicy,
    /// Storage location and at-rest options.
    #[serde(default)]
    pub storage: MemoryStorage,
    /// Embedder provider id for semantic memory, when configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedder: Option<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retrieval: MemoryRetrieval::default(),
            write_policy: MemoryWritePolicy::default(),
            storage: MemoryStorage::default(),
            embedder: None,
        }
    }
}

/// Memory retrieval tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MemoryRetrieval {
    /// Hits returned per search.
    #[serde(default = "default_top_k", alias = "topK")]
    pub top_k: usize,
    /// Downrank factor applied to stale episodes.
    #[serde(default = "default_stale_downrank", alias = "staleDownrank")]
    pub stale_downrank: f64,
}

impl Default for MemoryRetrieval {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            stale_downrank: default_stale_downrank(),
        }
    }
}

/// Memory write policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MemoryWritePolicy {
    /// Whether writes are permitted at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether episodic run records are stored.
    #[serde(default = "default_true", alias = "storeEpisodes")]
    pub store_episodes: bool,
}

impl Default for MemoryWritePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            store_episodes: true,
        }
    }
}

/// Memory storage location and at-rest options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MemoryStorage {
    /// Store path, relative to the repo root.
    #[serde(default = "default_memory_path")]
    pub path: String,
    /// Encrypt episode payloads with the configured key env.
    #[serde(default, alias = "encryptAtRest")]
    pub encrypt_at_rest: bool,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self {
            path: default_memory_path(),
            encrypt_at_rest: false,
        }
    }
}

/// Patch applier ceilings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PatchConfig {
    /// Maximum files one patch may touch.
    #[serde(default = "default_max_files_changed", alias = "maxFilesChanged")]
    pub max_files_changed: usize,
    /// Maximum added + deleted lines per patch.
    #[serde(default = "default_max_lines_changed", alias = "maxLinesChanged")]
    pub max_lines_changed: usize,
    /// Whether binary file sections are tolerated.
    #[serde(default, alias = "allowBinary")]
    pub allow_binary: bool,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            max_files_changed: default_max_files_changed(),
            max_lines_changed: default_max_lines_changed(),
            allow_binary: false,
        }
    }
}

/// Execution service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Tool sandbox settings.
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Review loop settings.
    #[serde(default, alias = "reviewLoop")]
    pub review_loop: ReviewLoopConfig,
    /// Disable checkpoint creation after successful applies.
    #[serde(default, alias = "noCheckpoints")]
    pub no_checkpoints: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            tools: ToolsConfig::default(),
            review_loop: ReviewLoopConfig::default(),
            no_checkpoints: false,
        }
    }
}

/// Tool sandbox settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ToolsConfig {
    /// Whether verification tools may run at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Require confirmation before each tool command.
    #[serde(default, alias = "requireConfirmation")]
    pub require_confirmation: bool,
    /// `allow` or `deny` network access for tool subprocesses.
    #[serde(default = "default_network_policy", alias = "networkPolicy")]
    pub network_policy: String,
    /// Permit arbitrary shell commands in custom verification steps.
    #[serde(default, alias = "allowShell")]
    pub allow_shell: bool,
    /// Command-prefix allowlist; empty means "derived commands only".
    #[serde(default)]
    pub allow_prefixes: Vec<String>,
    /// Command-prefix denylist; wins over the allowlist.
    #[serde(default)]
    pub deny_prefixes: Vec<String>,
    /// Per-command timeout in milliseconds.
    #[serde(default = "default_tool_timeout_ms", alias = "timeoutMs")]
    pub timeout_ms: u64,
    /// Per-stream output ceiling in bytes.
    #[serde(default = "default_max_output_bytes", alias = "maxOutputBytes")]
    pub max_output_bytes: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            require_confirmation: false,
            network_policy: default_network_policy(),
            allow_shell: false,
            allow_prefixes: Vec::new(),
            deny_prefixes: Vec::new(),
            timeout_ms: default_tool_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

/// Review loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ReviewLoopConfig {
    /// Whether the reviewer gate runs after each step.
    #[serde(default)]
    pub enabled: bool,
    /// Maximum reviewer/executor rounds per step.
    #[serde(default = "default_max_reviews", alias = "maxReviews")]
    pub max_reviews: u32,
}

impl Default for ReviewLoopConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_reviews: default_max_reviews(),
        }
    }
}

/// Verification mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    /// Derive lint/typecheck/test commands from the detected ecosystem.
    Auto,
    /// Run exactly the configured `steps`.
    Custom,
}

/// Verification runner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct VerificationConfig {
    /// Whether verification runs at all (L2/L3).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Command selection mode.
    #[serde(default = "default_verification_mode")]
    pub mode: VerificationMode,
    /// Custom steps (`mode: custom`).
    #[serde(default)]
    pub steps: Vec<VerificationStep>,
    /// Auto-derivation switches.
    #[serde(default)]
    pub auto: AutoVerification,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: default_verification_mode(),
            steps: Vec::new(),
            auto: AutoVerification::default(),
        }
    }
}

/// One custom verification step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct VerificationStep {
    /// Stable check name.
    pub name: String,
    /// Command line to run.
    pub command: String,
}

/// Auto-derivation switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AutoVerification {
    /// Include the ecosystem's lint command.
    #[serde(default = "default_true", alias = "enableLint")]
    pub enable_lint: bool,
    /// Include the ecosystem's typecheck command.
    #[serde(default = "default_true", alias = "enableTypecheck")]
    pub enable_typecheck: bool,
    /// Include the ecosystem's test command.
    #[serde(default = "default_true", alias = "enableTests")]
    pub enable_tests: bool,
    /// `all` or `touched` test scoping.
    #[serde(default = "default_test_scope", alias = "testScope")]
    pub test_scope: String,
    /// Cap on commands per verification pass.
    #[serde(
        default = "default_max_commands",
        alias = "maxCommandsPerIteration"
    )]
    pub max_commands_per_iteration: usize,
}

impl Default for AutoVerification {
    fn default() -> Self {
        Self {
            enable_lint: true,
            enable_typecheck: true,
            enable_tests: true,
            test_scope: default_test_scope(),
            max_commands_per_iteration: default_max_commands(),
        }
    }
}

/// L3 candidate generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct L3Config {
    /// Candidates generated per step.
    #[serde(default = "default_best_of_n", alias = "bestOfN")]
    pub best_of_n: usize,
    /// Whether the judge may break ties.
    #[serde(default = "default_true", alias = "enableJudge")]
    pub enable_judge: bool,
    /// Whether the reviewer ranks candidate batches.
    #[serde(default = "default_true", alias = "enableReviewer")]
    pub enable_reviewer: bool,
    /// Diagnosis settings.
    #[serde(default)]
    pub diagnosis: DiagnosisConfig,
}

impl Default for L3Config {
    fn default() -> Self {
        Self {
            best_of_n: default_best_of_n(),
            enable_judge: true,
            enable_reviewer: true,
            diagnosis: DiagnosisConfig::default(),
        }
    }
}

/// Diagnosis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DiagnosisConfig {
    /// Whether the diagnoser runs on repeated failures.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Same-signature failures that trigger diagnosis.
    #[serde(
        default = "default_diagnosis_trigger",
        alias = "triggerOnRepeatedFailures"
    )]
    pub trigger_on_repeated_failures: u32,
    /// Cap on tree-of-thought branches explored.
    #[serde(default = "default_max_tot_branches", alias = "maxToTBranches")]
    pub max_tot_branches: usize,
}

impl Default for DiagnosisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_on_repeated_failures: default_diagnosis_trigger(),
            max_tot_branches: default_max_tot_branches(),
        }
    }
}

/// L2 → L3 escalation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EscalationConfig {
    /// Whether escalation is permitted.
    #[serde(default)]
    pub enabled: bool,
    /// Cap on escalations per run.
    #[serde(default = "default_max_escalations", alias = "maxEscalations")]
    pub max_escalations: u32,
    /// Non-improving iterations before L2 hands off to L3.
    #[serde(
        default = "default_escalation_iterations",
        alias = "toL3AfterNonImprovingIterations"
    )]
    pub to_l3_after_non_improving_iterations: u32,
    /// Consecutive apply failures before L2 hands off to L3.
    #[serde(
        default = "default_escalation_apply_failures",
        alias = "toL3AfterPatchApplyFailures"
    )]
    pub to_l3_after_patch_apply_failures: u32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_escalations: default_max_escalations(),
            to_l3_after_non_improving_iterations: default_escalation_iterations(),
            to_l3_after_patch_apply_failures: default_escalation_apply_failures(),
        }
    }
}

/// Redaction and encryption settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    /// Trace payload redaction.
    #[serde(default)]
    pub redaction: RedactionConfig,
    /// Memory encryption.
    #[serde(default)]
    pub encryption: EncryptionConfig,
}

/// Trace payload redaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RedactionConfig {
    /// Scrub secret-looking values from trace payloads.
    #[serde(default)]
    pub enabled: bool,
}

/// Memory encryption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EncryptionConfig {
    /// Environment variable holding the 32-byte hex key.
    #[serde(default = "default_enc_key_env", alias = "keyEnv")]
    pub key_env: String,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key_env: default_enc_key_env(),
        }
    }
}

/// Telemetry switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Whether run metrics are recorded.
    #[serde(default)]
    pub enabled: bool,
    /// `local` (artifact-only) or `off`.
    #[serde(default = "default_telemetry_mode")]
    pub mode: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: default_telemetry_mode(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_config_version() -> u32 {
    1
}
fn default_think_level() -> ThinkLevel {
    ThinkLevel::L1
}
fn default_true() -> bool {
    true
}
fn default_token_budget() -> usize {
    8_000
}
fn default_index_path() -> String {
    ".orchestrator/index".into()
}
fn default_max_auto_update_files() -> usize {
    200
}
fn default_top_k() -> usize {
    5
}
fn default_stale_downrank() -> f64 {
    0.5
}
fn default_memory_path() -> String {
    ".orchestrator/memory".into()
}
fn default_max_files_changed() -> usize {
    20
}
fn default_max_lines_changed() -> usize {
    2_000
}
fn default_network_policy() -> String {
    "deny".into()
}
fn default_tool_timeout_ms() -> u64 {
    120_000
}
fn default_max_output_bytes() -> u64 {
    1_000_000
}
fn default_max_reviews() -> u32 {
    2
}
fn default_verification_mode() -> VerificationMode {
    VerificationMode::Auto
}
fn default_test_scope() -> String {
    "all".into()
}
fn default_max_commands() -> usize {
    3
}
fn default_best_of_n() -> usize {
    3
}
fn default_diagnosis_trigger() -> u32 {
    2
}
fn default_max_tot_branches() -> usize {
    3
}
fn default_max_escalations() -> u32 {
    1
}
fn default_escalation_iterations() -> u32 {
    2
}
fn default_escalation_apply_failures() -> u32 {
    2
}
fn default_enc_key_env() -> String {
    "ORCHESTRATOR_ENC_KEY".into()
}
fn default_telemetry_mode() -> String {
    "local".into()
}
