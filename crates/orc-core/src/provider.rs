// SPDX-License-Identifier: MIT OR Apache-2.0
//! Provider configuration shared between config loading and the registry.

use crate::cost::Pricing;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The three provider roles the engine resolves for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProviderRole {
    /// Turns a goal into a plan.
    Planner,
    /// Produces candidate diffs.
    Executor,
    /// Reviews patches, ranks candidates, judges ties, diagnoses failures.
    Reviewer,
}

impl std::fmt::Display for ProviderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Planner => "planner",
            Self::Executor => "executor",
            Self::Reviewer => "reviewer",
        };
        f.write_str(s)
    }
}

/// One configured provider, after secret resolution.
///
/// `api_key_env` is resolved into `api_key` by the config layer before the
/// registry ever sees this value; the registry treats a missing key for an
/// adapter that needs one as a configuration error at first use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProviderConfig {
    /// Provider id referenced by role defaults.
    pub id: String,
    /// Adapter type: `mock`, `command`, `openai`, `anthropic`.
    pub kind: String,
    /// Model identifier passed to the adapter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Subprocess command line (for `command` adapters).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// API base URL override (for HTTP adapters).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Resolved API key. Never serialized into artifacts.
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Unit pricing for cost estimation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<Pricing>,
    /// Advertised capabilities (`"stream"`, `"concurrent"`).
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Scripted responses for `mock` adapters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responses: Vec<String>,
}

impl ProviderConfig {
    /// `true` when the adapter advertises safe concurrent `generate` calls.
    pub fn supports_concurrency(&self) -> bool {
        self.capabilities.iter().any(|c| c == "concurrent")
    }
}
