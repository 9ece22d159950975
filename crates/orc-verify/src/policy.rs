// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tool policy evaluation.
//!
//! Every verification command passes through the policy before it runs:
//! prefix allow/deny lists, the network switch, confirmation, and the
//! timeout / output ceilings all live here. The deny list always wins.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Network access for tool subprocesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPolicy {
    /// Leave the child's environment alone.
    Allow,
    /// Strip proxy variables and flag the denial to the child (best-effort).
    Deny,
}

/// Sandbox configuration for one run.
#[derive(Debug, Clone)]
pub struct ToolPolicy {
    /// Ask for confirmation before each command.
    pub require_confirmation: bool,
    /// Network switch.
    pub network: NetworkPolicy,
    /// Run command strings through `sh -c` instead of direct spawn.
    pub allow_shell: bool,
    /// Command-prefix allowlist; empty allows everything not denied.
    pub allow_prefixes: Vec<String>,
    /// Command-prefix denylist; wins over the allowlist.
    pub deny_prefixes: Vec<String>,
    /// Per-command wall-clock ceiling.
    pub timeout: Duration,
    /// Per-stream output ceiling in bytes.
    pub max_output_bytes: u64,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self {
            require_confirmation: false,
            network: NetworkPolicy::Deny,
            allow_shell: false,
            allow_prefixes: Vec::new(),
            deny_prefixes: Vec::new(),
            timeout: Duration::from_secs(120),
            max_output_bytes: 1_000_000,
        }
    }
}

/// Outcome of evaluating one command against the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    /// Whether the command may run.
    pub allowed: bool,
    /// Why not, when denied.
    pub reason: Option<String>,
}

impl PolicyDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

impl ToolPolicy {
    /// Evaluate a command line against the prefix lists.
    pub fn evaluate(&self, command: &str) -> PolicyDecision {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return PolicyDecision::deny("empty command");
        }
        if let Some(prefix) = self
            .deny_prefixes
            .iter()
            .find(|p| trimmed.starts_with(p.as_str()))
        {
            return PolicyDecision::deny(format!("denied by prefix '{prefix}'"));
        }
        if !self.allow_prefixes.is_empty()
            && !self
                .allow_prefixes
                .iter()
                .any(|p| trimmed.starts_with(p.as_str()))
        {
            return PolicyDecision::deny("not on the allowlist");
        }
        PolicyDecision::allow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_lists_allow_everything() {
        let policy = ToolPolicy::default();
        assert!(policy.evaluate("cargo test").allowed);
    }

    #[test]
    fn deny_prefix_wins_over_allow() {
        let policy = ToolPolicy {
            allow_prefixes: vec!["cargo".into()],
            deny_prefixes: vec!["cargo publish".into()],
            ..Default::default()
        };
        assert!(policy.evaluate("cargo test").allowed);
        let decision = policy.evaluate("cargo publish --dry-run");
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("cargo publish"));
    }

    #[test]
    fn allowlist_excludes_everything_else() {
        let policy = ToolPolicy {
            allow_prefixes: vec!["npm".into()],
            ..Default::default()
        };
        assert!(policy.evaluate("npm test").allowed);
        assert!(!policy.evaluate("rm -rf /").allowed);
    }

    #[test]
    fn empty_command_is_denied() {
        assert!(!ToolPolicy::default().evaluate("   ").allowed);
    }
}
