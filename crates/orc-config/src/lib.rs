// SPDX-License-Identifier: MIT OR Apache-2.0
//! orc-config
//!
//! Loads, merges, and validates `.orchestrator.yaml` configuration.
//!
//! Precedence, highest first: CLI flags → explicit `--config` file →
//! repository `./.orchestrator.yaml` → user `~/.orchestrator/config.yaml`
//! → built-in defaults. Schema validation is total: unknown keys fail.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod schema;

pub use schema::*;

use orc_core::{Budget, ThinkLevel};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Errors from configuration loading or validation. Fatal at command start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An explicitly requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// A file could not be parsed as YAML matching the schema.
    #[error("failed to parse {path}: {reason}")]
    Parse {
        /// File that failed.
        path: String,
        /// Parse error detail (includes unknown-key failures).
        reason: String,
    },

    /// Semantic validation failed.
    #[error("config validation failed: {reasons:?}")]
    Validation {
        /// Individual failure messages.
        reasons: Vec<String>,
    },

    /// A required environment variable is missing.
    #[error("environment variable {var} is not set (required by {what})")]
    MissingEnv {
        /// Variable name.
        var: String,
        /// What required it.
        what: String,
    },
}

/// Typed CLI overrides applied on top of the merged file stack.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// `--think`.
    pub think_level: Option<ThinkLevel>,
    /// `--budget time=...,cost=...,iter=...,tool=...`.
    pub budget: Option<Budget>,
}

/// Load the full configuration stack for a repository.
///
/// Missing repo/user files are fine; a missing *explicit* file is an error.
pub fn load_stack(
    repo_root: &Path,
    explicit: Option<&Path>,
    overrides: &CliOverrides,
) -> Result<OrcConfig, ConfigError> {
    let mut layers: Vec<(String, serde_yaml::Value)> = Vec::new();

    if let Some(user_path) = user_config_path() {
        if let Some(v) = read_optional_yaml(&user_path)? {
            layers.push((user_path.display().to_string(), v));
        }
    }
    let repo_path = repo_root.join(".orchestrator.yaml");
    if let Some(v) = read_optional_yaml(&repo_path)? {
        layers.push((repo_path.display().to_string(), v));
    }
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let v = parse_yaml_value(&content, path)?;
        layers.push((path.display().to_string(), v));
    }

    // Later layers win; fold low-to-high precedence.
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
    for (name, layer) in layers {
        debug!(layer = %name, "merging config layer");
        merged = merge_values(layer, merged);
    }

    let mut config: OrcConfig =
        serde_yaml::from_value(merged).map_err(|e| ConfigError::Parse {
            path: "<merged config>".into(),
            reason: e.to_string(),
        })?;

    if let Some(level) = overrides.think_level {
        config.think_level = level;
    }
    if let Some(budget) = overrides.budget.clone() {
        config.budget = merge_budget(budget, config.budget);
    }

    resolve_secrets(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Parse a single YAML document into an [`OrcConfig`] (defaults filled in).
///
/// An empty document is a valid config carrying all defaults.
pub fn parse_config(content: &str) -> Result<OrcConfig, ConfigError> {
    if content.trim().is_empty() {
        return Ok(OrcConfig::default());
    }
    let config: OrcConfig = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
        path: "<inline>".into(),
        reason: e.to_string(),
    })?;
    Ok(config)
}

/// Recursively merge two YAML values; `overlay` wins over `base`.
///
/// Mappings merge key-wise; anything else (scalars, sequences) is replaced
/// wholesale by the overlay. Merging an empty overlay is the identity.
pub fn merge_values(overlay: serde_yaml::Value, base: serde_yaml::Value) -> serde_yaml::Value {
    use serde_yaml::Value;
    match (overlay, base) {
        (Value::Mapping(over), Value::Mapping(mut out)) => {
            for (k, v) in over {
                let merged = match out.remove(&k) {
                    Some(existing) => merge_values(v, existing),
                    None => v,
                };
                out.insert(k, merged);
            }
            Value::Mapping(out)
        }
        (Value::Null, base) => base,
        (overlay, _) => overlay,
    }
}

/// Per-field budget merge: overlay fields win, unset fields fall through.
fn merge_budget(overlay: Budget, base: Budget) -> Budget {
    Budget {
        iter: overlay.iter.or(base.iter),
        time_ms: overlay.time_ms.or(base.time_ms),
        cost_usd: overlay.cost_usd.or(base.cost_usd),
        tool: overlay.tool.or(base.tool),
    }
}

/// Replace each provider's `api_key_env` with the environment's value.
///
/// A missing variable leaves `api_key` unset; adapters that require a key
/// fail with a configuration error at first use, not here.
pub fn resolve_secrets(config: &mut OrcConfig) {
    for (id, provider) in config.providers.iter_mut() {
        if provider.api_key.is_none() {
            if let Some(var) = &provider.api_key_env {
                match std::env::var(var) {
                    Ok(value) if !value.is_empty() => provider.api_key = Some(value),
                    _ => debug!(provider = %id, var = %var, "api key env var not set"),
                }
            }
        }
    }
}

/// Recognized provider adapter types.
pub const KNOWN_PROVIDER_TYPES: &[&str] = &["mock", "command", "openai", "anthropic"];

/// Semantic validation over a merged config.
pub fn validate(config: &OrcConfig) -> Result<(), ConfigError> {
    let mut reasons: Vec<String> = Vec::new();

    for (id, provider) in &config.providers {
        if !KNOWN_PROVIDER_TYPES.contains(&provider.kind.as_str()) {
            reasons.push(format!(
                "provider '{id}': unknown type '{}' (known: {KNOWN_PROVIDER_TYPES:?})",
                provider.kind
            ));
        }
        if provider.kind == "command" && provider.command.as_deref().unwrap_or("").trim().is_empty()
        {
            reasons.push(format!("provider '{id}': command type requires 'command'"));
        }
    }
    for (role, id) in [
        ("planner", &config.defaults.planner),
        ("executor", &config.defaults.executor),
        ("reviewer", &config.defaults.reviewer),
    ] {
        if let Some(id) = id {
            if !config.providers.contains_key(id) {
                reasons.push(format!("defaults.{role} references unknown provider '{id}'"));
            }
        }
    }
    if config.l3.best_of_n == 0 {
        reasons.push("l3.best_of_n must be at least 1".into());
    }
    if config.execution.review_loop.max_reviews == 0 && config.execution.review_loop.enabled {
        reasons.push("execution.review_loop.max_reviews must be at least 1 when enabled".into());
    }
    if config.verification.mode == VerificationMode::Custom && config.verification.steps.is_empty()
    {
        reasons.push("verification.mode=custom requires non-empty verification.steps".into());
    }
    if let Some(t) = config.budget.time_ms {
        if t == 0 {
            reasons.push("budget.time_ms must be positive".into());
        }
    }
    if config.memory.storage.encrypt_at_rest && config.security.encryption.key_env.trim().is_empty()
    {
        reasons.push("memory.storage.encrypt_at_rest requires security.encryption.key_env".into());
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation { reasons })
    }
}

/// The fully merged config as JSON, for the mandatory
/// `effective-config.json` snapshot. API keys are never serialized.
pub fn effective_config_json(config: &OrcConfig) -> serde_json::Value {
    serde_json::to_value(config).unwrap_or(serde_json::Value::Null)
}

fn user_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".orchestrator/config.yaml"))
}

fn read_optional_yaml(path: &Path) -> Result<Option<serde_yaml::Value>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(parse_yaml_value(&content, path)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

fn parse_yaml_value(content: &str, path: &Path) -> Result<serde_yaml::Value, ConfigError> {
    serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
#[allow(unsafe_code)] // env-var mutation in secret-resolution tests
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_and_validate() {
        let config = parse_config("").unwrap();
        assert_eq!(config.config_version, 1);
        assert_eq!(config.think_level, ThinkLevel::L1);
        assert_eq!(config.budget, Budget::default());
        validate(&config).unwrap();
    }

    #[test]
    fn unknown_top_level_key_fails() {
        let err = parse_config("not_a_real_key: 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn unknown_nested_key_fails() {
        let err = parse_config("l3:\n  bogus: true\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn provider_stack_parses() {
        let yaml = r#"
providers:
  main:
    type: openai
    model: gpt-large
    api_key_env: MAIN_API_KEY
    pricing:
      input_per_mtok_usd: 3.0
      output_per_mtok_usd: 12.0
defaults:
  planner: main
  executor: main
  reviewer: main
"#;
        let config = parse_config(yaml).unwrap();
        validate(&config).unwrap();
        let p = &config.providers["main"];
        assert_eq!(p.kind, "openai");
        assert_eq!(p.pricing.unwrap().input_per_mtok_usd, Some(3.0));
    }

    #[test]
    fn unknown_provider_type_fails_validation() {
        let config = parse_config("providers:\n  x:\n    type: quantum\n").unwrap();
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn default_role_referencing_missing_provider_fails() {
        let config = parse_config("defaults:\n  executor: ghost\n").unwrap();
        let err = validate(&config).unwrap_err();
        match err {
            ConfigError::Validation { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("ghost")));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn custom_verification_without_steps_fails() {
        let config = parse_config("verification:\n  mode: custom\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn merge_is_left_biased() {
        let base: serde_yaml::Value =
            serde_yaml::from_str("think_level: L1\ncontext:\n  token_budget: 4000\n").unwrap();
        let overlay: serde_yaml::Value = serde_yaml::from_str("think_level: L3\n").unwrap();
        let merged = merge_values(overlay, base);
        let config: OrcConfig = serde_yaml::from_value(merged).unwrap();
        assert_eq!(config.think_level, ThinkLevel::L3);
        assert_eq!(config.context.token_budget, 4000);
    }

    #[test]
    fn merge_with_empty_overlay_is_identity() {
        let base: serde_yaml::Value =
            serde_yaml::from_str("think_level: L2\nl3:\n  best_of_n: 5\n").unwrap();
        let empty = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
        let merged = merge_values(empty, base.clone());
        assert_eq!(merged, base);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_stack(
            dir.path(),
            Some(Path::new("/nonexistent/orc.yaml")),
            &CliOverrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn repo_file_overrides_defaults_and_flags_override_repo() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".orchestrator.yaml"), "think_level: L2\n").unwrap();

        let config = load_stack(dir.path(), None, &CliOverrides::default()).unwrap();
        assert_eq!(config.think_level, ThinkLevel::L2);

        let flags = CliOverrides {
            think_level: Some(ThinkLevel::L0),
            ..Default::default()
        };
        let config = load_stack(dir.path(), None, &flags).unwrap();
        assert_eq!(config.think_level, ThinkLevel::L0);
    }

    #[test]
    fn budget_override_merges_per_field() {
        let dir = tempfile::tempdir().unwrap();
        let flags = CliOverrides {
            budget: Some(Budget {
                iter: Some(9),
                time_ms: None,
                cost_usd: None,
                tool: None,
            }),
            ..Default::default()
        };
        let config = load_stack(dir.path(), None, &flags).unwrap();
        assert_eq!(config.budget.iter, Some(9));
        // Unset flag fields fall through to the defaults.
        assert_eq!(config.budget.tool, Some(6));
    }

    #[test]
    fn secret_resolution_reads_environment() {
        let mut config = parse_config(
            "providers:\n  p:\n    type: openai\n    api_key_env: ORC_TEST_KEY_VAR\n",
        )
        .unwrap();
        // Unset: key stays empty.
        unsafe { std::env::remove_var("ORC_TEST_KEY_VAR") };
        resolve_secrets(&mut config);
        assert!(config.providers["p"].api_key.is_none());

        unsafe { std::env::set_var("ORC_TEST_KEY_VAR", "sk-123") };
        resolve_secrets(&mut config);
        assert_eq!(config.providers["p"].api_key.as_deref(), Some("sk-123"));
        unsafe { std::env::remove_var("ORC_TEST_KEY_VAR") };
    }

    #[test]
    fn effective_config_omits_api_keys() {
        let mut config = parse_config("providers:\n  p:\n    type: openai\n").unwrap();
        config.providers.get_mut("p").unwrap().api_key = Some("sk-secret".into());
        let json = effective_config_json(&config).to_string();
        assert!(!json.contains("sk-secret"));
    }
}
