// SPDX-License-Identifier: MIT OR Apache-2.0
//! `orc doctor`: environment checks.

use orc_config::{CliOverrides, KNOWN_PROVIDER_TYPES};
use std::path::Path;
use std::process::Command;

/// Run all checks and print a report. Exit code 2 when a required
/// dependency or the configuration is broken.
pub fn doctor_command(repo: &Path, explicit_config: Option<&Path>) -> i32 {
    let mut hard_failure = false;

    // git is required: checkpoints and rollback depend on it.
    match orc_vcs::git_version() {
        Some(version) => println!("ok    git        {version}"),
        None => {
            println!("FAIL  git        not found on PATH (required)");
            hard_failure = true;
        }
    }

    // ripgrep is optional: the context builder falls back to an internal
    // scanner.
    match binary_version("rg") {
        Some(version) => println!("ok    ripgrep    {version}"),
        None => println!("warn  ripgrep    not found; falling back to internal search"),
    }

    match orc_config::load_stack(repo, explicit_config, &CliOverrides::default()) {
        Ok(config) => {
            println!("ok    config     {} provider(s) configured", config.providers.len());
            for (id, provider) in &config.providers {
                if !KNOWN_PROVIDER_TYPES.contains(&provider.kind.as_str()) {
                    // load_stack validation already failed in this case;
                    // kept for completeness.
                    continue;
                }
                let needs_key = matches!(provider.kind.as_str(), "openai" | "anthropic");
                if needs_key && provider.api_key.is_none() {
                    let hint = provider
                        .api_key_env
                        .as_deref()
                        .map(|v| format!("export {v}"))
                        .unwrap_or_else(|| "set api_key_env".into());
                    println!("warn  provider   '{id}' has no API key ({hint})");
                } else {
                    println!("ok    provider   '{id}' ({})", provider.kind);
                }
            }
        }
        Err(e) => {
            println!("FAIL  config     {e}");
            hard_failure = true;
        }
    }

    if hard_failure { 2 } else { 0 }
}

fn binary_version(program: &str) -> Option<String> {
    let out = Command::new(program).arg("--version").output().ok()?;
    if !out.status.success() {
        return None;
    }
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .next()
        .map(str::to_string)
}
