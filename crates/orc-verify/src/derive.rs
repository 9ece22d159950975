// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ecosystem detection and command derivation.

use std::path::Path;

/// A named verification command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyCommand {
    /// Stable check name (`lint`, `typecheck`, `test`, or custom).
    pub name: String,
    /// The command line.
    pub command: String,
}

impl VerifyCommand {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }
}

/// Detected project ecosystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ecosystem {
    /// `package.json` present.
    Node,
    /// `Cargo.toml` present.
    Rust,
    /// `pyproject.toml` or `setup.py` present.
    Python,
    /// Nothing recognizable.
    Unknown,
}

/// Detect the ecosystem of `repo_root`.
pub fn detect_ecosystem(repo_root: &Path) -> Ecosystem {
    if repo_root.join("package.json").exists() {
        Ecosystem::Node
    } else if repo_root.join("Cargo.toml").exists() {
        Ecosystem::Rust
    } else if repo_root.join("pyproject.toml").exists() || repo_root.join("setup.py").exists() {
        Ecosystem::Python
    } else {
        Ecosystem::Unknown
    }
}

/// Switches for auto-derivation.
#[derive(Debug, Clone)]
pub struct DeriveOptions {
    /// Include the lint command.
    pub enable_lint: bool,
    /// Include the typecheck command.
    pub enable_typecheck: bool,
    /// Include the test command.
    pub enable_tests: bool,
    /// `all` or `touched`.
    pub test_scope: String,
    /// Files touched so far in the run (for `touched` scope).
    pub touched_files: Vec<String>,
    /// Cap on commands per verification pass.
    pub max_commands: usize,
}

impl Default for DeriveOptions {
    fn default() -> Self {
        Self {
            enable_lint: true,
            enable_typecheck: true,
            enable_tests: true,
            test_scope: "all".into(),
            touched_files: Vec::new(),
            max_commands: 3,
        }
    }
}

/// Derive lint/typecheck/test commands for the detected ecosystem,
/// capped at `max_commands`. Unknown ecosystems derive nothing.
pub fn derive_commands(repo_root: &Path, options: &DeriveOptions) -> Vec<VerifyCommand> {
    let mut commands = Vec::new();
    match detect_ecosystem(repo_root) {
        Ecosystem::Node => {
            if options.enable_lint && node_has_script(repo_root, "lint") {
                commands.push(VerifyCommand::new("lint", "npm run lint"));
            }
            if options.enable_typecheck && repo_root.join("tsconfig.json").exists() {
                commands.push(VerifyCommand::new("typecheck", "npx tsc --noEmit"));
            }
            if options.enable_tests && node_has_script(repo_root, "test") {
                commands.push(VerifyCommand::new("test", "npm test"));
            }
        }
        Ecosystem::Rust => {
            if options.enable_lint {
                commands.push(VerifyCommand::new("lint", "cargo clippy --quiet --no-deps"));
            }
            if options.enable_typecheck {
                commands.push(VerifyCommand::new("typecheck", "cargo check --quiet"));
            }
            if options.enable_tests {
                commands.push(VerifyCommand::new("test", "cargo test --quiet"));
            }
        }
        Ecosystem::Python => {
            if options.enable_lint {
                commands.push(VerifyCommand::new("lint", "ruff check ."));
            }
            if options.enable_typecheck {
                commands.push(VerifyCommand::new("typecheck", "mypy ."));
            }
            if options.enable_tests {
                let mut command = "pytest -q".to_string();
                if options.test_scope == "touched" && !options.touched_files.is_empty() {
                    let tests: Vec<&str> = options
                        .touched_files
                        .iter()
                        .filter(|f| f.contains("test"))
                        .map(String::as_str)
                        .collect();
                    if !tests.is_empty() {
                        command = format!("pytest -q {}", tests.join(" "));
                    }
                }
                commands.push(VerifyCommand::new("test", command));
            }
        }
        Ecosystem::Unknown => {}
    }
    commands.truncate(options.max_commands);
    commands
}

fn node_has_script(repo_root: &Path, script: &str) -> bool {
    let Ok(content) = std::fs::read_to_string(repo_root.join("package.json")) else {
        return false;
    };
    let Ok(json) = serde_json::from_str::<serde_json::Value>(&content) else {
        return false;
    };
    json["scripts"][script].is_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn rust_repo_derives_three_commands() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]\nname='x'\n").unwrap();
        let commands = derive_commands(dir.path(), &DeriveOptions::default());
        let names: Vec<&str> = commands.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["lint", "typecheck", "test"]);
    }

    #[test]
    fn node_repo_respects_declared_scripts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"scripts": {"test": "vitest run"}}"#,
        )
        .unwrap();
        let commands = derive_commands(dir.path(), &DeriveOptions::default());
        // No lint script, no tsconfig: only the test command derives.
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command, "npm test");
    }

    #[test]
    fn cap_truncates_derived_commands() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]\n").unwrap();
        let commands = derive_commands(
            dir.path(),
            &DeriveOptions {
                max_commands: 1,
                ..Default::default()
            },
        );
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].name, "lint");
    }

    #[test]
    fn switches_disable_commands() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]\n").unwrap();
        let commands = derive_commands(
            dir.path(),
            &DeriveOptions {
                enable_lint: false,
                enable_typecheck: false,
                ..Default::default()
            },
        );
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].name, "test");
    }

    #[test]
    fn unknown_ecosystem_derives_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(derive_commands(dir.path(), &DeriveOptions::default()).is_empty());
    }

    #[test]
    fn touched_scope_narrows_pytest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("pyproject.toml"), "[project]\n").unwrap();
        let commands = derive_commands(
            dir.path(),
            &DeriveOptions {
                enable_lint: false,
                enable_typecheck: false,
                test_scope: "touched".into(),
                touched_files: vec!["tests/test_auth.py".into(), "src/auth.py".into()],
                ..Default::default()
            },
        );
        assert_eq!(commands[0].command, "pytest -q tests/test_auth.py");
    }
}
