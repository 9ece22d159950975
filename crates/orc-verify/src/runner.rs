// SPDX-License-Identifier: MIT OR Apache-2.0
//! The async verification runner.
//!
//! Each selected command runs under the tool policy: confirmation gate,
//! network switch, timeout, and output-byte ceilings. Stdout and stderr
//! stream to files as they arrive; exceeding the timeout or a ceiling
//! kills the command and marks its check failed. Tool failures are never
//! fatal to the engine; they surface in the report.

use crate::derive::VerifyCommand;
use crate::policy::{NetworkPolicy, ToolPolicy};
use orc_core::verify::{CheckResult, VerificationReport, normalize_output_tail};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Exit code recorded for commands the policy refused to run.
const EXIT_DENIED: i32 = 126;
/// Exit code recorded for commands killed by timeout or output ceiling.
const EXIT_KILLED: i32 = 124;

/// Proxy environment variables stripped under `NetworkPolicy::Deny`.
const PROXY_VARS: &[&str] = &[
    "http_proxy",
    "https_proxy",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "ALL_PROXY",
];

/// Synchronous confirmation gate, pre-answered by the engine's
/// confirmation provider.
pub type ConfirmGate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// What one verification pass produced.
#[derive(Debug)]
pub struct RunnerOutcome {
    /// The assembled report (with failure signature when failing).
    pub report: VerificationReport,
    /// Log files written, relative to the run directory.
    pub log_paths: Vec<String>,
}

/// Runs verification commands for one repository.
pub struct VerificationRunner {
    repo_root: PathBuf,
    /// Absolute directory log files land in.
    logs_dir: PathBuf,
    /// Prefix under which log paths are reported (relative to run dir).
    logs_prefix: String,
    policy: ToolPolicy,
    confirm: Option<ConfirmGate>,
}

impl VerificationRunner {
    /// Create a runner writing logs into `logs_dir` (reported under
    /// `logs_prefix`, e.g. `"tool_logs"`).
    pub fn new(
        repo_root: impl Into<PathBuf>,
        logs_dir: impl Into<PathBuf>,
        logs_prefix: impl Into<String>,
        policy: ToolPolicy,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            logs_dir: logs_dir.into(),
            logs_prefix: logs_prefix.into(),
            policy,
            confirm: None,
        }
    }

    /// Attach a confirmation gate (used when the policy requires one).
    pub fn with_confirm(mut self, confirm: ConfirmGate) -> Self {
        self.confirm = Some(confirm);
        self
    }

    /// Run `commands` in order and assemble the report.
    pub async fn run(&self, commands: &[VerifyCommand], tag: &str) -> RunnerOutcome {
        std::fs::create_dir_all(&self.logs_dir).ok();
        let mut checks = Vec::new();
        let mut failing_tails: Vec<(String, String)> = Vec::new();
        let mut log_paths = Vec::new();

        for (index, command) in commands.iter().enumerate() {
            let slug = format!("{tag}_{index}_{}", command.name);
            let stdout_rel = format!("{}/{slug}.stdout", self.logs_prefix);
            let stderr_rel = format!("{}/{slug}.stderr", self.logs_prefix);
            log_paths.push(stdout_rel.clone());
            log_paths.push(stderr_rel.clone());

            let check = self
                .run_one(command, &slug, &stdout_rel, &stderr_rel)
                .await;
            if !check.passed {
                let stderr_text = std::fs::read_to_string(self.logs_dir.join(format!("{slug}.stderr")))
                    .unwrap_or_default();
                let stdout_text = std::fs::read_to_string(self.logs_dir.join(format!("{slug}.stdout")))
                    .unwrap_or_default();
                let body = if stderr_text.trim().is_empty() {
                    stdout_text
                } else {
                    stderr_text
                };
                failing_tails.push((command.name.clone(), normalize_output_tail(&body)));
            }
            checks.push(check);
        }

        RunnerOutcome {
            report: VerificationReport::from_checks(checks, &failing_tails),
            log_paths,
        }
    }

    async fn run_one(
        &self,
        command: &VerifyCommand,
        slug: &str,
        stdout_rel: &str,
        stderr_rel: &str,
    ) -> CheckResult {
        let started = Instant::now();
        let stdout_abs = self.logs_dir.join(format!("{slug}.stdout"));
        let stderr_abs = self.logs_dir.join(format!("{slug}.stderr"));

        let fail = |exit_code: i32, note: &str, started: Instant| {
            std::fs::write(&stderr_abs, note).ok();
            std::fs::write(&stdout_abs, "").ok();
            CheckResult {
                name: command.name.clone(),
                command: command.command.clone(),
                exit_code,
                duration_ms: started.elapsed().as_millis() as u64,
                stdout_path: stdout_rel.to_string(),
                stderr_path: stderr_rel.to_string(),
                passed: false,
            }
        };

        let decision = self.policy.evaluate(&command.command);
        if !decision.allowed {
            let reason = decision.reason.unwrap_or_else(|| "denied".into());
            warn!(command = %command.command, %reason, "policy denied tool command");
            return fail(EXIT_DENIED, &format!("policy: {reason}\n"), started);
        }
        if self.policy.require_confirmation {
            let confirmed = self
                .confirm
                .as_ref()
                .map(|gate| gate(&command.command))
                .unwrap_or(false);
            if !confirmed {
                return fail(EXIT_DENIED, "confirmation denied\n", started);
            }
        }

        let mut cmd = self.build_command(&command.command);
        cmd.current_dir(&self.repo_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if self.policy.network == NetworkPolicy::Deny {
            for var in PROXY_VARS {
                cmd.env_remove(var);
            }
            cmd.env("ORC_NETWORK_POLICY", "deny");
        }

        debug!(command = %command.command, "running verification command");
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return fail(EXIT_DENIED, &format!("spawn failed: {e}\n"), started),
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let cap = self.policy.max_output_bytes;
        let out_task = tokio::spawn(drain_stream(stdout, stdout_abs.clone(), cap));
        let err_task = tokio::spawn(drain_stream(stderr, stderr_abs.clone(), cap));

        let exit = tokio::time::timeout(self.policy.timeout, child.wait()).await;
        let exit_code = match exit {
            Ok(Ok(status)) => status.code().unwrap_or(EXIT_KILLED),
            Ok(Err(e)) => {
                warn!(error = %e, "wait failed");
                EXIT_KILLED
            }
            Err(_) => {
                warn!(command = %command.command, "tool command timed out; killing");
                let _ = child.kill().await;
                EXIT_KILLED
            }
        };
        // Drains finish once the child's pipes close (exit or kill above).
        let capped = out_task.await.unwrap_or(false) | err_task.await.unwrap_or(false);
        // Exceeding an output ceiling fails the check even on exit code 0.
        let exit_code = if capped && exit_code == 0 {
            EXIT_KILLED
        } else {
            exit_code
        };

        CheckResult {
            name: command.name.clone(),
            command: command.command.clone(),
            exit_code,
            duration_ms: started.elapsed().as_millis() as u64,
            stdout_path: stdout_rel.to_string(),
            stderr_path: stderr_rel.to_string(),
            passed: exit_code == 0,
        }
    }

    fn build_command(&self, command_line: &str) -> Command {
        if self.policy.allow_shell {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command_line);
            return cmd;
        }
        let mut parts = command_line.split_whitespace();
        let program = parts.next().unwrap_or("true");
        let mut cmd = Command::new(program);
        cmd.args(parts);
        cmd
    }
}

/// Stream a child pipe to a file, keeping at most `cap` bytes. Returns
/// `true` when the ceiling was hit. Bytes past the ceiling are read and
/// discarded so the child never blocks on a full pipe.
async fn drain_stream<R>(stream: Option<R>, path: PathBuf, cap: u64) -> bool
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let Some(mut stream) = stream else {
        return false;
    };
    let mut written: u64 = 0;
    let mut buffer = vec![0u8; 8192];
    let mut contents: Vec<u8> = Vec::new();
    let mut capped = false;
    loop {
        match stream.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                let allowed = (cap.saturating_sub(written)) as usize;
                let take = n.min(allowed);
                contents.extend_from_slice(&buffer[..take]);
                written += take as u64;
                if written >= cap {
                    capped = true;
                }
            }
            Err(_) => break,
        }
    }
    let _ = std::fs::write(&path, &contents);
    capped
}
