// SPDX-License-Identifier: MIT OR Apache-2.0
//! Subprocess adapter.
//!
//! Writes the request as one JSON object to the child's stdin and reads
//! stdout as the completion text. Any executable that speaks this shape
//! can act as a provider (wrapper scripts around local models, CLIs).

use crate::{GenerateRequest, GenerateResponse, Provider, ProviderError};
use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Request shape written to the child's stdin.
#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    json_mode: bool,
    metadata: &'a std::collections::BTreeMap<String, serde_json::Value>,
}

/// Adapter that shells out to a configured command.
pub struct CommandProvider {
    id: String,
    program: String,
    args: Vec<String>,
}

impl CommandProvider {
    /// Create an adapter for `command` (whitespace-split program + args).
    pub fn new(id: impl Into<String>, command: &str) -> Result<Self, ProviderError> {
        let id = id.into();
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            return Err(ProviderError::Transport {
                provider: id,
                detail: "empty command line".into(),
            });
        };
        Ok(Self {
            program: program.to_string(),
            args: parts.map(str::to_string).collect(),
            id,
        })
    }
}

#[async_trait]
impl Provider for CommandProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let wire = serde_json::to_vec(&WireRequest {
            prompt: &request.prompt,
            system: request.system.as_deref(),
            temperature: request.temperature,
            json_mode: request.json_mode,
            metadata: &request.metadata,
        })
        .map_err(|e| ProviderError::Transport {
            provider: self.id.clone(),
            detail: e.to_string(),
        })?;

        debug!(provider = %self.id, program = %self.program, "spawning command provider");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProviderError::Transport {
                provider: self.id.clone(),
                detail: format!("spawn {}: {e}", self.program),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&wire)
                .await
                .map_err(|e| ProviderError::Transport {
                    provider: self.id.clone(),
                    detail: format!("write stdin: {e}"),
                })?;
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ProviderError::Transport {
                provider: self.id.clone(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ProviderError::Transport {
                provider: self.id.clone(),
                detail: format!(
                    "exit code {:?}: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        let text = String::from_utf8_lossy(&output.stdout).to_string();
        if text.trim().is_empty() {
            return Err(ProviderError::Empty {
                provider: self.id.clone(),
            });
        }
        Ok(GenerateResponse { text, usage: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_line_is_rejected() {
        assert!(CommandProvider::new("c", "   ").is_err());
    }

    #[tokio::test]
    async fn cat_echoes_request_json() {
        // `cat` reflects stdin, so the response is the wire request itself.
        let provider = CommandProvider::new("c", "cat").unwrap();
        let response = provider
            .generate(GenerateRequest::prompt("hello"))
            .await
            .unwrap();
        assert!(response.text.contains("\"prompt\":\"hello\""));
        assert!(response.usage.is_none());
    }

    #[tokio::test]
    async fn missing_program_is_a_transport_error() {
        let provider = CommandProvider::new("c", "definitely-not-a-real-binary-xyz").unwrap();
        let err = provider
            .generate(GenerateRequest::prompt("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Transport { .. }));
    }

    #[tokio::test]
    async fn failing_program_reports_exit_code() {
        let provider = CommandProvider::new("c", "false").unwrap();
        let err = provider
            .generate(GenerateRequest::prompt("x"))
            .await
            .unwrap_err();
        match err {
            ProviderError::Transport { detail, .. } => assert!(detail.contains("exit code")),
            other => panic!("expected Transport, got {other:?}"),
        }
    }
}
