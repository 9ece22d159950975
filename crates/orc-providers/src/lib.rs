// SPDX-License-Identifier: MIT OR Apache-2.0
//! orc-providers
//!
//! Language-model provider adapters behind one small trait, a lazy
//! registry keyed on adapter type, and cost accounting wired in through a
//! proxy so every token the run consumes is attributed to a provider.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Subprocess adapter.
pub mod command;
/// Confirmation providers (limit-retry prompts).
pub mod confirm;
/// Per-provider cost accounting.
pub mod cost;
/// Generic HTTP chat adapter.
pub mod http;
/// Scripted in-process adapter for tests and offline eval.
pub mod mock;
/// Name → adapter registry with the cost proxy.
pub mod registry;

pub use confirm::{AllowAll, Confirmation, DenyAll};
pub use cost::CostTracker;
pub use registry::{ProviderRegistry, RegistryError, RoleSet};

use async_trait::async_trait;
use orc_core::cost::ProviderUsage;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// One request to a provider.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    /// User prompt body.
    pub prompt: String,
    /// System prompt, when the adapter supports one.
    pub system: Option<String>,
    /// Sampling temperature override.
    pub temperature: Option<f64>,
    /// Ask the provider for a JSON object response.
    pub json_mode: bool,
    /// Opaque request metadata (e.g. `orchestrator_candidate_index`).
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl GenerateRequest {
    /// Build a plain prompt request.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            prompt: text.into(),
            ..Default::default()
        }
    }
}

/// Token counts reported by an adapter for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
    /// Combined count.
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Convert to the persisted accumulation shape (cost filled in later).
    pub fn to_provider_usage(self) -> ProviderUsage {
        ProviderUsage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self.total_tokens,
            estimated_cost_usd: None,
        }
    }
}

/// One completed provider response.
#[derive(Debug, Clone, Default)]
pub struct GenerateResponse {
    /// The model's output text, verbatim.
    pub text: String,
    /// Usage, when the adapter reports it.
    pub usage: Option<TokenUsage>,
}

/// An event on a streaming call.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental output text.
    Delta(String),
    /// Usage report seen mid-stream.
    Usage(TokenUsage),
    /// Stream end.
    Done,
}

/// Per-call provider errors. Recoverable at the engine level.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider returned an empty response.
    #[error("provider '{provider}' returned an empty response")]
    Empty {
        /// Provider id.
        provider: String,
    },

    /// The response could not be interpreted.
    #[error("provider '{provider}' returned garbled output: {detail}")]
    Garbled {
        /// Provider id.
        provider: String,
        /// What failed to parse.
        detail: String,
    },

    /// Transport or subprocess failure.
    #[error("provider '{provider}' call failed: {detail}")]
    Transport {
        /// Provider id.
        provider: String,
        /// Failure description.
        detail: String,
    },
}

/// A language-model adapter.
///
/// `generate` is the only required operation. Streaming is optional;
/// adapters that do not stream serve the default implementation, which
/// forwards the full completion as a single delta. Adapters are safe for
/// concurrent `generate` calls only when their configuration advertises it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Configured provider id.
    fn id(&self) -> &str;

    /// One completion call.
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, ProviderError>;

    /// Whether [`Provider::stream`] produces real incremental events.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Streaming call: events go to `events`, the final response returns.
    async fn stream(
        &self,
        request: GenerateRequest,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<GenerateResponse, ProviderError> {
        let response = self.generate(request).await?;
        let _ = events.send(StreamEvent::Delta(response.text.clone())).await;
        if let Some(usage) = response.usage {
            let _ = events.send(StreamEvent::Usage(usage)).await;
        }
        let _ = events.send(StreamEvent::Done).await;
        Ok(response)
    }
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn Provider").field("id", &self.id()).finish()
    }
}

/// Rough token estimate for text without a tokenizer (4 bytes per token).
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}
