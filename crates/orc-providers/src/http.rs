// SPDX-License-Identifier: MIT OR Apache-2.0
//! Generic HTTP chat adapter.
//!
//! Speaks the minimal chat-completions shape shared by OpenAI-compatible
//! endpoints: `POST {base_url}/chat/completions` with a messages array,
//! reading `choices[0].message.content` and the `usage` block. Vendor wire
//! formats beyond this are out of scope; `base_url` selects the endpoint.

use crate::{GenerateRequest, GenerateResponse, Provider, ProviderError, TokenUsage};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Default endpoint per adapter kind.
fn default_base_url(kind: &str) -> &'static str {
    match kind {
        "anthropic" => "https://api.anthropic.com/v1",
        _ => "https://api.openai.com/v1",
    }
}

/// HTTP chat adapter covering the `openai` and `anthropic` provider types
/// at the interface level.
pub struct HttpChatProvider {
    id: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl HttpChatProvider {
    /// Build an adapter. The caller (registry) guarantees `api_key` is
    /// present; a missing key is a configuration error at first use.
    pub fn new(
        id: impl Into<String>,
        kind: &str,
        base_url: Option<&str>,
        model: Option<&str>,
        api_key: String,
    ) -> Self {
        Self {
            id: id.into(),
            client: reqwest::Client::new(),
            base_url: base_url
                .map(str::to_string)
                .unwrap_or_else(|| default_base_url(kind).to_string()),
            model: model.unwrap_or("default").to_string(),
            api_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

#[async_trait]
impl Provider for HttpChatProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if request.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!(provider = %self.id, url = %url, "http chat request");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport {
                provider: self.id.clone(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        let payload = response.text().await.map_err(|e| ProviderError::Transport {
            provider: self.id.clone(),
            detail: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(ProviderError::Transport {
                provider: self.id.clone(),
                detail: format!("http {status}: {}", truncate(&payload, 300)),
            });
        }

        let wire: WireResponse =
            serde_json::from_str(&payload).map_err(|e| ProviderError::Garbled {
                provider: self.id.clone(),
                detail: format!("{e} in {}", truncate(&payload, 300)),
            })?;
        let Some(choice) = wire.choices.into_iter().next() else {
            return Err(ProviderError::Empty {
                provider: self.id.clone(),
            });
        };
        if choice.message.content.trim().is_empty() {
            return Err(ProviderError::Empty {
                provider: self.id.clone(),
            });
        }
        Ok(GenerateResponse {
            text: choice.message.content,
            usage: wire.usage.map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                total_tokens: if u.total_tokens > 0 {
                    u.total_tokens
                } else {
                    u.prompt_tokens + u.completion_tokens
                },
            }),
        })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_response_parses_usage() {
        let payload = r#"{
            "choices": [{"message": {"content": "hello"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13}
        }"#;
        let wire: WireResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(wire.choices[0].message.content, "hello");
        assert_eq!(wire.usage.unwrap().total_tokens, 13);
    }

    #[test]
    fn default_base_urls_per_kind() {
        assert!(default_base_url("anthropic").contains("anthropic"));
        assert!(default_base_url("openai").contains("openai"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
