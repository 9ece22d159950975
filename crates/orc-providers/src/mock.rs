// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scripted in-process adapter.
//!
//! Returns canned responses in order; when the script runs out the last
//! response repeats. Deterministic usage figures make cost-path tests
//! reproducible. Records every request it sees so tests can assert on
//! prompts.

use crate::{
    GenerateRequest, GenerateResponse, Provider, ProviderError, StreamEvent, TokenUsage,
    estimate_tokens,
};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Scripted provider for tests and offline eval suites.
pub struct MockProvider {
    id: String,
    responses: Vec<String>,
    cursor: AtomicUsize,
    calls: Mutex<Vec<GenerateRequest>>,
    emit_stream_usage: bool,
}

impl MockProvider {
    /// Create a mock with a response script.
    pub fn new(id: impl Into<String>, responses: Vec<String>) -> Self {
        Self {
            id: id.into(),
            responses,
            cursor: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            emit_stream_usage: false,
        }
    }

    /// Also emit a `Usage` event on streaming calls (exercises the cost
    /// proxy's stream interception).
    pub fn with_stream_usage(mut self) -> Self {
        self.emit_stream_usage = true;
        self
    }

    /// Requests seen so far, in call order.
    pub fn calls(&self) -> Vec<GenerateRequest> {
        self.calls.lock().expect("mock calls lock poisoned").clone()
    }

    /// Number of calls made.
    pub fn call_count(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> Result<String, ProviderError> {
        if self.responses.is_empty() {
            return Err(ProviderError::Empty {
                provider: self.id.clone(),
            });
        }
        let n = self.cursor.fetch_add(1, Ordering::SeqCst);
        let index = n.min(self.responses.len() - 1);
        Ok(self.responses[index].clone())
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let text = self.next_response()?;
        let usage = TokenUsage {
            input_tokens: estimate_tokens(&request.prompt),
            output_tokens: estimate_tokens(&text),
            total_tokens: estimate_tokens(&request.prompt) + estimate_tokens(&text),
        };
        self.calls
            .lock()
            .expect("mock calls lock poisoned")
            .push(request);
        Ok(GenerateResponse {
            text,
            usage: Some(usage),
        })
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn stream(
        &self,
        request: GenerateRequest,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<GenerateResponse, ProviderError> {
        let response = self.generate(request).await?;
        // Split the canned text into a few deltas to look like a stream.
        for chunk in response.text.as_bytes().chunks(16) {
            let _ = events
                .send(StreamEvent::Delta(
                    String::from_utf8_lossy(chunk).to_string(),
                ))
                .await;
        }
        if self.emit_stream_usage {
            if let Some(usage) = response.usage {
                let _ = events.send(StreamEvent::Usage(usage)).await;
            }
        }
        let _ = events.send(StreamEvent::Done).await;
        // Stream-mode usage is reported via events, not the response.
        Ok(GenerateResponse {
            text: response.text,
            usage: if self.emit_stream_usage {
                None
            } else {
                response.usage
            },
        })
    }
}
