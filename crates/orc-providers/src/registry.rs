// SPDX-License-Identifier: MIT OR Apache-2.0
//! Name → adapter registry.
//!
//! Adapters are constructed lazily at first lookup, keyed on the provider
//! config's `type`, and wrapped in a cost proxy that records usage from
//! both `generate` responses and mid-stream usage events. A missing API
//! key therefore fails at first use, not at registration.

use crate::command::CommandProvider;
use crate::cost::CostTracker;
use crate::http::HttpChatProvider;
use crate::mock::MockProvider;
use crate::{GenerateRequest, GenerateResponse, Provider, ProviderError, StreamEvent};
use async_trait::async_trait;
use orc_core::cost::Pricing;
use orc_core::provider::{ProviderConfig, ProviderRole};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// Registry and factory errors. Fatal at command start (exit code 2).
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No provider with this id is configured.
    #[error("unknown provider id '{id}'")]
    UnknownProvider {
        /// Looked-up id.
        id: String,
    },

    /// The provider's `type` has no factory.
    #[error("provider '{id}': unknown adapter type '{kind}'")]
    UnknownType {
        /// Provider id.
        id: String,
        /// Unrecognized type.
        kind: String,
    },

    /// An adapter that requires an API key has none after secret
    /// resolution. This is a configuration error surfaced at first use.
    #[error("provider '{id}': missing API key (set api_key_env and export the variable)")]
    MissingApiKey {
        /// Provider id.
        id: String,
    },

    /// The provider config is incomplete for its type.
    #[error("provider '{id}': {detail}")]
    Invalid {
        /// Provider id.
        id: String,
        /// What is missing or wrong.
        detail: String,
    },

    /// No providers are configured at all.
    #[error("no providers configured; add a `providers:` section")]
    NoProviders,
}

/// The resolved `{planner, executor, reviewer}` triple.
#[derive(Clone, Debug)]
pub struct RoleSet {
    /// Planner adapter and its id.
    pub planner: (String, Arc<dyn Provider>),
    /// Executor adapter and its id.
    pub executor: (String, Arc<dyn Provider>),
    /// Reviewer adapter and its id.
    pub reviewer: (String, Arc<dyn Provider>),
}

impl RoleSet {
    /// Adapter for a role.
    pub fn for_role(&self, role: ProviderRole) -> &(String, Arc<dyn Provider>) {
        match role {
            ProviderRole::Planner => &self.planner,
            ProviderRole::Executor => &self.executor,
            ProviderRole::Reviewer => &self.reviewer,
        }
    }
}

/// Lazy name → adapter registry.
pub struct ProviderRegistry {
    configs: BTreeMap<String, ProviderConfig>,
    built: Mutex<HashMap<String, Arc<dyn Provider>>>,
    cost: Arc<CostTracker>,
}

impl ProviderRegistry {
    /// Create a registry over resolved provider configs.
    pub fn new(configs: BTreeMap<String, ProviderConfig>, cost: Arc<CostTracker>) -> Self {
        Self {
            configs,
            built: Mutex::new(HashMap::new()),
            cost: Arc::clone(&cost),
        }
    }

    /// Shared cost tracker all proxies record into.
    pub fn cost_tracker(&self) -> Arc<CostTracker> {
        Arc::clone(&self.cost)
    }

    /// Pre-register a built adapter (tests, eval harness). It is wrapped
    /// in the cost proxy like factory-built adapters.
    pub fn register_adapter(&self, id: impl Into<String>, adapter: Arc<dyn Provider>) {
        let id = id.into();
        let pricing = self.configs.get(&id).and_then(|c| c.pricing);
        let proxied = Arc::new(CostProxy {
            provider_id: id.clone(),
            inner: adapter,
            pricing,
            cost: Arc::clone(&self.cost),
        });
        self.built
            .lock()
            .expect("registry lock poisoned")
            .insert(id, proxied);
    }

    /// Look up an adapter, constructing it on first access.
    pub fn get(&self, id: &str) -> Result<Arc<dyn Provider>, RegistryError> {
        if let Some(found) = self.built.lock().expect("registry lock poisoned").get(id) {
            return Ok(Arc::clone(found));
        }
        let config = self
            .configs
            .get(id)
            .ok_or_else(|| RegistryError::UnknownProvider { id: id.to_string() })?;
        let inner = build_adapter(config)?;
        debug!(provider = %id, kind = %config.kind, "constructed adapter");
        let proxied: Arc<dyn Provider> = Arc::new(CostProxy {
            provider_id: id.to_string(),
            inner,
            pricing: config.pricing,
            cost: Arc::clone(&self.cost),
        });
        self.built
            .lock()
            .expect("registry lock poisoned")
            .insert(id.to_string(), Arc::clone(&proxied));
        Ok(proxied)
    }

    /// Resolve the role triple. Unset roles fall back to the first
    /// configured provider (sorted by id).
    pub fn resolve_roles(
        &self,
        planner: Option<&str>,
        executor: Option<&str>,
        reviewer: Option<&str>,
    ) -> Result<RoleSet, RegistryError> {
        let fallback = self
            .first_id()
            .ok_or(RegistryError::NoProviders)?;
        let resolve = |explicit: Option<&str>| -> Result<(String, Arc<dyn Provider>), RegistryError> {
            let id = explicit.unwrap_or(&fallback).to_string();
            Ok((id.clone(), self.get(&id)?))
        };
        Ok(RoleSet {
            planner: resolve(planner)?,
            executor: resolve(executor)?,
            reviewer: resolve(reviewer)?,
        })
    }

    /// Whether the provider advertises safe concurrent `generate` calls.
    pub fn supports_concurrency(&self, id: &str) -> bool {
        self.configs
            .get(id)
            .is_some_and(|c| c.supports_concurrency())
    }

    fn first_id(&self) -> Option<String> {
        // Built-but-unconfigured adapters (test injections) also count.
        if let Some(first) = self.configs.keys().next() {
            return Some(first.clone());
        }
        let built = self.built.lock().expect("registry lock poisoned");
        let mut ids: Vec<&String> = built.keys().collect();
        ids.sort();
        ids.first().map(|s| (*s).clone())
    }
}

fn build_adapter(config: &ProviderConfig) -> Result<Arc<dyn Provider>, RegistryError> {
    match config.kind.as_str() {
        "mock" => Ok(Arc::new(MockProvider::new(
            config.id.clone(),
            config.responses.clone(),
        ))),
        "command" => {
            let command = config.command.as_deref().unwrap_or("").trim().to_string();
            if command.is_empty() {
                return Err(RegistryError::Invalid {
                    id: config.id.clone(),
                    detail: "command type requires 'command'".into(),
                });
            }
            CommandProvider::new(config.id.clone(), &command)
                .map(|p| Arc::new(p) as Arc<dyn Provider>)
                .map_err(|e| RegistryError::Invalid {
                    id: config.id.clone(),
                    detail: e.to_string(),
                })
        }
        kind @ ("openai" | "anthropic") => {
            let Some(api_key) = config.api_key.clone().filter(|k| !k.is_empty()) else {
                return Err(RegistryError::MissingApiKey {
                    id: config.id.clone(),
                });
            };
            Ok(Arc::new(HttpChatProvider::new(
                config.id.clone(),
                kind,
                config.base_url.as_deref(),
                config.model.as_deref(),
                api_key,
            )))
        }
        other => Err(RegistryError::UnknownType {
            id: config.id.clone(),
            kind: other.to_string(),
        }),
    }
}

/// Wraps an adapter and records usage into the shared [`CostTracker`]:
/// from `response.usage` after `generate`, and from any usage event seen
/// in a stream.
struct CostProxy {
    provider_id: String,
    inner: Arc<dyn Provider>,
    pricing: Option<Pricing>,
    cost: Arc<CostTracker>,
}

#[async_trait]
impl Provider for CostProxy {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let response = self.inner.generate(request).await?;
        if let Some(usage) = response.usage {
            self.cost.record(&self.provider_id, usage, self.pricing);
        }
        Ok(response)
    }

    fn supports_streaming(&self) -> bool {
        self.inner.supports_streaming()
    }

    async fn stream(
        &self,
        request: GenerateRequest,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<GenerateResponse, ProviderError> {
        let (tap_tx, mut tap_rx) = mpsc::channel::<StreamEvent>(64);
        let cost = Arc::clone(&self.cost);
        let pricing = self.pricing;
        let provider_id = self.provider_id.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = tap_rx.recv().await {
                if let StreamEvent::Usage(usage) = &event {
                    cost.record(&provider_id, *usage, pricing);
                }
                if events.send(event).await.is_err() {
                    break;
                }
            }
        });

        let result = self.inner.stream(request, tap_tx).await;
        let _ = forwarder.await;
        let response = result?;
        if let Some(usage) = response.usage {
            self.cost.record(&self.provider_id, usage, self.pricing);
        }
        Ok(response)
    }
}
