// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-provider token and dollar accumulation.

use crate::TokenUsage;
use orc_core::cost::{CostTotals, Pricing, ProviderUsage};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Thread-safe accumulator shared by every cost proxy in a run.
#[derive(Debug, Default)]
pub struct CostTracker {
    inner: Mutex<BTreeMap<String, ProviderUsage>>,
}

impl CostTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call's usage for `provider_id` under optional pricing.
    pub fn record(&self, provider_id: &str, usage: TokenUsage, pricing: Option<Pricing>) {
        let mut inner = self.inner.lock().expect("cost tracker lock poisoned");
        let entry = inner.entry(provider_id.to_string()).or_default();
        entry.input_tokens += usage.input_tokens;
        entry.output_tokens += usage.output_tokens;
        entry.total_tokens += usage.total_tokens;
        if let Some(pricing) = pricing {
            if let Some(delta) = pricing.cost_of(usage.input_tokens, usage.output_tokens) {
                *entry.estimated_cost_usd.get_or_insert(0.0) += delta;
            }
        }
    }

    /// Snapshot of per-provider usage and cross-provider totals.
    pub fn totals(&self) -> CostTotals {
        let per_provider = self.inner.lock().expect("cost tracker lock poisoned").clone();
        let mut totals = CostTotals {
            per_provider,
            total: ProviderUsage::default(),
        };
        totals.recompute();
        totals
    }

    /// Total estimated spend, for budget checks. `None` when no component
    /// has pricing.
    pub fn total_cost_usd(&self) -> Option<f64> {
        self.totals().total.estimated_cost_usd
    }
}
