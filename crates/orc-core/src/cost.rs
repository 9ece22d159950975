// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-provider token and cost accounting types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Accumulated usage for a single provider.
///
/// `estimated_cost_usd` is `None` when no pricing is configured for the
/// provider, numeric otherwise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProviderUsage {
    /// Prompt tokens consumed.
    pub input_tokens: u64,
    /// Completion tokens produced.
    pub output_tokens: u64,
    /// Combined token count.
    pub total_tokens: u64,
    /// Estimated spend in USD, when pricing is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost_usd: Option<f64>,
}

/// Per-MTok unit prices for one provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Pricing {
    /// USD per million input tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_per_mtok_usd: Option<f64>,
    /// USD per million output tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_per_mtok_usd: Option<f64>,
}

impl Pricing {
    /// `true` when at least one dimension has a unit price.
    pub fn is_configured(&self) -> bool {
        self.input_per_mtok_usd.is_some() || self.output_per_mtok_usd.is_some()
    }

    /// Cost of a token delta under this pricing: the sum over dimensions
    /// that have a unit price, `(tokens / 1e6) * unit`.
    pub fn cost_of(&self, input_tokens: u64, output_tokens: u64) -> Option<f64> {
        if !self.is_configured() {
            return None;
        }
        let mut total = 0.0;
        if let Some(unit) = self.input_per_mtok_usd {
            total += input_tokens as f64 / 1e6 * unit;
        }
        if let Some(unit) = self.output_per_mtok_usd {
            total += output_tokens as f64 / 1e6 * unit;
        }
        Some(total)
    }
}

/// Cross-provider totals for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CostTotals {
    /// Per-provider accumulations, keyed by provider id.
    pub per_provider: BTreeMap<String, ProviderUsage>,
    /// Sum over providers. `estimated_cost_usd` is `None` iff every
    /// component is `None`; otherwise the sum of the non-null components.
    pub total: ProviderUsage,
}

impl CostTotals {
    /// Recompute `total` from `per_provider`.
    pub fn recompute(&mut self) {
        let mut total = ProviderUsage::default();
        for usage in self.per_provider.values() {
            total.input_tokens += usage.input_tokens;
            total.output_tokens += usage.output_tokens;
            total.total_tokens += usage.total_tokens;
            if let Some(cost) = usage.estimated_cost_usd {
                *total.estimated_cost_usd.get_or_insert(0.0) += cost;
            }
        }
        self.total = total;
    }
}
