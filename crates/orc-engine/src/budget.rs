// SPDX-License-Identifier: MIT OR Apache-2.0
//! Budget enforcement for a run.
//!
//! Tracks wall time, completed iterations, tool invocations, and
//! accumulated provider cost against the run's [`Budget`]. `check()`
//! returns the first violated ceiling; the engine consults it at step
//! boundaries and before every provider call.

use orc_core::Budget;
use orc_providers::CostTracker;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering::Relaxed};
use std::time::Instant;

/// The first ceiling a run ran into.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetViolation {
    /// Wall-clock ceiling.
    Time {
        /// Milliseconds elapsed.
        elapsed_ms: u64,
        /// Configured ceiling.
        limit_ms: u64,
    },
    /// Iteration ceiling.
    Iterations {
        /// Iterations completed.
        used: u32,
        /// Configured ceiling.
        limit: u32,
    },
    /// Cost ceiling.
    Cost {
        /// USD accrued.
        used: f64,
        /// Configured ceiling.
        limit: f64,
    },
    /// Tool-invocation ceiling.
    Tools {
        /// Invocations so far.
        used: u32,
        /// Configured ceiling.
        limit: u32,
    },
}

impl std::fmt::Display for BudgetViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Time { elapsed_ms, limit_ms } => {
                write!(f, "time budget exceeded: {elapsed_ms}ms elapsed, limit {limit_ms}ms")
            }
            Self::Iterations { used, limit } => {
                write!(f, "iteration budget exceeded: {used} used, limit {limit}")
            }
            Self::Cost { used, limit } => {
                write!(f, "cost budget exceeded: ${used:.4} used, limit ${limit:.4}")
            }
            Self::Tools { used, limit } => {
                write!(f, "tool budget exceeded: {used} used, limit {limit}")
            }
        }
    }
}

/// Tracks one run's consumption against its budget.
pub struct BudgetTracker {
    budget: Budget,
    started: Instant,
    iterations: AtomicU32,
    tools: AtomicU32,
    cost: Arc<CostTracker>,
}

impl BudgetTracker {
    /// Start tracking now.
    pub fn start(budget: Budget, cost: Arc<CostTracker>) -> Self {
        Self {
            budget,
            started: Instant::now(),
            iterations: AtomicU32::new(0),
            tools: AtomicU32::new(0),
            cost,
        }
    }

    /// Record one completed iteration.
    pub fn record_iteration(&self) {
        self.iterations.fetch_add(1, Relaxed);
    }

    /// Record one tool invocation.
    pub fn record_tool(&self) {
        self.tools.fetch_add(1, Relaxed);
    }

    /// Iterations recorded so far.
    pub fn iterations(&self) -> u32 {
        self.iterations.load(Relaxed)
    }

    /// Return the first violated ceiling, if any.
    pub fn check(&self) -> Option<BudgetViolation> {
        if let Some(limit_ms) = self.budget.time_ms {
            let elapsed_ms = self.started.elapsed().as_millis() as u64;
            if elapsed_ms > limit_ms {
                return Some(BudgetViolation::Time { elapsed_ms, limit_ms });
            }
        }
        if let Some(limit) = self.budget.iter {
            let used = self.iterations.load(Relaxed);
            if used > limit {
                return Some(BudgetViolation::Iterations { used, limit });
            }
        }
        if let Some(limit) = self.budget.cost_usd {
            if let Some(used) = self.cost.total_cost_usd() {
                if used > limit {
                    return Some(BudgetViolation::Cost { used, limit });
                }
            }
        }
        if let Some(limit) = self.budget.tool {
            let used = self.tools.load(Relaxed);
            if used > limit {
                return Some(BudgetViolation::Tools { used, limit });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_providers::TokenUsage;

    fn tracker(budget: Budget) -> BudgetTracker {
        BudgetTracker::start(budget, Arc::new(CostTracker::new()))
    }

    #[test]
    fn fresh_tracker_is_within_budget() {
        assert!(tracker(Budget::default()).check().is_none());
    }

    #[test]
    fn iteration_ceiling_trips() {
        let t = tracker(Budget {
            iter: Some(2),
            time_ms: None,
            cost_usd: None,
            tool: None,
        });
        t.record_iteration();
        t.record_iteration();
        assert!(t.check().is_none());
        t.record_iteration();
        assert!(matches!(
            t.check(),
            Some(BudgetViolation::Iterations { used: 3, limit: 2 })
        ));
    }

    #[test]
    fn tool_ceiling_trips() {
        let t = tracker(Budget {
            iter: None,
            time_ms: None,
            cost_usd: None,
            tool: Some(1),
        });
        t.record_tool();
        t.record_tool();
        assert!(matches!(t.check(), Some(BudgetViolation::Tools { .. })));
    }

    #[test]
    fn time_ceiling_trips() {
        let t = tracker(Budget {
            iter: None,
            time_ms: Some(1),
            cost_usd: None,
            tool: None,
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(matches!(t.check(), Some(BudgetViolation::Time { .. })));
    }

    #[test]
    fn cost_ceiling_uses_tracked_spend() {
        let cost = Arc::new(CostTracker::new());
        let t = BudgetTracker::start(
            Budget {
                iter: None,
                time_ms: None,
                cost_usd: Some(0.5),
                tool: None,
            },
            Arc::clone(&cost),
        );
        assert!(t.check().is_none());
        cost.record(
            "p",
            TokenUsage {
                input_tokens: 1_000_000,
                output_tokens: 0,
                total_tokens: 1_000_000,
            },
            Some(orc_core::cost::Pricing {
                input_per_mtok_usd: Some(1.0),
                output_per_mtok_usd: None,
            }),
        );
        assert!(matches!(t.check(), Some(BudgetViolation::Cost { .. })));
    }
}
