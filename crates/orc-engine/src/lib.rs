// SPDX-License-Identifier: MIT OR Apache-2.0
//! orc-engine
//!
//! The tiered run engine: everything stateful that happens between "here
//! is a goal" and "here is a verified change set with its artifacts".
//!
//! Responsibilities:
//! - per-run artifact directory, manifest, and patch store
//! - append-only trace with flush-before-transition ordering
//! - budgets, cancellation, cost attribution
//! - plan service, execution service, review loop
//! - L3 candidate generation/evaluation/selection and diagnosis
//! - the L0–L3 state machines with escalation and shared finalization

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Per-run artifact directory, manifest handle, and patch store.
pub mod artifacts;
/// Budget enforcement.
pub mod budget;
/// Run cancellation.
pub mod cancel;
/// L3 candidate generation, evaluation, and selection.
pub mod candidates;
/// Diagnoser (L3).
pub mod diagnose;
/// Offline scenario evaluation.
pub mod eval;
/// Execution service.
pub mod execute;
/// Plan service.
pub mod planner;
/// Prompt builders.
pub mod prompts;
/// Review loop.
pub mod review;
/// The tiered run engine.
pub mod run;
/// Trace writer and event bus.
pub mod trace;

pub use cancel::CancellationToken;
pub use run::{RunOptions, plan_only, run};

/// Engine-level errors.
///
/// Config and registry problems are fatal at command start (exit code 2);
/// everything else the engine recovers from locally and reports through
/// the run summary instead of this type.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration is invalid or incomplete.
    #[error(transparent)]
    Config(#[from] orc_config::ConfigError),

    /// A provider could not be resolved or constructed.
    #[error(transparent)]
    Registry(#[from] orc_providers::RegistryError),

    /// A provider call failed where the engine cannot recover locally
    /// (planning).
    #[error(transparent)]
    Provider(#[from] orc_providers::ProviderError),

    /// Context building failed.
    #[error(transparent)]
    Context(#[from] orc_context::ContextError),

    /// Filesystem or git plumbing failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Process exit code this error maps to (`2` for config/registry).
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Registry(_) => 2,
            _ => 1,
        }
    }
}
