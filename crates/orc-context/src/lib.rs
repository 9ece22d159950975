// SPDX-License-Identifier: MIT OR Apache-2.0
//! orc-context
//!
//! Turns a repository plus a query into a *fused context*: scan the tree,
//! search it lexically (ripgrep when available) and semantically (when an
//! index is configured), expand hits into windowed snippets, pack them
//! under a token budget, and fuse the result into budgeted prompt
//! sections. Deterministic given identical inputs and budgets.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Section fusion with byte budgets.
pub mod fuse;
/// Greedy packing under a token budget.
pub mod pack;
/// Repository file enumeration.
pub mod scan;
/// Lexical search (ripgrep subprocess or internal fallback).
pub mod search;
/// Semantic index and embedder interfaces.
pub mod semantic;
/// Match expansion into windowed snippets.
pub mod snippet;

pub use fuse::{FusedContext, FusionInput, fuse_sections};
pub use pack::{PackedItem, pack_snippets};
pub use scan::{RepoScanner, ScanOptions};
pub use search::{SearchMatch, lexical_search};
pub use semantic::{Embedder, SemanticHit, SemanticIndex};
pub use snippet::{Snippet, expand_matches};

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Errors from context building.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// Filesystem traversal or read failure.
    #[error("context io error on {path}: {detail}")]
    Io {
        /// Path that failed.
        path: String,
        /// Failure description.
        detail: String,
    },
    /// Invalid exclude glob in configuration.
    #[error("invalid exclude pattern '{pattern}': {detail}")]
    BadPattern {
        /// Offending pattern.
        pattern: String,
        /// Compile error.
        detail: String,
    },
}

/// Tuning for one context build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Token budget for the packed snippet set.
    pub token_budget: usize,
    /// Exclude globs (on top of the built-in ones).
    pub exclude: Vec<String>,
    /// Explicit ripgrep path; `rg` from PATH otherwise.
    pub rg_path: Option<String>,
    /// Per-file cap on lexical matches.
    pub max_matches_per_file: usize,
    /// Semantic neighbors to request, when an index is present.
    pub semantic_top_k: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            token_budget: 8_000,
            exclude: Vec::new(),
            rg_path: None,
            max_matches_per_file: 5,
            semantic_top_k: 5,
        }
    }
}

/// Result of one context build.
pub struct BuiltContext {
    /// The fused prompt text and its metadata.
    pub fused: FusedContext,
    /// Items that made it into the pack, in pack order.
    pub items: Vec<PackedItem>,
    /// Files enumerated by the scan.
    pub file_count: usize,
    /// Error from the semantic stage, when it was configured and failed.
    /// The build continues without semantic hits.
    pub semantic_error: Option<String>,
}

/// Builds fused contexts for queries against one repository.
pub struct ContextBuilder {
    repo_root: std::path::PathBuf,
    options: BuildOptions,
    semantic: Option<Arc<dyn SemanticIndex>>,
}

impl ContextBuilder {
    /// Create a builder for `repo_root`.
    pub fn new(repo_root: impl Into<std::path::PathBuf>, options: BuildOptions) -> Self {
        Self {
            repo_root: repo_root.into(),
            options,
            semantic: None,
        }
    }

    /// Attach a semantic index. Failures during search are reported, not
    /// fatal.
    pub fn with_semantic(mut self, index: Arc<dyn SemanticIndex>) -> Self {
        self.semantic = Some(index);
        self
    }

    /// Build a fused context for `query`.
    ///
    /// `carry_over` paths (files touched earlier in the run) are injected
    /// as high-priority matches. `memory` and `signals` become their own
    /// fused sections.
    pub fn build(
        &self,
        goal: &str,
        query: &str,
        carry_over: &[String],
        memory: &[String],
        signals: &[String],
    ) -> Result<BuiltContext, ContextError> {
        let scanner = RepoScanner::new(
            &self.repo_root,
            ScanOptions {
                exclude: self.options.exclude.clone(),
            },
        )?;
        let files = scanner.list_files()?;
        debug!(files = files.len(), "repo scan complete");

        let mut matches = lexical_search(
            &self.repo_root,
            &files,
            query,
            self.options.rg_path.as_deref(),
            self.options.max_matches_per_file,
        );

        // Carry-over files rank above everything found by search.
        for path in carry_over {
            if files.iter().any(|f| f == path) {
                matches.insert(
                    0,
                    SearchMatch {
                        path: path.clone(),
                        line: 1,
                        text: String::new(),
                        score: f64::MAX,
                        reason: "carry-over".into(),
                    },
                );
            }
        }

        let mut semantic_error = None;
        if let Some(index) = &self.semantic {
            match index.search(query, self.options.semantic_top_k) {
                Ok(hits) => {
                    for hit in hits {
                        matches.push(SearchMatch {
                            path: hit.path,
                            line: hit.line.max(1),
                            text: hit.preview,
                            score: hit.score,
                            reason: "semantic".into(),
                        });
                    }
                }
                Err(e) => {
                    warn!(error = %e, "semantic search failed; continuing without");
                    semantic_error = Some(e.to_string());
                }
            }
        }

        let snippets = expand_matches(&self.repo_root, &matches);
        let items = pack_snippets(snippets, self.options.token_budget);
        let fused = fuse_sections(&FusionInput {
            goal: goal.to_string(),
            items: items.clone(),
            memory: memory.to_vec(),
            signals: signals.to_vec(),
            ..Default::default()
        });

        Ok(BuiltContext {
            fused,
            items,
            file_count: files.len(),
            semantic_error,
        })
    }

    /// Repository root this builder reads.
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }
}
