// SPDX-License-Identifier: MIT OR Apache-2.0
//! Semantic index and embedder interfaces.
//!
//! The orchestrator treats semantic search as an optional accelerator: a
//! backend implements [`SemanticIndex`], usually on top of an [`Embedder`].
//! Any failure is reported to the engine (which emits a trace event) and
//! the context build continues on lexical matches alone.

use anyhow::Result;

/// Produces fixed-size embeddings for query and snippet text.
pub trait Embedder: Send + Sync {
    /// Embed one text.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// One semantic neighbor.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticHit {
    /// Repo-relative path.
    pub path: String,
    /// 1-based anchor line (0 when unknown).
    pub line: usize,
    /// Preview text of the neighbor.
    pub preview: String,
    /// Similarity score; larger is more similar.
    pub score: f64,
}

/// Nearest-neighbor lookup over an indexed repository.
pub trait SemanticIndex: Send + Sync {
    /// Return the top-`k` neighbors for `query`.
    fn search(&self, query: &str, k: usize) -> Result<Vec<SemanticHit>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<SemanticHit>);
    impl SemanticIndex for Fixed {
        fn search(&self, _query: &str, k: usize) -> Result<Vec<SemanticHit>> {
            Ok(self.0.iter().take(k).cloned().collect())
        }
    }

    #[test]
    fn index_respects_k() {
        let hits: Vec<SemanticHit> = (0..5)
            .map(|i| SemanticHit {
                path: format!("f{i}.rs"),
                line: 1,
                preview: String::new(),
                score: 1.0,
            })
            .collect();
        let index = Fixed(hits);
        assert_eq!(index.search("q", 2).unwrap().len(), 2);
    }
}
