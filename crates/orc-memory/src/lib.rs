// SPDX-License-Identifier: MIT OR Apache-2.0
//! orc-memory
//!
//! Episodic memory: one JSON record per finished run, searched by keyword
//! overlap with stale downranking, optionally encrypted at rest with
//! AES-256-GCM. The engine opens the store per search and swallows every
//! write failure; memory must never take a run down.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod crypt;

pub use crypt::Cipher;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Age beyond which an episode is considered stale.
const STALE_AFTER_DAYS: i64 = 30;

/// One episodic record of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    /// Run id the episode came from.
    pub id: String,
    /// When the episode was written.
    pub created_at: DateTime<Utc>,
    /// Goal of the run.
    pub goal: String,
    /// Outcome summary line.
    pub summary: String,
    /// Terminal status (`success` / `failure`).
    pub status: String,
    /// Failure signature, when the run ended failing verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_signature: Option<String>,
    /// Artifact paths worth revisiting (patches, reports).
    #[serde(default)]
    pub artifact_paths: Vec<String>,
}

/// A search hit with its relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryHit {
    /// The matching episode.
    pub record: EpisodeRecord,
    /// Relevance; higher is better.
    pub score: f64,
}

impl MemoryHit {
    /// Render the hit as one fused-context paragraph.
    pub fn to_context_paragraph(&self) -> String {
        format!(
            "[{} {}] {} — {}",
            self.record.created_at.format("%Y-%m-%d"),
            self.record.status,
            self.record.goal,
            self.record.summary
        )
    }
}

/// Memory backend interface.
pub trait MemoryStore: Send + Sync {
    /// Return the `top_k` most relevant episodes for `query`.
    fn search(&self, query: &str, top_k: usize) -> Result<Vec<MemoryHit>>;

    /// Persist one episode.
    fn write_episode(&self, record: &EpisodeRecord) -> Result<()>;
}

/// File-based store: one JSON file per episode under `<root>/episodes/`.
pub struct JsonMemoryStore {
    root: PathBuf,
    stale_downrank: f64,
    cipher: Option<Cipher>,
}

impl JsonMemoryStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, stale_downrank: f64) -> Self {
        Self {
            root: root.into(),
            stale_downrank,
            cipher: None,
        }
    }

    /// Encrypt episode payloads at rest.
    pub fn with_cipher(mut self, cipher: Cipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    fn episodes_dir(&self) -> PathBuf {
        self.root.join("episodes")
    }

    fn load_all(&self) -> Result<Vec<EpisodeRecord>> {
        let dir = self.episodes_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("read episodes dir {}", dir.display())));
            }
        };
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.path().extension().is_none_or(|e| e != "json") {
                continue;
            }
            let raw = std::fs::read(entry.path())
                .with_context(|| format!("read episode {}", entry.path().display()))?;
            let plaintext = match &self.cipher {
                Some(cipher) => cipher.open(&raw)?,
                None => raw,
            };
            match serde_json::from_slice::<EpisodeRecord>(&plaintext) {
                Ok(record) => records.push(record),
                Err(e) => debug!(path = %entry.path().display(), error = %e, "skipping unreadable episode"),
            }
        }
        Ok(records)
    }
}

impl MemoryStore for JsonMemoryStore {
    fn search(&self, query: &str, top_k: usize) -> Result<Vec<MemoryHit>> {
        let keywords: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| w.len() >= 3)
            .map(|w| w.to_lowercase())
            .collect();
        let now = Utc::now();
        let mut hits: Vec<MemoryHit> = self
            .load_all()?
            .into_iter()
            .filter_map(|record| {
                let haystack =
                    format!("{} {}", record.goal, record.summary).to_lowercase();
                let overlap = keywords
                    .iter()
                    .filter(|k| haystack.contains(k.as_str()))
                    .count();
                if overlap == 0 {
                    return None;
                }
                let mut score = overlap as f64;
                let age_days = (now - record.created_at).num_days();
                if age_days > STALE_AFTER_DAYS {
                    score *= self.stale_downrank;
                }
                Some(MemoryHit { record, score })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    fn write_episode(&self, record: &EpisodeRecord) -> Result<()> {
        let dir = self.episodes_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create episodes dir {}", dir.display()))?;
        let plaintext = serde_json::to_vec_pretty(record)?;
        let payload = match &self.cipher {
            Some(cipher) => cipher.seal(&plaintext)?,
            None => plaintext,
        };
        let path = dir.join(format!("{}.json", record.id));
        std::fs::write(&path, payload)
            .with_context(|| format!("write episode {}", path.display()))?;
        debug!(path = %path.display(), "episode written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, goal: &str, age_days: i64) -> EpisodeRecord {
        EpisodeRecord {
            id: id.into(),
            created_at: Utc::now() - chrono::Duration::days(age_days),
            goal: goal.into(),
            summary: "did things".into(),
            status: "success".into(),
            failure_signature: None,
            artifact_paths: vec![],
        }
    }

    #[test]
    fn write_then_search_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMemoryStore::new(dir.path(), 0.5);
        store.write_episode(&record("r1", "fix the login bug", 0)).unwrap();
        store.write_episode(&record("r2", "add pagination", 0)).unwrap();

        let hits = store.search("login failure", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "r1");
    }

    #[test]
    fn stale_episodes_are_downranked() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMemoryStore::new(dir.path(), 0.1);
        store.write_episode(&record("old", "fix login", 90)).unwrap();
        store.write_episode(&record("new", "fix login", 1)).unwrap();

        let hits = store.search("login", 5).unwrap();
        assert_eq!(hits[0].record.id, "new");
        assert!(hits[1].score < hits[0].score);
    }

    #[test]
    fn top_k_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMemoryStore::new(dir.path(), 0.5);
        for i in 0..5 {
            store.write_episode(&record(&format!("r{i}"), "refactor parser", 0)).unwrap();
        }
        assert_eq!(store.search("parser", 2).unwrap().len(), 2);
    }

    #[test]
    fn missing_store_searches_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMemoryStore::new(dir.path().join("never-created"), 0.5);
        assert!(store.search("anything", 5).unwrap().is_empty());
    }

    #[test]
    fn encrypted_roundtrip_and_opaque_at_rest() {
        let dir = tempfile::tempdir().unwrap();
        let key = [7u8; 32];
        let store =
            JsonMemoryStore::new(dir.path(), 0.5).with_cipher(Cipher::from_key_bytes(&key).unwrap());
        store.write_episode(&record("enc", "secret goal text", 0)).unwrap();

        let raw = std::fs::read(dir.path().join("episodes/enc.json")).unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("secret goal text"));

        let hits = store.search("secret goal", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "enc");
    }

    #[test]
    fn hit_renders_context_paragraph() {
        let hit = MemoryHit {
            record: record("r", "fix login", 0),
            score: 1.0,
        };
        let paragraph = hit.to_context_paragraph();
        assert!(paragraph.contains("fix login"));
        assert!(paragraph.contains("success"));
    }
}
