// SPDX-License-Identifier: MIT OR Apache-2.0
//! Trace writer and in-process event bus.
//!
//! One writer per run owns `trace.jsonl`. Emission is totally ordered by
//! the writer's mutex, and every record is flushed before `emit` returns,
//! so any state transition that depends on an event observes it durable.
//! Components never write the file directly; they emit through this bus.
//! An optional tap receives each event in-process (CLI verbose output).

use anyhow::{Context, Result};
use orc_core::event::{RunEvent, RunEventKind};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

/// In-process observer of emitted events.
pub type EventTap = Box<dyn Fn(&RunEvent) + Send + Sync>;

/// Append-only, flush-on-emit trace writer.
pub struct TraceBus {
    run_id: String,
    file: Mutex<File>,
    redact: bool,
    tap: Option<EventTap>,
}

impl TraceBus {
    /// Open (creating) the trace file for a run.
    pub fn open(path: &Path, run_id: impl Into<String>, redact: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open trace {}", path.display()))?;
        Ok(Self {
            run_id: run_id.into(),
            file: Mutex::new(file),
            redact,
            tap: None,
        })
    }

    /// Attach an in-process observer.
    pub fn with_tap(mut self, tap: EventTap) -> Self {
        self.tap = Some(tap);
        self
    }

    /// Emit one event: serialize, optionally redact, append, flush.
    ///
    /// Emission never panics the run; an io failure is logged and the
    /// event is still delivered to the tap.
    pub fn emit(&self, kind: RunEventKind) {
        let event = RunEvent::now(self.run_id.clone(), kind);
        if let Err(e) = self.write_record(&event) {
            warn!(error = %e, "trace write failed");
        }
        if let Some(tap) = &self.tap {
            tap(&event);
        }
    }

    fn write_record(&self, event: &RunEvent) -> Result<()> {
        let mut value = serde_json::to_value(event)?;
        if self.redact {
            redact_value(&mut value);
        }
        let line = serde_json::to_string(&value)?;
        let mut file = self.file.lock().expect("trace lock poisoned");
        writeln!(file, "{line}")?;
        // Durable before any dependent transition.
        file.flush()?;
        file.sync_data().ok();
        Ok(())
    }
}

/// Keys whose values are replaced when redaction is on.
const SECRET_KEY_HINTS: &[&str] = &["api_key", "apikey", "token", "secret", "authorization", "password"];

fn redact_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                let lower = key.to_lowercase();
                if SECRET_KEY_HINTS.iter().any(|hint| lower.contains(hint)) {
                    *entry = serde_json::Value::String("[REDACTED]".into());
                } else {
                    redact_value(entry);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                redact_value(item);
            }
        }
        serde_json::Value::String(s) => {
            if s.contains("sk-") {
                *s = redact_inline_keys(s);
            }
        }
        _ => {}
    }
}

/// Replace `sk-…` looking substrings while keeping surrounding text.
fn redact_inline_keys(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            if word.starts_with("sk-") && word.len() > 8 {
                "[REDACTED]"
            } else {
                word
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_core::{RunStatus, StopReason};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn events_append_in_emission_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let bus = TraceBus::open(&path, "r", false).unwrap();
        bus.emit(RunEventKind::RunStopped {
            reason: StopReason::Cancelled,
            detail: "first".into(),
        });
        bus.emit(RunEventKind::RunFinished {
            status: RunStatus::Failure,
            summary: "second".into(),
        });
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "run_stopped");
        assert_eq!(lines[1]["type"], "run_finished");
        assert_eq!(lines[1]["schema_version"], 1);
    }

    #[test]
    fn tap_sees_every_event() {
        let dir = tempfile::tempdir().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let tap_count = Arc::clone(&count);
        let bus = TraceBus::open(&dir.path().join("t.jsonl"), "r", false)
            .unwrap()
            .with_tap(Box::new(move |_| {
                tap_count.fetch_add(1, Ordering::SeqCst);
            }));
        bus.emit(RunEventKind::SemanticSearchFailed { error: "x".into() });
        bus.emit(RunEventKind::SemanticSearchFailed { error: "y".into() });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn redaction_scrubs_secret_keys_and_inline_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let bus = TraceBus::open(&path, "r", true).unwrap();
        bus.emit(RunEventKind::ProviderCallFailed {
            provider_id: "p".into(),
            error: "auth failed for sk-live-123456789".into(),
        });
        let lines = read_lines(&path);
        let body = lines[0].to_string();
        assert!(!body.contains("sk-live-123456789"));
        assert!(body.contains("[REDACTED]"));
    }

    #[test]
    fn timestamps_are_monotone_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let bus = TraceBus::open(&path, "r", false).unwrap();
        for i in 0..5 {
            bus.emit(RunEventKind::SemanticSearchFailed {
                error: format!("e{i}"),
            });
        }
        let lines = read_lines(&path);
        let stamps: Vec<&str> = lines
            .iter()
            .map(|l| l["timestamp"].as_str().unwrap())
            .collect();
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted);
    }
}
