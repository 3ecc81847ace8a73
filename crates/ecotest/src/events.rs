//! Append-only JSONL event log for one run, mirroring a publish-style audit
//! trail: every state transition a package goes through is recorded as it
//! happens so a run can be reconstructed from `events.jsonl` alone.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::TestResultKind;

pub const EVENTS_FILE: &str = "events.jsonl";

pub fn events_path(log_dir: &Path) -> PathBuf {
    log_dir.join(EVENTS_FILE)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    RunStarted { vertex_count: usize, worker_count: usize },
    PackageScheduled,
    PackageStarted,
    PackageFinished { result: TestResultKind, duration_ms: u128 },
    PackageSkipped { failed_dependency: String },
    DependencyCycleBroken { from: String, to: String },
    UnloadableDependencyMetadata { package: String },
    RunFinished { passed: usize, failed: usize, timed_out: usize, skipped: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub timestamp: DateTime<Utc>,
    pub package: String,
    pub kind: EventKind,
}

/// In-memory event buffer; flushed to disk with [`EventLog::write_to_file`].
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<RunEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn record(&mut self, package: impl Into<String>, kind: EventKind) {
        self.events.push(RunEvent {
            timestamp: Utc::now(),
            package: package.into(),
            kind,
        });
    }

    /// Append every buffered event to `path` in JSONL format, then clear the
    /// buffer. Safe to call repeatedly over the life of a run.
    pub fn flush_to_file(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create events dir {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        let mut writer = std::io::BufWriter::new(file);

        for event in &self.events {
            let line = serde_json::to_string(event).context("failed to serialize event")?;
            writeln!(writer, "{line}").context("failed to write event line")?;
        }
        writer.flush().context("failed to flush events file")?;
        self.events.clear();
        Ok(())
    }

    pub fn read_from_file(path: &Path) -> Result<Vec<RunEvent>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line.context("failed to read events line")?;
            events.push(serde_json::from_str(&line).context("failed to parse event JSON")?);
        }
        Ok(events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The buffered events in recording order, for tests that assert on
    /// exact event shapes rather than just the flushed JSONL file.
    #[cfg(test)]
    pub fn events_for_test(&self) -> &[RunEvent] {
        &self.events
    }
}
