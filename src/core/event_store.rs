//! Append-only run event log.
//!
//! `EventStore` persists events as newline-delimited JSON under
//! `<base>/<run_id>/events.jsonl`. `MemoryEventLog` keeps them in process.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;
use uuid::Uuid;

use crate::domain::Event;

/// Destination for run events
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, event: &Event) -> Result<()>;

    /// All events of a run, in append order
    async fn replay(&self, run_id: Uuid) -> Result<Vec<Event>>;

    /// IDs of every run with at least one event
    async fn list_runs(&self) -> Result<Vec<Uuid>>;
}

/// Append an event, logging instead of failing. Observability never changes a run's outcome.
pub async fn record(log: &dyn EventLog, event: Event) {
    if let Err(e) = log.append(&event).await {
        warn!(
            run_id = %event.run_id,
            event_type = ?event.event_type,
            error = %e,
            "Failed to record run event"
        );
    }
}

/// File-based event store using JSONL format
pub struct EventStore {
    base_dir: PathBuf,
}

impl EventStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Store rooted at the configured runs directory
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::config::runs_dir()?))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn events_path(&self, run_id: Uuid) -> PathBuf {
        self.base_dir.join(run_id.to_string()).join("events.jsonl")
    }
}

#[async_trait]
impl EventLog for EventStore {
    async fn append(&self, event: &Event) -> Result<()> {
        let events_path = self.events_path(event.run_id);
        if let Some(run_dir) = events_path.parent() {
            fs::create_dir_all(run_dir)
                .await
                .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", events_path.display()))?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    async fn replay(&self, run_id: Uuid) -> Result<Vec<Event>> {
        let events_path = self.events_path(run_id);
        if !events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", events_path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    async fn list_runs(&self) -> Result<Vec<Uuid>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir)
            .await
            .with_context(|| format!("Failed to read runs directory: {}", self.base_dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        runs.push(uuid);
                    }
                }
            }
        }

        Ok(runs)
    }
}

/// In-process event log
#[derive(Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event recorded so far, across runs
    pub fn all(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, event: &Event) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("Event log lock poisoned"))?
            .push(event.clone());
        Ok(())
    }

    async fn replay(&self, run_id: Uuid) -> Result<Vec<Event>> {
        Ok(self
            .all()
            .into_iter()
            .filter(|e| e.run_id == run_id)
            .collect())
    }

    async fn list_runs(&self) -> Result<Vec<Uuid>> {
        let mut runs: Vec<Uuid> = Vec::new();
        for event in self.all() {
            if !runs.contains(&event.run_id) {
                runs.push(event.run_id);
            }
        }
        Ok(runs)
    }
}
