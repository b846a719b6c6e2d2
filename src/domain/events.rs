//! Run events emitted by the controller.
//!
//! Every run writes an append-only event trail. The trail is what external
//! metrics collection consumes and what `status` replays.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::run::{FailureCause, RunState, ScanType, Stage, StageTiming};
use super::source::SourceId;

/// A single event in a run's log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub event_type: EventType,

    /// Human-readable summary
    pub payload_summary: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_type: Option<ScanType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_count: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<FailureCause>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Event {
    pub fn new(run_id: Uuid, event_type: EventType, payload_summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            event_type,
            payload_summary: payload_summary.into(),
            scan_type: None,
            stage: None,
            source: None,
            duration_ms: None,
            error_count: None,
            cause: None,
            error: None,
        }
    }

    pub fn with_scan_type(mut self, scan_type: ScanType) -> Self {
        self.scan_type = Some(scan_type);
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_source(mut self, source: SourceId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error_count(mut self, count: usize) -> Self {
        self.error_count = Some(count);
        self
    }

    pub fn with_cause(mut self, cause: FailureCause) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.event_type, EventType::RunSucceeded | EventType::RunFailed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    StageStarted,
    StageCompleted,
    StageFailed,
    SourceRetrying,
    SourceFailed,
    RunSucceeded,
    RunFailed,
}

/// Run state as reconstructed from its event trail
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub run_id: Uuid,
    pub scan_type: Option<ScanType>,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stage_timings: Vec<StageTiming>,
    pub degraded_sources: Vec<SourceId>,
}

impl RunStatus {
    /// Replay events in order
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first = events.first()?;

        let mut status = Self {
            run_id: first.run_id,
            scan_type: None,
            state: RunState::Pending,
            started_at: first.timestamp,
            completed_at: None,
            stage_timings: Vec::new(),
            degraded_sources: Vec::new(),
        };

        for event in events {
            status.apply_event(event);
        }

        Some(status)
    }

    pub fn apply_event(&mut self, event: &Event) {
        match event.event_type {
            EventType::RunStarted => {
                self.state = RunState::Pending;
                self.started_at = event.timestamp;
                self.scan_type = event.scan_type;
            }
            EventType::StageStarted => {
                self.state = match event.stage {
                    Some(Stage::Collecting) => RunState::Collecting,
                    Some(Stage::Analyzing) => RunState::Analyzing,
                    Some(Stage::Assembling) => RunState::Assembling,
                    None => self.state.clone(),
                };
            }
            EventType::StageCompleted | EventType::StageFailed => {
                if let (Some(stage), Some(duration_ms)) = (event.stage, event.duration_ms) {
                    self.stage_timings.push(StageTiming {
                        stage,
                        duration_ms,
                        error_count: event.error_count.unwrap_or(0),
                    });
                }
            }
            EventType::SourceRetrying => {}
            EventType::SourceFailed => {
                if let Some(source) = event.source {
                    if !self.degraded_sources.contains(&source) {
                        self.degraded_sources.push(source);
                    }
                }
            }
            EventType::RunSucceeded => {
                self.state = RunState::Succeeded;
                self.completed_at = Some(event.timestamp);
            }
            EventType::RunFailed => {
                self.state = RunState::Failed {
                    stage: event.stage,
                    cause: event.cause.unwrap_or(FailureCause::AnalysisFailed),
                    error: event.error.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}
