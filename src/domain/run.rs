//! Workflow run state and its transition rules.
//!
//! A WorkflowRun is one execution of collect -> analyze -> assemble.
//! Only the controller mutates it, and it is frozen once terminal.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::source::{SourceError, SourceId};

/// Cadence of the scan that triggered a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    Daily,
    Weekly,
    Monthly,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run-start request from the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTrigger {
    pub scan_type: ScanType,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// US symbols, in order
    #[serde(default)]
    pub stock_tickers: Vec<String>,

    /// Regional-exchange symbols, in order
    #[serde(default)]
    pub nse_tickers: Vec<String>,

    #[serde(default)]
    pub deep_analysis: bool,

    #[serde(default)]
    pub rebalancing: bool,
}

impl RunTrigger {
    pub fn new(scan_type: ScanType) -> Self {
        Self {
            scan_type,
            timestamp: None,
            stock_tickers: Vec::new(),
            nse_tickers: Vec::new(),
            deep_analysis: false,
            rebalancing: false,
        }
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        use anyhow::Context;
        serde_json::from_str(content).context("Failed to parse run trigger JSON")
    }
}

/// Stages a run moves through, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Collecting,
    Analyzing,
    Assembling,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Collecting => "collecting",
            Self::Analyzing => "analyzing",
            Self::Assembling => "assembling",
        };
        f.write_str(s)
    }
}

/// Why a run ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    AllSourcesFailed,
    CollectionDeadlineExceeded,
    AnalysisFailed,
    RunTimeout,
    DeliveryFailed,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AllSourcesFailed => "all_sources_failed",
            Self::CollectionDeadlineExceeded => "collection_deadline_exceeded",
            Self::AnalysisFailed => "analysis_failed",
            Self::RunTimeout => "run_timeout",
            Self::DeliveryFailed => "delivery_failed",
        };
        f.write_str(s)
    }
}

/// Stage-level error; always fatal for the run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("All {failed} source(s) failed or returned no records")]
    AllSourcesFailed { failed: usize },

    #[error("Collection deadline of {deadline_ms}ms exceeded with no usable records")]
    CollectionDeadlineExceeded { deadline_ms: u64 },

    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("Run timeout: exceeded {limit_seconds}s")]
    RunTimeout { limit_seconds: u64 },

    #[error("Digest delivery failed: {0}")]
    DeliveryFailed(String),
}

impl StageError {
    pub fn cause(&self) -> FailureCause {
        match self {
            Self::AllSourcesFailed { .. } => FailureCause::AllSourcesFailed,
            Self::CollectionDeadlineExceeded { .. } => FailureCause::CollectionDeadlineExceeded,
            Self::AnalysisFailed(_) => FailureCause::AnalysisFailed,
            Self::RunTimeout { .. } => FailureCause::RunTimeout,
            Self::DeliveryFailed(_) => FailureCause::DeliveryFailed,
        }
    }
}

/// State of a workflow run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    Pending,
    Collecting,
    Analyzing,
    Assembling,
    Succeeded,

    /// `stage` is None when the run failed before entering any stage
    Failed {
        stage: Option<Stage>,
        cause: FailureCause,
        error: String,
    },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. })
    }

    /// Stage this state represents, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Collecting => Some(Stage::Collecting),
            Self::Analyzing => Some(Stage::Analyzing),
            Self::Assembling => Some(Stage::Assembling),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Collecting => "collecting",
            Self::Analyzing => "analyzing",
            Self::Assembling => "assembling",
            Self::Succeeded => "succeeded",
            Self::Failed { .. } => "failed",
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid run transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: String,
    pub to: String,
}

/// Run options handed to the analyzer alongside the dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub run_id: Uuid,
    pub scan_type: ScanType,
    pub deep_analysis: bool,
    pub rebalancing: bool,
}

impl AnalysisContext {
    pub fn new(scan_type: ScanType) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            scan_type,
            deep_analysis: false,
            rebalancing: false,
        }
    }

    pub fn with_deep_analysis(mut self, deep: bool) -> Self {
        self.deep_analysis = deep;
        self
    }
}

/// Duration and error count of one completed (or failed) stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub duration_ms: u64,
    pub error_count: usize,
}

/// One execution of the scan pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub scan_type: ScanType,

    /// Query keys per source, resolved from the trigger
    pub inputs: BTreeMap<SourceId, Vec<String>>,

    pub deep_analysis: bool,
    pub rebalancing: bool,

    /// Scheduler timestamp, if the trigger carried one
    pub triggered_at: Option<DateTime<Utc>>,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    state: RunState,

    /// Sources that failed during collection
    pub degraded_sources: Vec<SourceError>,

    pub stage_timings: Vec<StageTiming>,
}

impl WorkflowRun {
    pub fn new(trigger: &RunTrigger, inputs: BTreeMap<SourceId, Vec<String>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scan_type: trigger.scan_type,
            inputs,
            deep_analysis: trigger.deep_analysis,
            rebalancing: trigger.rebalancing,
            triggered_at: trigger.timestamp,
            started_at: Utc::now(),
            completed_at: None,
            state: RunState::Pending,
            degraded_sources: Vec::new(),
            stage_timings: Vec::new(),
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Trigger options the analyzer needs for this run
    pub fn analysis_context(&self) -> AnalysisContext {
        AnalysisContext {
            run_id: self.id,
            scan_type: self.scan_type,
            deep_analysis: self.deep_analysis,
            rebalancing: self.rebalancing,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Succeeded
    }

    pub fn failure_cause(&self) -> Option<FailureCause> {
        match &self.state {
            RunState::Failed { cause, .. } => Some(*cause),
            _ => None,
        }
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        match &self.state {
            RunState::Failed { stage, .. } => *stage,
            _ => None,
        }
    }

    /// Move into the given stage. Only the next stage in order is allowed.
    pub fn enter(&mut self, stage: Stage) -> Result<(), TransitionError> {
        let next = match (&self.state, stage) {
            (RunState::Pending, Stage::Collecting) => RunState::Collecting,
            (RunState::Collecting, Stage::Analyzing) => RunState::Analyzing,
            (RunState::Analyzing, Stage::Assembling) => RunState::Assembling,
            (from, to) => {
                return Err(TransitionError {
                    from: from.to_string(),
                    to: to.to_string(),
                })
            }
        };
        self.state = next;
        Ok(())
    }

    /// Assembling -> Succeeded
    pub fn succeed(&mut self) -> Result<(), TransitionError> {
        if self.state != RunState::Assembling {
            return Err(TransitionError {
                from: self.state.to_string(),
                to: RunState::Succeeded.to_string(),
            });
        }
        self.state = RunState::Succeeded;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Any non-terminal state -> Failed, recording the stage in flight
    pub fn fail(&mut self, error: &StageError) -> Result<(), TransitionError> {
        if self.state.is_terminal() {
            return Err(TransitionError {
                from: self.state.to_string(),
                to: "failed".to_string(),
            });
        }
        self.state = RunState::Failed {
            stage: self.state.stage(),
            cause: error.cause(),
            error: error.to_string(),
        };
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn record_timing(&mut self, stage: Stage, duration_ms: u64, error_count: usize) {
        self.stage_timings.push(StageTiming {
            stage,
            duration_ms,
            error_count,
        });
    }

    /// Total query keys across sources
    pub fn key_count(&self) -> usize {
        self.inputs.values().map(Vec::len).sum()
    }
}
