//! Workflow controller: drives one run through collect, analyze, and assemble.
//!
//! Every run ends in exactly one terminal state and emits exactly one
//! terminal event. The whole run is bounded by the run timeout; when it
//! fires, the in-flight stage is dropped and any spawned fetches are
//! cancelled through the run's cancellation token.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::DigestSink;
use crate::domain::{
    Digest, Event, EventType, RunStatus, RunTrigger, SourceId, Stage, StageError, WorkflowRun,
};

use super::analysis::AnalysisStage;
use super::assembler::DigestAssembler;
use super::collector::Collector;
use super::event_store::{record, EventLog};
use super::limits::RunLimits;

/// A finished run and, if it succeeded, the digest it delivered
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: WorkflowRun,
    pub digest: Option<Digest>,
}

/// Stage in flight and when it started
type StageClock = Option<(Stage, Instant)>;

/// Sequences the pipeline stages for each run
pub struct WorkflowController {
    collector: Collector,
    analysis: AnalysisStage,
    assembler: DigestAssembler,
    sink: Arc<dyn DigestSink>,
    events: Arc<dyn EventLog>,
    limits: RunLimits,
}

impl WorkflowController {
    pub fn new(
        collector: Collector,
        analysis: AnalysisStage,
        assembler: DigestAssembler,
        sink: Arc<dyn DigestSink>,
        events: Arc<dyn EventLog>,
        limits: RunLimits,
    ) -> Self {
        Self {
            collector,
            analysis,
            assembler,
            sink,
            events,
            limits,
        }
    }

    pub fn limits(&self) -> &RunLimits {
        &self.limits
    }

    pub fn sources(&self) -> Vec<SourceId> {
        self.collector.sources()
    }

    /// Validate inputs and create a pending run
    pub fn start(
        &self,
        trigger: &RunTrigger,
        inputs: BTreeMap<SourceId, Vec<String>>,
    ) -> Result<WorkflowRun> {
        self.limits
            .validate_inputs(&inputs)
            .context("Run trigger rejected")?;
        Ok(WorkflowRun::new(trigger, inputs))
    }

    /// Start and execute a run. Errors only when the trigger is rejected.
    pub async fn run(
        &self,
        trigger: &RunTrigger,
        inputs: BTreeMap<SourceId, Vec<String>>,
    ) -> Result<RunOutcome> {
        let run = self.start(trigger, inputs)?;
        Ok(self.execute(run).await)
    }

    /// Drive a pending run to its terminal state
    #[instrument(skip(self, run), fields(run_id = %run.id, scan_type = %run.scan_type))]
    pub async fn execute(&self, mut run: WorkflowRun) -> RunOutcome {
        if run.is_terminal() {
            warn!(state = %run.state(), "Run already terminal, not executing");
            return RunOutcome { run, digest: None };
        }

        info!(keys = run.key_count(), "Starting run");
        record(
            self.events.as_ref(),
            Event::new(
                run.id,
                EventType::RunStarted,
                format!("{} scan started", run.scan_type),
            )
            .with_scan_type(run.scan_type),
        )
        .await;

        let cancel = CancellationToken::new();
        let mut clock: StageClock = None;
        let limit = self.limits.run_timeout();

        let result = match timeout(limit, self.drive(&mut run, &mut clock, &cancel)).await {
            Ok(result) => result,
            Err(_) => Err(StageError::RunTimeout {
                limit_seconds: limit.as_secs(),
            }),
        };

        // Nothing spawned for this run may outlive it
        cancel.cancel();

        match result {
            Ok(digest) => {
                self.complete_run(&mut run, &digest).await;
                RunOutcome {
                    run,
                    digest: Some(digest),
                }
            }
            Err(e) => {
                self.fail_run(&mut run, clock, e).await;
                RunOutcome { run, digest: None }
            }
        }
    }

    async fn drive(
        &self,
        run: &mut WorkflowRun,
        clock: &mut StageClock,
        cancel: &CancellationToken,
    ) -> Result<Digest, StageError> {
        // Collecting
        self.begin_stage(run, clock, Stage::Collecting).await;
        let collection = self
            .collector
            .collect(run, self.limits.collection_deadline(), cancel)
            .await;

        for failure in collection.dataset.failures() {
            warn!(
                source = %failure.source,
                kind = ?failure.kind,
                attempts = failure.attempts,
                error = %failure.message,
                "Source degraded"
            );
            record(
                self.events.as_ref(),
                Event::new(
                    run.id,
                    EventType::SourceFailed,
                    format!("{} failed after {} attempt(s)", failure.source, failure.attempts),
                )
                .with_stage(Stage::Collecting)
                .with_source(failure.source)
                .with_error(failure.message.clone()),
            )
            .await;
        }
        run.degraded_sources = collection.dataset.failures().to_vec();

        collection.verdict()?;
        let failed_sources = run.degraded_sources.len();
        self.complete_stage(run, clock, failed_sources).await;

        // Analyzing
        self.begin_stage(run, clock, Stage::Analyzing).await;
        let opportunities = self
            .analysis
            .analyze(&collection.dataset, &run.analysis_context())
            .await?;
        self.complete_stage(run, clock, 0).await;

        // Assembling
        self.begin_stage(run, clock, Stage::Assembling).await;
        let digest = self.assembler.assemble(run, opportunities);
        self.sink.deliver(&digest).await.map_err(|e| {
            error!(sink = self.sink.name(), error = %e, "Digest delivery failed");
            StageError::DeliveryFailed(format!("{:#}", e))
        })?;
        self.complete_stage(run, clock, 0).await;

        Ok(digest)
    }

    async fn begin_stage(&self, run: &mut WorkflowRun, clock: &mut StageClock, stage: Stage) {
        if let Err(e) = run.enter(stage) {
            error!(error = %e, "Unexpected stage transition");
        }
        *clock = Some((stage, Instant::now()));

        info!(%stage, "Stage started");
        record(
            self.events.as_ref(),
            Event::new(run.id, EventType::StageStarted, format!("Stage '{}' started", stage))
                .with_stage(stage),
        )
        .await;
    }

    async fn complete_stage(&self, run: &mut WorkflowRun, clock: &mut StageClock, errors: usize) {
        let Some((stage, started)) = clock.take() else {
            return;
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        run.record_timing(stage, duration_ms, errors);

        info!(%stage, duration_ms, errors, "Stage completed");
        record(
            self.events.as_ref(),
            Event::new(
                run.id,
                EventType::StageCompleted,
                format!("Stage '{}' completed in {}ms", stage, duration_ms),
            )
            .with_stage(stage)
            .with_duration(duration_ms)
            .with_error_count(errors),
        )
        .await;
    }

    async fn complete_run(&self, run: &mut WorkflowRun, digest: &Digest) {
        if let Err(e) = run.succeed() {
            error!(error = %e, "Unexpected terminal transition");
        }

        info!(
            opportunities = digest.summary.total,
            degraded_sources = digest.summary.degraded_sources,
            fingerprint = %digest.fingerprint,
            "Run succeeded"
        );
        record(
            self.events.as_ref(),
            Event::new(
                run.id,
                EventType::RunSucceeded,
                format!(
                    "{} opportunities, {} degraded source(s)",
                    digest.summary.total, digest.summary.degraded_sources
                ),
            )
            .with_scan_type(run.scan_type),
        )
        .await;
    }

    async fn fail_run(&self, run: &mut WorkflowRun, clock: StageClock, error: StageError) {
        if let Some((stage, started)) = clock {
            let duration_ms = started.elapsed().as_millis() as u64;
            let errors = match stage {
                Stage::Collecting => run.degraded_sources.len().max(1),
                _ => 1,
            };
            run.record_timing(stage, duration_ms, errors);
            record(
                self.events.as_ref(),
                Event::new(
                    run.id,
                    EventType::StageFailed,
                    format!("Stage '{}' failed after {}ms", stage, duration_ms),
                )
                .with_stage(stage)
                .with_duration(duration_ms)
                .with_error_count(errors)
                .with_error(error.to_string()),
            )
            .await;
        }

        if let Err(e) = run.fail(&error) {
            error!(error = %e, "Unexpected terminal transition");
        }

        let cause = error.cause();
        let failed_stage = run.failed_stage();
        error!(%cause, stage = ?failed_stage, error = %error, "Run failed");

        let mut event = Event::new(run.id, EventType::RunFailed, format!("Run failed: {}", error))
            .with_scan_type(run.scan_type)
            .with_cause(cause)
            .with_error(error.to_string());
        if let Some(stage) = failed_stage {
            event = event.with_stage(stage);
        }
        record(self.events.as_ref(), event).await;
    }

    /// Reconstruct a run's status from its event log
    pub async fn get_run_status(&self, run_id: Uuid) -> Result<RunStatus> {
        run_status(self.events.as_ref(), run_id).await
    }

    /// Most recent runs first
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<RunStatus>> {
        list_runs(self.events.as_ref(), limit).await
    }
}

pub async fn run_status(events: &dyn EventLog, run_id: Uuid) -> Result<RunStatus> {
    let trail = events.replay(run_id).await?;
    if trail.is_empty() {
        anyhow::bail!("Run {} not found", run_id);
    }
    RunStatus::from_events(&trail).context("Failed to reconstruct run state")
}

pub async fn list_runs(events: &dyn EventLog, limit: usize) -> Result<Vec<RunStatus>> {
    let mut runs = Vec::new();
    for run_id in events.list_runs().await? {
        match run_status(events, run_id).await {
            Ok(status) => runs.push(status),
            Err(e) => warn!(%run_id, error = %e, "Skipping unreadable run"),
        }
    }

    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    runs.truncate(limit);
    Ok(runs)
}
