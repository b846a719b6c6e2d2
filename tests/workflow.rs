//! Workflow Integration Tests
//!
//! End-to-end runs through the controller: terminal states, failure
//! causes, degraded sources, and the event trail.

mod common;

use std::sync::Arc;

use common::{
    all_sources, inputs, Behavior, BrokenEventLog, FailingAnalyzer, HarnessBuilder,
    RecordingAnalyzer, RejectingSink, ScriptedSource,
};
use marketscan::adapters::{HeuristicAnalyzer, MemorySink};
use marketscan::core::{
    AnalysisStage, Collector, DigestAssembler, EventLog, RetryPolicy, WorkflowController,
};
use marketscan::domain::{
    AnalysisContext, ErrorKind, Event, EventType, FailureCause, MergedDataset, RunState, RunTrigger, ScanType,
    SourceId, Stage,
};

fn trigger() -> RunTrigger {
    RunTrigger::new(ScanType::Daily)
}

fn terminal_events(events: &[Event]) -> Vec<&Event> {
    events.iter().filter(|e| e.is_terminal()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_all_sources_succeed() {
    let harness = HarnessBuilder::new(all_sources(Behavior::Respond)).build();

    let outcome = harness.controller.run(&trigger(), inputs()).await.unwrap();

    assert!(outcome.run.succeeded());
    assert!(outcome.run.degraded_sources.is_empty());

    let digest = outcome.digest.unwrap();
    assert_eq!(digest.opportunities.len(), 8);
    let markets: std::collections::BTreeSet<SourceId> =
        digest.opportunities.iter().map(|o| o.market).collect();
    assert_eq!(markets.len(), 4);
    assert_eq!(harness.sink.digests().len(), 1);
    assert_eq!(harness.sink.last().unwrap().run_id, outcome.run.id);
}

#[tokio::test(start_paused = true)]
async fn test_one_invalid_source_degrades_run() {
    let mut sources = all_sources(Behavior::Respond);
    let broken = ScriptedSource::always(Behavior::Fail(ErrorKind::InvalidResponse));
    sources[1] = (SourceId::RegionalEquities, broken.clone());
    let harness = HarnessBuilder::new(sources).build();

    let outcome = harness.controller.run(&trigger(), inputs()).await.unwrap();

    assert!(outcome.run.succeeded());
    assert_eq!(broken.calls(), 1);
    assert_eq!(outcome.run.degraded_sources.len(), 1);
    assert_eq!(outcome.run.degraded_sources[0].source, SourceId::RegionalEquities);

    let digest = outcome.digest.unwrap();
    assert_eq!(digest.opportunities.len(), 6);
    assert!(digest
        .opportunities
        .iter()
        .all(|o| o.market != SourceId::RegionalEquities));
    assert_eq!(digest.summary.degraded_sources, 1);
    assert_eq!(digest.degraded_sources[0].kind, ErrorKind::InvalidResponse);

    let events = harness.events.replay(outcome.run.id).await.unwrap();
    let failed: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == EventType::SourceFailed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].source, Some(SourceId::RegionalEquities));

    let collected = events
        .iter()
        .find(|e| e.event_type == EventType::StageCompleted && e.stage == Some(Stage::Collecting))
        .unwrap();
    assert_eq!(collected.error_count, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_all_sources_time_out() {
    let sources = all_sources(Behavior::Hang);
    let harness = HarnessBuilder::new(sources.clone()).build();

    let outcome = harness.controller.run(&trigger(), inputs()).await.unwrap();

    assert_eq!(outcome.run.failure_cause(), Some(FailureCause::AllSourcesFailed));
    assert_eq!(outcome.run.failed_stage(), Some(Stage::Collecting));
    assert!(outcome.digest.is_none());
    assert!(harness.sink.digests().is_empty());
    for (_, source) in &sources {
        assert_eq!(source.calls(), 3);
    }
    assert_eq!(outcome.run.degraded_sources.len(), 4);
}

#[tokio::test]
async fn test_analyzer_rejects_empty_dataset() {
    let stage = AnalysisStage::new(Arc::new(HeuristicAnalyzer::new()));

    let err = stage
        .analyze(&MergedDataset::new(), &AnalysisContext::new(ScanType::Daily))
        .await
        .unwrap_err();
    assert_eq!(err.cause(), FailureCause::AnalysisFailed);
}

#[tokio::test(start_paused = true)]
async fn test_trigger_options_reach_analyzer() {
    let analyzer = Arc::new(RecordingAnalyzer::default());
    let harness = HarnessBuilder::new(all_sources(Behavior::Respond))
        .analyzer(analyzer.clone())
        .build();

    let rebalance = RunTrigger::from_json(
        r#"{"scanType": "monthly", "deepAnalysis": true, "rebalancing": true}"#,
    )
    .unwrap();
    let outcome = harness.controller.run(&rebalance, inputs()).await.unwrap();
    assert!(outcome.run.succeeded());

    let contexts = analyzer.contexts();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].run_id, outcome.run.id);
    assert_eq!(contexts[0].scan_type, ScanType::Monthly);
    assert!(contexts[0].deep_analysis);
    assert!(contexts[0].rebalancing);

    let plain = HarnessBuilder::new(all_sources(Behavior::Respond))
        .analyzer(analyzer.clone())
        .build();
    plain.controller.run(&trigger(), inputs()).await.unwrap();
    let last = analyzer.contexts()[1];
    assert!(!last.deep_analysis);
    assert!(!last.rebalancing);
}

#[tokio::test(start_paused = true)]
async fn test_analysis_failure_fails_run_without_digest() {
    let harness = HarnessBuilder::new(all_sources(Behavior::Respond))
        .analyzer(Arc::new(FailingAnalyzer))
        .build();

    let outcome = harness.controller.run(&trigger(), inputs()).await.unwrap();

    assert_eq!(outcome.run.failure_cause(), Some(FailureCause::AnalysisFailed));
    assert_eq!(outcome.run.failed_stage(), Some(Stage::Analyzing));
    assert!(outcome.digest.is_none());
    assert!(harness.sink.digests().is_empty());

    match outcome.run.state() {
        RunState::Failed { error, .. } => assert!(error.contains("scoring model unavailable")),
        other => panic!("unexpected state {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_delivery_failure_fails_run() {
    let harness = HarnessBuilder::new(all_sources(Behavior::Respond))
        .sink(Arc::new(RejectingSink))
        .build();

    let outcome = harness.controller.run(&trigger(), inputs()).await.unwrap();

    assert_eq!(outcome.run.failure_cause(), Some(FailureCause::DeliveryFailed));
    assert_eq!(outcome.run.failed_stage(), Some(Stage::Assembling));
    assert!(outcome.digest.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_exactly_one_terminal_event_per_run() {
    let cases = vec![
        HarnessBuilder::new(all_sources(Behavior::Respond)).build(),
        HarnessBuilder::new(all_sources(Behavior::Hang)).build(),
        HarnessBuilder::new(all_sources(Behavior::Respond))
            .analyzer(Arc::new(FailingAnalyzer))
            .build(),
    ];

    for harness in cases {
        let outcome = harness.controller.run(&trigger(), inputs()).await.unwrap();
        assert!(outcome.run.is_terminal());
        assert!(outcome.run.completed_at.is_some());

        let events = harness.events.replay(outcome.run.id).await.unwrap();
        assert_eq!(events[0].event_type, EventType::RunStarted);
        let terminal = terminal_events(&events);
        assert_eq!(terminal.len(), 1);
        assert!(events.last().unwrap().is_terminal());

        let status = harness.controller.get_run_status(outcome.run.id).await.unwrap();
        assert_eq!(&status.state, outcome.run.state());
    }
}

#[tokio::test(start_paused = true)]
async fn test_stage_events_carry_timings() {
    let harness = HarnessBuilder::new(all_sources(Behavior::Slow(
        std::time::Duration::from_millis(1500),
    )))
    .build();

    let outcome = harness.controller.run(&trigger(), inputs()).await.unwrap();
    assert!(outcome.run.succeeded());

    let events = harness.events.replay(outcome.run.id).await.unwrap();
    let completed: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == EventType::StageCompleted)
        .collect();
    let stages: Vec<_> = completed.iter().map(|e| e.stage.unwrap()).collect();
    assert_eq!(stages, vec![Stage::Collecting, Stage::Analyzing, Stage::Assembling]);
    assert!(completed[0].duration_ms.unwrap() >= 1500);

    assert_eq!(outcome.run.stage_timings.len(), 3);
    assert!(outcome.run.stage_timings[0].duration_ms >= 1500);
}

#[tokio::test(start_paused = true)]
async fn test_event_log_failure_does_not_change_outcome() {
    let sources = all_sources(Behavior::Respond);
    let collector = Collector::new(
        common::fetchers(&sources),
        RetryPolicy::default(),
        std::time::Duration::from_secs(5),
    );
    let sink = Arc::new(MemorySink::new());
    let controller = WorkflowController::new(
        collector,
        AnalysisStage::new(Arc::new(common::EchoAnalyzer)),
        DigestAssembler::default(),
        sink.clone(),
        Arc::new(BrokenEventLog),
        common::limits(900),
    );

    let outcome = controller.run(&trigger(), inputs()).await.unwrap();
    assert!(outcome.run.succeeded());
    assert_eq!(sink.digests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_trigger_is_rejected() {
    let harness = HarnessBuilder::new(all_sources(Behavior::Respond)).build();
    let mut inputs = inputs();
    inputs.insert(
        SourceId::UsEquities,
        (0..501).map(|i| format!("T{}", i)).collect(),
    );

    let err = harness.controller.run(&trigger(), inputs).await.unwrap_err();
    assert!(format!("{:#}", err).contains("Too many query keys"));
    assert!(harness.events.all().is_empty());
}
