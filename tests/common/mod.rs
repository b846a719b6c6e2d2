//! Shared test doubles for the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use marketscan::adapters::{Analyzer, DigestSink, MemorySink, SourceAdapter, SourceFetcher};
use marketscan::core::{
    AnalysisStage, Collector, DigestAssembler, EventLog, MemoryEventLog, RetryPolicy, RunLimits,
    WorkflowController,
};
use marketscan::domain::{
    AnalysisContext, Digest, ErrorKind, FetchError, MergedDataset, Opportunity, Record, RiskLevel, Signal,
    SourceId,
};

/// What a scripted source does on one call
#[derive(Debug, Clone)]
pub enum Behavior {
    /// One record per key
    Respond,
    Fail(ErrorKind),
    /// Never returns
    Hang,
    /// Respond after a delay
    Slow(Duration),
}

/// Source adapter that follows a script, then repeats a fallback behavior
pub struct ScriptedSource {
    script: Mutex<VecDeque<Behavior>>,
    fallback: Behavior,
    calls: AtomicU32,
}

impl ScriptedSource {
    pub fn always(behavior: Behavior) -> Arc<Self> {
        Self::sequence(Vec::new(), behavior)
    }

    pub fn sequence(script: Vec<Behavior>, fallback: Behavior) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self, _market: &str, keys: &[String]) -> Result<Vec<Record>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match behavior {
            Behavior::Respond => {}
            Behavior::Fail(kind) => return Err(FetchError::new(kind, "scripted failure")),
            Behavior::Hang => std::future::pending::<()>().await,
            Behavior::Slow(delay) => tokio::time::sleep(delay).await,
        }

        // The fetcher re-stamps the source
        Ok(keys
            .iter()
            .map(|k| Record::new(SourceId::UsEquities, k.as_str()).with("price", 10.0))
            .collect())
    }
}

/// One BUY per record, confidence 70
pub struct EchoAnalyzer;

#[async_trait]
impl Analyzer for EchoAnalyzer {
    fn name(&self) -> &str {
        "echo"
    }

    async fn analyze(
        &self,
        dataset: &MergedDataset,
        _context: &AnalysisContext,
    ) -> Result<Vec<Opportunity>> {
        Ok(dataset
            .records()
            .map(|r| {
                Opportunity::new(r.symbol.as_str(), r.source, Signal::Buy, 70, RiskLevel::Medium)
            })
            .collect())
    }
}

/// Echoes like `EchoAnalyzer` and keeps every context it was called with
#[derive(Default)]
pub struct RecordingAnalyzer {
    contexts: Mutex<Vec<AnalysisContext>>,
}

impl RecordingAnalyzer {
    pub fn contexts(&self) -> Vec<AnalysisContext> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Analyzer for RecordingAnalyzer {
    fn name(&self) -> &str {
        "recording"
    }

    async fn analyze(
        &self,
        dataset: &MergedDataset,
        context: &AnalysisContext,
    ) -> Result<Vec<Opportunity>> {
        self.contexts.lock().unwrap().push(*context);
        EchoAnalyzer.analyze(dataset, context).await
    }
}

pub struct FailingAnalyzer;

#[async_trait]
impl Analyzer for FailingAnalyzer {
    fn name(&self) -> &str {
        "failing"
    }

    async fn analyze(
        &self,
        _dataset: &MergedDataset,
        _context: &AnalysisContext,
    ) -> Result<Vec<Opportunity>> {
        anyhow::bail!("scoring model unavailable")
    }
}

/// Sets its flag when dropped
pub struct DropFlag(pub Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Never finishes; `dropped` flips when the analysis future is dropped
pub struct StuckAnalyzer {
    pub started: Arc<AtomicBool>,
    pub dropped: Arc<AtomicBool>,
}

impl StuckAnalyzer {
    pub fn new() -> Self {
        Self {
            started: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Analyzer for StuckAnalyzer {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn analyze(
        &self,
        _dataset: &MergedDataset,
        _context: &AnalysisContext,
    ) -> Result<Vec<Opportunity>> {
        let _guard = DropFlag(self.dropped.clone());
        self.started.store(true, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(Vec::new())
    }
}

/// Never acknowledges delivery
pub struct StuckSink;

#[async_trait]
impl DigestSink for StuckSink {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn deliver(&self, _digest: &Digest) -> Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

pub struct RejectingSink;

#[async_trait]
impl DigestSink for RejectingSink {
    fn name(&self) -> &str {
        "rejecting"
    }

    async fn deliver(&self, _digest: &Digest) -> Result<()> {
        anyhow::bail!("queue returned 503")
    }
}

/// Event log whose writes always fail
pub struct BrokenEventLog;

#[async_trait]
impl EventLog for BrokenEventLog {
    async fn append(&self, _event: &marketscan::domain::Event) -> Result<()> {
        anyhow::bail!("disk full")
    }

    async fn replay(&self, _run_id: uuid::Uuid) -> Result<Vec<marketscan::domain::Event>> {
        Ok(Vec::new())
    }

    async fn list_runs(&self) -> Result<Vec<uuid::Uuid>> {
        Ok(Vec::new())
    }
}

/// Two keys per source
pub fn inputs() -> BTreeMap<SourceId, Vec<String>> {
    let keys = |a: &str, b: &str| vec![a.to_string(), b.to_string()];
    [
        (SourceId::UsEquities, keys("KO", "PG")),
        (SourceId::RegionalEquities, keys("SCOM.NB", "KCB.NB")),
        (SourceId::FixedIncome, keys("US2Y", "US10Y")),
        (SourceId::ScrapedData, keys("KO", "SCOM.NB")),
    ]
    .into_iter()
    .collect()
}

pub fn fetchers(adapters: &[(SourceId, Arc<ScriptedSource>)]) -> Vec<SourceFetcher> {
    adapters
        .iter()
        .map(|(id, adapter)| SourceFetcher::new(*id, adapter.clone() as Arc<dyn SourceAdapter>))
        .collect()
}

/// Same behavior for all four sources
pub fn all_sources(behavior: Behavior) -> Vec<(SourceId, Arc<ScriptedSource>)> {
    SourceId::ALL
        .iter()
        .map(|id| (*id, ScriptedSource::always(behavior.clone())))
        .collect()
}

pub fn limits(run_timeout_seconds: u64) -> RunLimits {
    RunLimits {
        run_timeout_seconds,
        collection_fraction: 0.5,
        fetch_timeout_seconds: 5,
        max_keys_per_source: 500,
    }
}

/// Test harness around a controller with in-memory events and sink
pub struct Harness {
    pub controller: WorkflowController,
    pub events: Arc<MemoryEventLog>,
    pub sink: Arc<MemorySink>,
}

pub struct HarnessBuilder {
    sources: Vec<(SourceId, Arc<ScriptedSource>)>,
    analyzer: Arc<dyn Analyzer>,
    sink: Option<Arc<dyn DigestSink>>,
    limits: RunLimits,
    floor: Option<u8>,
}

impl HarnessBuilder {
    pub fn new(sources: Vec<(SourceId, Arc<ScriptedSource>)>) -> Self {
        Self {
            sources,
            analyzer: Arc::new(EchoAnalyzer),
            sink: None,
            limits: limits(900),
            floor: None,
        }
    }

    pub fn analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn DigestSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn floor(mut self, floor: u8) -> Self {
        self.floor = Some(floor);
        self
    }

    pub fn build(self) -> Harness {
        let events = Arc::new(MemoryEventLog::new());
        let memory = Arc::new(MemorySink::new());
        let sink: Arc<dyn DigestSink> = match self.sink {
            Some(sink) => sink,
            None => memory.clone(),
        };

        let collector = Collector::new(
            fetchers(&self.sources),
            RetryPolicy::default(),
            self.limits.fetch_timeout(),
        )
        .with_events(events.clone());

        let controller = WorkflowController::new(
            collector,
            AnalysisStage::new(self.analyzer),
            DigestAssembler::new(self.floor),
            sink,
            events.clone(),
            self.limits,
        );

        Harness {
            controller,
            events,
            sink: memory,
        }
    }
}
