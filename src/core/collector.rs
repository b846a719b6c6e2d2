//! Fan-out collection stage.
//!
//! Dispatches one request per configured source concurrently, retries
//! transient failures with exponential backoff, and merges whatever came
//! back into a partial-success dataset. A collection sub-deadline bounds
//! the whole stage; fetches still in flight when it expires are cancelled
//! and recorded as timeouts.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::SourceFetcher;
use crate::domain::{
    Event, EventType, FetchError, MergedDataset, SourceId, SourceRequest, SourceResult,
    StageError, WorkflowRun,
};

use super::event_store::{record, EventLog};
use super::limits::RetryPolicy;

/// Result of the collection stage before the success verdict
#[derive(Debug)]
pub struct Collection {
    pub dataset: MergedDataset,

    /// At least one source was cut off by the collection deadline
    pub deadline_exceeded: bool,

    pub deadline: Duration,
}

impl Collection {
    /// Collection succeeds as long as at least one record was gathered
    pub fn verdict(&self) -> Result<(), StageError> {
        if !self.dataset.is_empty() {
            return Ok(());
        }
        if self.deadline_exceeded {
            Err(StageError::CollectionDeadlineExceeded {
                deadline_ms: self.deadline.as_millis() as u64,
            })
        } else {
            Err(StageError::AllSourcesFailed {
                failed: self.dataset.failures().len(),
            })
        }
    }
}

/// Fan-out collector over the configured sources
pub struct Collector {
    fetchers: Vec<SourceFetcher>,
    retry: RetryPolicy,
    fetch_timeout: Duration,
    events: Option<Arc<dyn EventLog>>,
}

impl Collector {
    pub fn new(fetchers: Vec<SourceFetcher>, retry: RetryPolicy, fetch_timeout: Duration) -> Self {
        Self {
            fetchers,
            retry,
            fetch_timeout,
            events: None,
        }
    }

    /// Record per-source retry events into the run log
    pub fn with_events(mut self, events: Arc<dyn EventLog>) -> Self {
        self.events = Some(events);
        self
    }

    /// Sources this collector is configured for
    pub fn sources(&self) -> Vec<SourceId> {
        self.fetchers.iter().map(SourceFetcher::source).collect()
    }

    /// Build one request per configured source that has query keys for this run
    pub fn requests(&self, run: &WorkflowRun) -> Vec<(SourceFetcher, SourceRequest)> {
        self.fetchers
            .iter()
            .filter_map(|fetcher| {
                let keys = run
                    .inputs
                    .get(&fetcher.source())
                    .cloned()
                    .unwrap_or_default();
                if keys.is_empty() {
                    debug!(source = %fetcher.source(), "No query keys, source not dispatched");
                    return None;
                }
                let request = SourceRequest::new(
                    fetcher.source(),
                    keys,
                    fetcher.timeout_or(self.fetch_timeout),
                );
                Some((fetcher.clone(), request))
            })
            .collect()
    }

    /// Run the fan-out. Never fails by itself; see `Collection::verdict`.
    pub async fn collect(
        &self,
        run: &WorkflowRun,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Collection {
        let deadline_at = Instant::now() + deadline;
        let stage_cancel = cancel.child_token();

        let handles: Vec<_> = self
            .requests(run)
            .into_iter()
            .map(|(fetcher, request)| {
                let source = fetcher.source();
                let task = SourceTask {
                    run_id: run.id,
                    fetcher,
                    request,
                    retry: self.retry.clone(),
                    deadline_at,
                    cancel: stage_cancel.clone(),
                    events: self.events.clone(),
                };
                (source, tokio::spawn(task.run()))
            })
            .collect();

        info!(run_id = %run.id, sources = handles.len(), ?deadline, "Dispatched source fetches");

        let joined = join_all(
            handles
                .into_iter()
                .map(|(source, handle)| async move { (source, handle.await) }),
        )
        .await;

        // Every task has finished; make sure nothing outlives the stage
        stage_cancel.cancel();

        let mut deadline_exceeded = false;
        let results: Vec<SourceResult> = joined
            .into_iter()
            .map(|(source, joined)| match joined {
                Ok(outcome) => {
                    deadline_exceeded |= outcome.cut_by_deadline;
                    outcome.result
                }
                Err(e) => SourceResult::failure(
                    source,
                    FetchError::unavailable(format!("fetch task aborted: {}", e)),
                ),
            })
            .collect();

        let dataset = MergedDataset::merge(results);

        info!(
            run_id = %run.id,
            records = dataset.len(),
            failed_sources = dataset.failures().len(),
            deadline_exceeded,
            "Collection finished"
        );

        Collection {
            dataset,
            deadline_exceeded,
            deadline,
        }
    }
}

/// Why an attempt did not produce a result
enum Interrupted {
    Cancelled,
    Deadline,
}

struct TaskOutcome {
    result: SourceResult,
    cut_by_deadline: bool,
}

/// One source's fetch-with-retry loop, owned by its own task
struct SourceTask {
    run_id: Uuid,
    fetcher: SourceFetcher,
    request: SourceRequest,
    retry: RetryPolicy,
    deadline_at: Instant,
    cancel: CancellationToken,
    events: Option<Arc<dyn EventLog>>,
}

impl SourceTask {
    async fn run(self) -> TaskOutcome {
        let source = self.fetcher.source();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return self.interrupted(Interrupted::Cancelled, attempt);
                }
                _ = sleep_until(self.deadline_at) => {
                    return self.interrupted(Interrupted::Deadline, attempt);
                }
                result = self.fetcher.fetch(&self.request) => result,
            };

            if result.succeeded() {
                debug!(%source, attempt, records = result.records.len(), "Source fetched");
                return self.finished(result, attempt);
            }

            let retryable = result
                .error
                .as_ref()
                .map(|e| e.kind.is_retryable())
                .unwrap_or(false)
                && self.retry.should_retry(attempt);

            if !retryable {
                return self.finished(result, attempt);
            }

            let delay = self.retry.delay_for_attempt(attempt);
            let error = result.error.map(|e| e.to_string()).unwrap_or_default();

            warn!(
                %source,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Source fetch failed, retrying"
            );

            if let Some(ref events) = self.events {
                let event = Event::new(
                    self.run_id,
                    EventType::SourceRetrying,
                    format!("{} attempt {} failed, retrying in {:?}", source, attempt, delay),
                )
                .with_source(source)
                .with_error(error);
                record(events.as_ref(), event).await;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return self.interrupted(Interrupted::Cancelled, attempt);
                }
                _ = sleep_until(self.deadline_at) => {
                    return self.interrupted(Interrupted::Deadline, attempt);
                }
                _ = sleep(delay) => {}
            }
        }
    }

    fn finished(&self, result: SourceResult, attempt: u32) -> TaskOutcome {
        if let Some(ref e) = result.error {
            warn!(source = %result.source, attempt, error = %e, "Source failed permanently");
        }
        TaskOutcome {
            result: result.with_attempts(attempt),
            cut_by_deadline: false,
        }
    }

    fn interrupted(&self, why: Interrupted, attempt: u32) -> TaskOutcome {
        let source = self.fetcher.source();
        let (message, cut_by_deadline) = match why {
            Interrupted::Cancelled => ("fetch cancelled".to_string(), false),
            Interrupted::Deadline => ("collection deadline reached".to_string(), true),
        };
        warn!(%source, attempt, %message, "Source fetch interrupted");

        TaskOutcome {
            result: SourceResult::failure(source, FetchError::timeout(message))
                .with_attempts(attempt),
            cut_by_deadline,
        }
    }
}
