//! Uniform fetch boundary around a `SourceAdapter`.
//!
//! Adds the per-call timeout and key batching, and converts every failure
//! into a `SourceResult` value. Nothing escapes this boundary as an `Err`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;

use crate::domain::{FetchError, Record, SourceId, SourceRequest, SourceResult};

use super::SourceAdapter;

/// Default number of keys sent to a provider per call
pub const DEFAULT_BATCH_SIZE: usize = 25;

/// One configured source: an adapter bound to a source id
#[derive(Clone)]
pub struct SourceFetcher {
    source: SourceId,
    adapter: Arc<dyn SourceAdapter>,
    batch_size: usize,
    timeout_override: Option<Duration>,
}

impl SourceFetcher {
    pub fn new(source: SourceId, adapter: Arc<dyn SourceAdapter>) -> Self {
        Self {
            source,
            adapter,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout_override: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Use this timeout instead of the run-wide fetch timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout);
        self
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn adapter_name(&self) -> &str {
        self.adapter.name()
    }

    /// Effective per-call timeout given the run-wide default
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout_override.unwrap_or(default)
    }

    /// Fetch all keys of a request within its timeout
    pub async fn fetch(&self, request: &SourceRequest) -> SourceResult {
        if request.keys.is_empty() {
            return SourceResult::failure(
                self.source,
                FetchError::invalid_response("empty query key list"),
            );
        }
        if request.timeout.is_zero() {
            return SourceResult::failure(self.source, FetchError::timeout("zero timeout"));
        }

        let keys = dedup(&request.keys);

        match timeout(request.timeout, self.fetch_batches(&keys)).await {
            Ok(Ok(records)) => {
                let omitted = omitted_keys(&keys, &records);
                if !omitted.is_empty() {
                    debug!(
                        source = %self.source,
                        omitted = omitted.len(),
                        "Source had no data for some keys"
                    );
                }
                SourceResult::success(self.source, records, omitted)
            }
            Ok(Err(e)) => SourceResult::failure(self.source, e),
            Err(_) => SourceResult::failure(
                self.source,
                FetchError::timeout(format!(
                    "{} timed out after {:?}",
                    self.adapter.name(),
                    request.timeout
                )),
            ),
        }
    }

    async fn fetch_batches(&self, keys: &[String]) -> Result<Vec<Record>, FetchError> {
        let market = self.source.market();
        let mut records = Vec::new();

        for batch in keys.chunks(self.batch_size) {
            let batch_records = self.adapter.fetch(market, batch).await?;
            records.extend(batch_records.into_iter().map(|r| Record {
                source: self.source,
                ..r
            }));
        }

        Ok(records)
    }
}

/// Drop repeated keys, keeping first occurrence order
fn dedup(keys: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.iter()
        .filter(|k| seen.insert(k.as_str()))
        .cloned()
        .collect()
}

fn omitted_keys(keys: &[String], records: &[Record]) -> Vec<String> {
    let returned: HashSet<&str> = records.iter().map(|r| r.symbol.as_str()).collect();
    keys.iter()
        .filter(|k| !returned.contains(k.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns a record for every key except "GONE", remembering batch sizes
    struct Recording {
        batches: Mutex<Vec<usize>>,
        delay: Duration,
        fail_with: Option<FetchError>,
    }

    impl Recording {
        fn new() -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
                fail_with: None,
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn fetch(&self, _market: &str, keys: &[String]) -> Result<Vec<Record>, FetchError> {
            self.batches.lock().unwrap().push(keys.len());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(e) = &self.fail_with {
                return Err(e.clone());
            }
            Ok(keys
                .iter()
                .filter(|k| k.as_str() != "GONE")
                .map(|k| Record::new(SourceId::ScrapedData, k.clone()))
                .collect())
        }
    }

    fn request(keys: &[&str], timeout: Duration) -> SourceRequest {
        SourceRequest::new(
            SourceId::UsEquities,
            keys.iter().map(|k| k.to_string()).collect(),
            timeout,
        )
    }

    #[tokio::test]
    async fn test_batches_and_omissions() {
        let adapter = Arc::new(Recording::new());
        let fetcher = SourceFetcher::new(SourceId::UsEquities, adapter.clone()).with_batch_size(2);

        let result = fetcher
            .fetch(&request(&["KO", "PG", "GONE", "KO", "T"], Duration::from_secs(5)))
            .await;

        assert!(result.succeeded());
        assert_eq!(result.records.len(), 3);
        assert!(result.records.iter().all(|r| r.source == SourceId::UsEquities));
        assert_eq!(result.omitted, vec!["GONE".to_string()]);
        // KO deduplicated: 4 unique keys in batches of 2
        assert_eq!(*adapter.batches.lock().unwrap(), vec![2, 2]);
    }

    #[tokio::test]
    async fn test_adapter_error_becomes_failed_result() {
        let adapter = Arc::new(Recording {
            fail_with: Some(FetchError::invalid_response("html instead of json")),
            ..Recording::new()
        });
        let fetcher = SourceFetcher::new(SourceId::UsEquities, adapter);

        let result = fetcher.fetch(&request(&["KO"], Duration::from_secs(5))).await;

        assert!(!result.succeeded());
        assert!(result.records.is_empty());
        assert_eq!(result.error.unwrap().kind, ErrorKind::InvalidResponse);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_adapter_times_out() {
        let adapter = Arc::new(Recording {
            delay: Duration::from_secs(30),
            ..Recording::new()
        });
        let fetcher = SourceFetcher::new(SourceId::UsEquities, adapter);

        let result = fetcher.fetch(&request(&["KO"], Duration::from_secs(2))).await;

        assert_eq!(result.error.unwrap().kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_empty_request_is_rejected_without_calling_adapter() {
        let adapter = Arc::new(Recording::new());
        let fetcher = SourceFetcher::new(SourceId::UsEquities, adapter.clone());

        let result = fetcher.fetch(&request(&[], Duration::from_secs(5))).await;

        assert!(!result.succeeded());
        assert!(adapter.batches.lock().unwrap().is_empty());
    }
}
