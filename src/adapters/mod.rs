//! Adapter interfaces for external collaborators.
//!
//! The controller only ever talks to these traits; concrete providers are
//! injected at construction time.
//!
//! - `SourceAdapter`: a market data provider (HTTP feed, local snapshot)
//! - `Analyzer`: the scoring function
//! - `DigestSink`: digest delivery (archive, webhook)

pub mod analyzer;
pub mod command;
pub mod fetcher;
pub mod http;
pub mod sink;
pub mod snapshot;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{AnalysisContext, Digest, FetchError, MergedDataset, Opportunity, Record};

pub use analyzer::HeuristicAnalyzer;
pub use command::CommandAnalyzer;
pub use fetcher::SourceFetcher;
pub use http::HttpSourceAdapter;
pub use sink::{ArchiveSink, MemorySink, SinkChain, WebhookSink};
pub use snapshot::SnapshotAdapter;

/// A market data provider
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Fetch records for one batch of keys on one market.
    ///
    /// Keys with no data are simply absent from the result.
    async fn fetch(&self, market: &str, keys: &[String]) -> Result<Vec<Record>, FetchError>;
}

/// Scores a merged dataset into opportunities
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    /// All-or-nothing: an `Err` discards any partial output
    async fn analyze(
        &self,
        dataset: &MergedDataset,
        context: &AnalysisContext,
    ) -> Result<Vec<Opportunity>>;
}

/// Receives one digest per successful run
#[async_trait]
pub trait DigestSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, digest: &Digest) -> Result<()>;
}
