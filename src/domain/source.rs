//! Source-level types: what a fetcher is asked for and what it hands back.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One of the independent data providers a run fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    /// US equities feed
    UsEquities,

    /// Regional exchange equities feed (Nairobi Securities Exchange)
    RegionalEquities,

    /// Fixed-income (bonds/treasuries) feed
    FixedIncome,

    /// Scraped web data
    ScrapedData,
}

impl SourceId {
    /// All sources, in dispatch order
    pub const ALL: [SourceId; 4] = [
        SourceId::UsEquities,
        SourceId::RegionalEquities,
        SourceId::FixedIncome,
        SourceId::ScrapedData,
    ];

    /// Market identifier passed across the adapter boundary
    pub fn market(&self) -> &'static str {
        match self {
            Self::UsEquities => "US",
            Self::RegionalEquities => "NSE",
            Self::FixedIncome => "BONDS",
            Self::ScrapedData => "WEB",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UsEquities => "us_equities",
            Self::RegionalEquities => "regional_equities",
            Self::FixedIncome => "fixed_income",
            Self::ScrapedData => "scraped_data",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single raw record: one symbol and its price/fundamental attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Source that produced the record
    pub source: SourceId,

    /// Ticker or series symbol
    pub symbol: String,

    /// Attribute name -> value (price, change_percent, dividend_yield, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Record {
    pub fn new(source: SourceId, symbol: impl Into<String>) -> Self {
        Self {
            source,
            symbol: symbol.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Numeric attribute, if present and numeric
    pub fn number(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(|v| v.as_f64())
    }
}

/// Classification of a failed fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The call did not finish in time (or was cancelled by a deadline)
    Timeout,

    /// Network error or the provider is down
    Unavailable,

    /// The provider answered with something we could not use
    InvalidResponse,
}

impl ErrorKind {
    /// Only transient kinds are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "source timeout",
            Self::Unavailable => "source unavailable",
            Self::InvalidResponse => "source invalid response",
        };
        f.write_str(s)
    }
}

/// Error returned across the adapter boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: ErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidResponse, message)
    }
}

/// A source that ended up contributing nothing to the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceError {
    pub source: SourceId,
    pub kind: ErrorKind,
    pub message: String,

    /// Total attempts made (initial + retries)
    pub attempts: u32,
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {} attempt(s)): {}",
            self.source, self.kind, self.attempts, self.message
        )
    }
}

/// Request for one source within one run
#[derive(Debug, Clone)]
pub struct SourceRequest {
    pub source: SourceId,

    /// Tickers / series / queries, in caller order
    pub keys: Vec<String>,

    /// Budget for a single fetch call
    pub timeout: Duration,
}

impl SourceRequest {
    pub fn new(source: SourceId, keys: Vec<String>, timeout: Duration) -> Self {
        Self {
            source,
            keys,
            timeout,
        }
    }
}

/// Outcome of fetching one source; always a value, never a panic or `Err`
#[derive(Debug, Clone)]
pub struct SourceResult {
    pub source: SourceId,

    /// Records in the order the provider returned them
    pub records: Vec<Record>,

    /// Requested keys the provider had no data for
    pub omitted: Vec<String>,

    /// Set when the fetch failed; records is then empty
    pub error: Option<FetchError>,

    /// Attempts consumed to produce this result
    pub attempts: u32,
}

impl SourceResult {
    pub fn success(source: SourceId, records: Vec<Record>, omitted: Vec<String>) -> Self {
        Self {
            source,
            records,
            omitted,
            error: None,
            attempts: 1,
        }
    }

    pub fn failure(source: SourceId, error: FetchError) -> Self {
        Self {
            source,
            records: Vec::new(),
            omitted: Vec::new(),
            error: Some(error),
            attempts: 1,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Convert a failed result into the error-list entry
    pub fn to_source_error(&self) -> Option<SourceError> {
        self.error.as_ref().map(|e| SourceError {
            source: self.source,
            kind: e.kind,
            message: e.message.clone(),
            attempts: self.attempts,
        })
    }
}
