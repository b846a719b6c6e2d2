//! Local snapshot adapter.
//!
//! Serves records from a JSON or YAML file laid out as
//! `market -> symbol -> attributes`. Useful for offline scans and replaying
//! a captured provider response.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::domain::{FetchError, Record, SourceId};

use super::SourceAdapter;

type Snapshot = BTreeMap<String, BTreeMap<String, BTreeMap<String, serde_json::Value>>>;

/// Source adapter that reads a snapshot file on every call
pub struct SnapshotAdapter {
    path: PathBuf,
}

impl SnapshotAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, content: &str) -> Result<Snapshot, FetchError> {
        let is_json = self
            .path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            serde_json::from_str(content).map_err(|e| {
                FetchError::invalid_response(format!("{}: {}", self.path.display(), e))
            })
        } else {
            serde_yaml::from_str(content).map_err(|e| {
                FetchError::invalid_response(format!("{}: {}", self.path.display(), e))
            })
        }
    }
}

#[async_trait]
impl SourceAdapter for SnapshotAdapter {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn fetch(&self, market: &str, keys: &[String]) -> Result<Vec<Record>, FetchError> {
        let content = fs::read_to_string(&self.path).await.map_err(|e| {
            FetchError::unavailable(format!("Failed to read {}: {}", self.path.display(), e))
        })?;

        let snapshot = self.parse(&content)?;

        let Some(symbols) = snapshot.get(market) else {
            return Ok(Vec::new());
        };

        Ok(keys
            .iter()
            .filter_map(|key| {
                symbols.get(key).map(|attributes| Record {
                    source: SourceId::ScrapedData,
                    symbol: key.clone(),
                    attributes: attributes.clone(),
                })
            })
            .collect())
    }
}
