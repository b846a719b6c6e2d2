//! Digest delivery sinks.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;

use crate::domain::Digest;

use super::DigestSink;

/// Writes each digest to `<dir>/<yyyy-mm-dd>/<run_id>.json`
pub struct ArchiveSink {
    dir: PathBuf,
}

impl ArchiveSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn digest_path(&self, digest: &Digest) -> PathBuf {
        self.dir
            .join(digest.generated_at.format("%Y-%m-%d").to_string())
            .join(format!("{}.json", digest.run_id))
    }
}

#[async_trait]
impl DigestSink for ArchiveSink {
    fn name(&self) -> &str {
        "archive"
    }

    async fn deliver(&self, digest: &Digest) -> Result<()> {
        let path = self.digest_path(digest);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create digest directory: {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(digest).context("Failed to serialize digest")?;
        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write digest: {}", path.display()))?;

        Ok(())
    }
}

/// POSTs each digest as JSON to a delivery queue endpoint
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DigestSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, digest: &Digest) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", format!("{}:{}", digest.run_id, digest.fingerprint))
            .json(digest)
            .send()
            .await
            .with_context(|| format!("Failed to POST digest to {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Digest webhook returned {}: {}", status, body.trim());
        }

        Ok(())
    }
}

/// Delivers to each sink in order; the first failure fails the delivery
pub struct SinkChain {
    sinks: Vec<Arc<dyn DigestSink>>,
}

impl SinkChain {
    pub fn new(sinks: Vec<Arc<dyn DigestSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl DigestSink for SinkChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn deliver(&self, digest: &Digest) -> Result<()> {
        for sink in &self.sinks {
            sink.deliver(digest)
                .await
                .with_context(|| format!("Sink '{}' rejected digest", sink.name()))?;
        }
        Ok(())
    }
}

/// Keeps digests in memory (dry runs, tests)
#[derive(Default)]
pub struct MemorySink {
    digests: Mutex<Vec<Digest>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn digests(&self) -> Vec<Digest> {
        self.digests
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<Digest> {
        self.digests.lock().ok().and_then(|d| d.last().cloned())
    }
}

#[async_trait]
impl DigestSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn deliver(&self, digest: &Digest) -> Result<()> {
        self.digests
            .lock()
            .map_err(|_| anyhow::anyhow!("Memory sink lock poisoned"))?
            .push(digest.clone());
        Ok(())
    }
}
