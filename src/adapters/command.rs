//! External scoring process.
//!
//! Spawns the configured program, writes the merged dataset and the run's
//! analysis options as JSON to its stdin, and reads the opportunity list as
//! JSON from its stdout. Feeding stdin and waiting for exit share one timeout.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::domain::{AnalysisContext, MergedDataset, Opportunity};

use super::Analyzer;

/// Analyzer that delegates to a subprocess
pub struct CommandAnalyzer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

/// Accepts either a bare list or `{"opportunities": [...]}`
#[derive(Deserialize)]
#[serde(untagged)]
enum AnalyzerOutput {
    List(Vec<Opportunity>),
    Wrapped { opportunities: Vec<Opportunity> },
}

impl CommandAnalyzer {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    async fn run(&self, input: Vec<u8>) -> Result<Vec<u8>> {
        let output = timeout(self.timeout, self.exchange(input))
            .await
            .with_context(|| {
                format!("Analyzer '{}' timed out after {:?}", self.program, self.timeout)
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "Analyzer '{}' failed with exit code {}: {}",
                self.program,
                exit_code,
                stderr.trim()
            );
        }

        Ok(output.stdout)
    }

    /// Write stdin while draining stdout, so a full pipe on either side can't stall the child
    async fn exchange(&self, input: Vec<u8>) -> Result<std::process::Output> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn analyzer '{}'", self.program))?;

        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&input).await?;
                // Dropping stdin signals EOF
            }
            Ok::<_, std::io::Error>(())
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output =
            output.with_context(|| format!("Failed to wait for analyzer '{}'", self.program))?;
        // A child may exit without reading all of stdin; its exit status decides
        if let Err(e) = fed {
            if output.status.success() && e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(e).context("Failed to write dataset to analyzer stdin");
            }
        }

        Ok(output)
    }
}

#[async_trait]
impl Analyzer for CommandAnalyzer {
    fn name(&self) -> &str {
        &self.program
    }

    async fn analyze(
        &self,
        dataset: &MergedDataset,
        context: &AnalysisContext,
    ) -> Result<Vec<Opportunity>> {
        let input = serde_json::to_vec(&dataset.snapshot(context))
            .context("Failed to serialize dataset")?;

        let stdout = self.run(input).await?;

        let parsed: AnalyzerOutput =
            serde_json::from_slice(&stdout).context("Analyzer output is not valid JSON")?;

        Ok(match parsed {
            AnalyzerOutput::List(opps) => opps,
            AnalyzerOutput::Wrapped { opportunities } => opportunities,
        })
    }
}
