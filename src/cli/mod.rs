//! Command-line interface for marketscan.
//!
//! Provides commands for starting a scan run, checking run status,
//! listing runs, and showing the resolved configuration.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::adapters::{DigestSink, MemorySink};
use crate::config::{self, AnalyzerSettings, SourceBackend};
use crate::core::{list_runs, run_status, EventLog, EventStore};
use crate::domain::{RunState, RunTrigger, ScanType};

/// marketscan - Multi-source market scan orchestrator
#[derive(Parser, Debug)]
#[command(name = "marketscan")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a scan run
    Run {
        /// Trigger payload JSON file ("-" reads stdin)
        #[arg(short, long, env = "MARKETSCAN_TRIGGER", conflicts_with = "scan_type")]
        trigger: Option<PathBuf>,

        /// Scan cadence (uses the configured watchlist)
        #[arg(short, long, value_enum)]
        scan_type: Option<ScanArg>,

        /// Request deep analysis
        #[arg(long)]
        deep: bool,

        /// Keep the digest in memory and print it instead of delivering it
        #[arg(long)]
        dry_run: bool,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Scan type for CLI (maps to ScanType)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ScanArg {
    Daily,
    Weekly,
    Monthly,
}

impl From<ScanArg> for ScanType {
    fn from(s: ScanArg) -> Self {
        match s {
            ScanArg::Daily => ScanType::Daily,
            ScanArg::Weekly => ScanType::Weekly,
            ScanArg::Monthly => ScanType::Monthly,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                trigger,
                scan_type,
                deep,
                dry_run,
            } => run_scan(trigger, scan_type, deep, dry_run).await,
            Commands::Status { run_id } => show_status(&run_id).await,
            Commands::Runs { limit } => show_runs(limit).await,
            Commands::Config => show_config(),
        }
    }
}

/// Build the trigger from a payload file, stdin, or flags
fn load_trigger(path: Option<PathBuf>, scan_type: Option<ScanArg>, deep: bool) -> Result<RunTrigger> {
    let mut trigger = match (path, scan_type) {
        (Some(path), _) => {
            let content = if path.as_os_str() == "-" {
                let mut buffer = String::new();
                io::stdin()
                    .read_to_string(&mut buffer)
                    .context("Failed to read trigger from stdin")?;
                buffer
            } else {
                std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read trigger file: {}", path.display()))?
            };
            RunTrigger::from_json(&content)?
        }
        (None, Some(scan_type)) => RunTrigger::new(scan_type.into()),
        (None, None) => anyhow::bail!("No trigger provided. Use --trigger <file> or --scan-type"),
    };

    trigger.deep_analysis |= deep;
    Ok(trigger)
}

async fn run_scan(
    trigger_file: Option<PathBuf>,
    scan_type: Option<ScanArg>,
    deep: bool,
    dry_run: bool,
) -> Result<()> {
    let cfg = config::config()?;
    let trigger = load_trigger(trigger_file, scan_type, deep)?;

    let events: Arc<dyn EventLog> = Arc::new(EventStore::new(cfg.runs_dir()));
    let sink: Arc<dyn DigestSink> = if dry_run {
        Arc::new(MemorySink::new())
    } else {
        cfg.sink()
    };

    let controller = cfg.controller(events, sink);
    let inputs = cfg.watchlists.resolve(&trigger);
    let outcome = controller.run(&trigger, inputs).await?;
    let run = &outcome.run;

    match run.state() {
        RunState::Succeeded => {
            if let Some(digest) = &outcome.digest {
                if dry_run {
                    println!("{}", serde_json::to_string_pretty(digest)?);
                } else {
                    for opp in &digest.opportunities {
                        println!(
                            "{:<10} {:<6} {:>3}  {:?}  {}",
                            opp.symbol,
                            opp.signal.to_string(),
                            opp.confidence,
                            opp.risk,
                            opp.rationale.join("; ")
                        );
                    }
                }
                if !digest.degraded_sources.is_empty() {
                    eprintln!("\nDegraded sources:");
                    for failure in &digest.degraded_sources {
                        eprintln!("  {}: {:?} - {}", failure.source, failure.kind, failure.message);
                    }
                }
                eprintln!(
                    "\n[Run {} succeeded: {} opportunities, fingerprint {}]",
                    run.id, digest.summary.total, digest.fingerprint
                );
            }
        }
        RunState::Failed { stage, cause, error } => {
            let stage = stage.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
            eprintln!("\n[Run {} failed in {} ({}): {}]", run.id, stage, cause, error);
            std::process::exit(1);
        }
        other => {
            eprintln!("\n[Run {} in state: {}]", run.id, other);
        }
    }

    Ok(())
}

/// Show the status of a run
async fn show_status(run_id_str: &str) -> Result<()> {
    let run_id = Uuid::parse_str(run_id_str)
        .with_context(|| format!("Invalid run ID: {}", run_id_str))?;

    let store = EventStore::open_default()?;
    let status = run_status(&store, run_id).await?;

    println!("Run ID: {}", status.run_id);
    if let Some(scan_type) = status.scan_type {
        println!("Scan type: {}", scan_type);
    }
    println!("State: {}", status.state);
    if let RunState::Failed { stage, cause, error } = &status.state {
        if let Some(stage) = stage {
            println!("Failed stage: {}", stage);
        }
        println!("Cause: {}", cause);
        println!("Error: {}", error);
    }
    println!("Started: {}", status.started_at);
    if let Some(completed) = status.completed_at {
        println!("Completed: {}", completed);
    }

    println!("\nStages:");
    for timing in &status.stage_timings {
        println!(
            "  {:<12} {:>8}ms  errors: {}",
            timing.stage.to_string(),
            timing.duration_ms,
            timing.error_count
        );
    }

    if !status.degraded_sources.is_empty() {
        println!("\nDegraded sources:");
        for source in &status.degraded_sources {
            println!("  {}", source);
        }
    }

    Ok(())
}

/// List recent runs
async fn show_runs(limit: usize) -> Result<()> {
    let store = EventStore::open_default()?;
    let runs = list_runs(&store, limit).await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<38} {:<10} {:<12} {:<20}", "RUN ID", "SCAN", "STATE", "STARTED");
    println!("{}", "-".repeat(82));

    for run in runs {
        let scan = run
            .scan_type
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<38} {:<10} {:<12} {:<20}",
            run.run_id,
            scan,
            run.state.to_string(),
            run.started_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("marketscan configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Environment: {}", cfg.environment);
    println!();
    println!("Paths:");
    println!("  Home:    {}", cfg.home.display());
    println!("  Runs:    {}", cfg.runs_dir().display());
    println!("  Digests: {}", cfg.archive_dir.display());
    println!();
    println!("Limits:");
    println!("  Run timeout:         {}s", cfg.limits.run_timeout_seconds);
    println!("  Collection deadline: {:?}", cfg.limits.collection_deadline());
    println!("  Fetch timeout:       {}s", cfg.limits.fetch_timeout_seconds);
    println!("  Max keys per source: {}", cfg.limits.max_keys_per_source);
    println!(
        "  Retry:               {} attempts, {}ms x{} (max {}ms)",
        cfg.retry.max_attempts,
        cfg.retry.initial_delay_ms,
        cfg.retry.backoff_multiplier,
        cfg.retry.max_delay_ms
    );
    println!();
    println!("Sources:");
    for source in &cfg.sources {
        let backend = match &source.backend {
            SourceBackend::Http { endpoint, .. } => format!("http {}", endpoint),
            SourceBackend::Snapshot(path) => format!("snapshot {}", path.display()),
        };
        println!("  {:<18} {}", source.id.to_string(), backend);
    }
    println!();
    match &cfg.analyzer {
        AnalyzerSettings::Heuristic => println!("Analyzer: heuristic"),
        AnalyzerSettings::Command { program, args, .. } => {
            println!("Analyzer: command {} {}", program, args.join(" "))
        }
    }
    println!(
        "Digest: confidence floor {}, webhook {}",
        cfg.confidence_floor
            .map(|f| f.to_string())
            .unwrap_or_else(|| "none".to_string()),
        cfg.webhook_url.as_deref().unwrap_or("(none)")
    );

    Ok(())
}
