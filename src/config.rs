//! Configuration for marketscan.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (MARKETSCAN_HOME, MARKETSCAN_ENV)
//! 2. Config file (.marketscan/config.yaml)
//! 3. Defaults (~/.marketscan, dev profile)
//!
//! Config file discovery:
//! - Searches current directory and parents for .marketscan/config.yaml
//! - Paths in config file are relative to the .marketscan/ directory

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapters::{
    Analyzer, ArchiveSink, CommandAnalyzer, DigestSink, HeuristicAnalyzer, HttpSourceAdapter,
    SinkChain, SnapshotAdapter, SourceAdapter, SourceFetcher, WebhookSink,
};
use crate::core::{
    AnalysisStage, Collector, DigestAssembler, EventLog, RetryPolicy, RunLimits,
    WorkflowController,
};
use crate::domain::{RunTrigger, ScanType, SourceId};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const HOME_ENV: &str = "MARKETSCAN_HOME";
const ENV_ENV: &str = "MARKETSCAN_ENV";

/// Deployment profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Staging,
    Prod,
}

impl Environment {
    /// Default per-fetch timeout for this profile
    pub fn fetch_timeout_seconds(&self) -> u64 {
        match self {
            Self::Dev => 60,
            Self::Staging => 120,
            Self::Prod => 300,
        }
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Dev),
            "staging" => Ok(Self::Staging),
            "prod" | "production" => Ok(Self::Prod),
            other => anyhow::bail!("Unknown environment '{}' (expected dev, staging, or prod)", other),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Dev => "dev",
            Self::Staging => "staging",
            Self::Prod => "prod",
        };
        f.write_str(s)
    }
}

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,

    /// Engine state directory (relative to .marketscan/)
    #[serde(default)]
    pub home: Option<String>,

    #[serde(default)]
    pub environment: Option<Environment>,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub retry: Option<RetryPolicy>,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    #[serde(default)]
    pub watchlists: Option<Watchlists>,

    #[serde(default)]
    pub digest: DigestConfig,

    #[serde(default)]
    pub analyzer: AnalyzerConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitsConfig {
    pub run_timeout_seconds: Option<u64>,
    pub collection_fraction: Option<f64>,
    /// Overrides the environment profile's fetch timeout
    pub fetch_timeout_seconds: Option<u64>,
    pub max_keys_per_source: Option<usize>,
}

/// One market data source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: SourceId,

    /// HTTP feed URL
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Env var holding the feed's API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Local JSON/YAML snapshot file
    #[serde(default)]
    pub snapshot: Option<String>,

    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    #[serde(default)]
    pub batch_size: Option<usize>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Where a source's records come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceBackend {
    Http {
        endpoint: String,
        api_key: Option<String>,
    },
    Snapshot(PathBuf),
}

/// A source with its backend resolved
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub id: SourceId,
    pub backend: SourceBackend,
    pub timeout: Option<Duration>,
    pub batch_size: Option<usize>,
}

impl ResolvedSource {
    fn adapter(&self) -> Arc<dyn SourceAdapter> {
        match &self.backend {
            SourceBackend::Http { endpoint, api_key } => {
                let mut adapter = HttpSourceAdapter::new(self.id.as_str(), endpoint.clone());
                if let Some(key) = api_key {
                    adapter = adapter.with_api_key(key.clone());
                }
                Arc::new(adapter)
            }
            SourceBackend::Snapshot(path) => Arc::new(SnapshotAdapter::new(path.clone())),
        }
    }

    pub fn fetcher(&self) -> SourceFetcher {
        let mut fetcher = SourceFetcher::new(self.id, self.adapter());
        if let Some(batch_size) = self.batch_size {
            fetcher = fetcher.with_batch_size(batch_size);
        }
        if let Some(timeout) = self.timeout {
            fetcher = fetcher.with_timeout(timeout);
        }
        fetcher
    }
}

/// Ticker lists for one scan cadence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watchlist {
    #[serde(default)]
    pub stock_tickers: Vec<String>,
    #[serde(default)]
    pub nse_tickers: Vec<String>,
}

/// Default tickers used when a trigger carries none
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watchlists {
    #[serde(default = "default_daily")]
    pub daily: Watchlist,
    #[serde(default = "default_weekly")]
    pub weekly: Watchlist,
    #[serde(default = "default_weekly")]
    pub monthly: Watchlist,
    #[serde(default = "default_bond_series")]
    pub bond_series: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

const DAILY_US: &[&str] = &[
    "JNJ", "PG", "KO", "PEP", "MCD", "WMT", "ABBV", "CVX", "XOM", "T", "VZ", "SO", "D", "NEE",
    "DUK", "O",
];
const DAILY_NSE: &[&str] = &[
    "SCOM.NB", "KCB.NB", "EQTY.NB", "EABL.NB", "BAT.NB", "SCBK.NB", "ABSA.NB", "NCBA.NB",
];
const WEEKLY_US_EXTRA: &[&str] = &["STAG", "AVB", "EXR", "PSA"];
const WEEKLY_NSE_EXTRA: &[&str] = &["BAMB.NB", "COOP.NB", "SBIC.NB", "TOTL.NB", "UNGA.NB", "KNRE.NB"];

fn default_daily() -> Watchlist {
    Watchlist {
        stock_tickers: strings(DAILY_US),
        nse_tickers: strings(DAILY_NSE),
    }
}

fn default_weekly() -> Watchlist {
    Watchlist {
        stock_tickers: strings(&[DAILY_US, WEEKLY_US_EXTRA].concat()),
        nse_tickers: strings(&[DAILY_NSE, WEEKLY_NSE_EXTRA].concat()),
    }
}

fn default_bond_series() -> Vec<String> {
    strings(&["US2Y", "US5Y", "US10Y", "US30Y"])
}

impl Default for Watchlists {
    fn default() -> Self {
        Self {
            daily: default_daily(),
            weekly: default_weekly(),
            monthly: default_weekly(),
            bond_series: default_bond_series(),
        }
    }
}

impl Watchlists {
    pub fn for_scan(&self, scan_type: ScanType) -> &Watchlist {
        match scan_type {
            ScanType::Daily => &self.daily,
            ScanType::Weekly => &self.weekly,
            ScanType::Monthly => &self.monthly,
        }
    }

    /// Per-source query keys for a trigger.
    ///
    /// A trigger without any tickers falls back to the watchlist for its
    /// scan type. Scraped data queries the union of both ticker lists.
    pub fn resolve(&self, trigger: &RunTrigger) -> BTreeMap<SourceId, Vec<String>> {
        let (stocks, nse) = if trigger.stock_tickers.is_empty() && trigger.nse_tickers.is_empty() {
            let list = self.for_scan(trigger.scan_type);
            (list.stock_tickers.clone(), list.nse_tickers.clone())
        } else {
            (trigger.stock_tickers.clone(), trigger.nse_tickers.clone())
        };

        let stocks = dedup(stocks);
        let nse = dedup(nse);
        let scraped = dedup(stocks.iter().chain(nse.iter()).cloned().collect());

        let mut inputs = BTreeMap::new();
        inputs.insert(SourceId::UsEquities, stocks);
        inputs.insert(SourceId::RegionalEquities, nse);
        inputs.insert(SourceId::FixedIncome, dedup(self.bond_series.clone()));
        inputs.insert(SourceId::ScrapedData, scraped);
        inputs
    }
}

/// Trim, drop blanks and duplicates, keep first-seen order
fn dedup(keys: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(keys.len());
    for key in keys {
        let key = key.trim();
        if !key.is_empty() && !out.iter().any(|k| k == key) {
            out.push(key.to_string());
        }
    }
    out
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DigestConfig {
    /// Drop opportunities below this confidence
    pub confidence_floor: Option<u8>,
    /// Digest archive directory (relative to .marketscan/), defaults to <home>/digests
    pub archive_dir: Option<String>,
    /// Delivery queue endpoint
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerKind {
    #[default]
    Heuristic,
    Command,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default)]
    pub kind: AnalyzerKind,
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub timeout_seconds: Option<u64>,
}

/// Analyzer selection after validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyzerSettings {
    Heuristic,
    Command {
        program: String,
        args: Vec<String>,
        timeout: Duration,
    },
}

impl AnalyzerSettings {
    pub fn build(&self) -> Arc<dyn Analyzer> {
        match self {
            Self::Heuristic => Arc::new(HeuristicAnalyzer::new()),
            Self::Command {
                program,
                args,
                timeout,
            } => Arc::new(CommandAnalyzer::new(program.clone(), args.clone(), *timeout)),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to marketscan home (engine state)
    pub home: PathBuf,
    pub environment: Environment,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub limits: RunLimits,
    pub retry: RetryPolicy,
    /// Enabled sources, in dispatch order
    pub sources: Vec<ResolvedSource>,
    pub watchlists: Watchlists,
    pub confidence_floor: Option<u8>,
    pub archive_dir: PathBuf,
    pub webhook_url: Option<String>,
    pub analyzer: AnalyzerSettings,
}

impl ResolvedConfig {
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }

    /// Configured sinks: the archive, then the webhook if set
    pub fn sink(&self) -> Arc<dyn DigestSink> {
        let mut sinks: Vec<Arc<dyn DigestSink>> = vec![Arc::new(ArchiveSink::new(&self.archive_dir))];
        if let Some(url) = &self.webhook_url {
            sinks.push(Arc::new(WebhookSink::new(url.clone())));
        }
        Arc::new(SinkChain::new(sinks))
    }

    /// Wire a controller from this configuration
    pub fn controller(
        &self,
        events: Arc<dyn EventLog>,
        sink: Arc<dyn DigestSink>,
    ) -> WorkflowController {
        let collector = Collector::new(
            self.sources.iter().map(ResolvedSource::fetcher).collect(),
            self.retry.clone(),
            self.limits.fetch_timeout(),
        )
        .with_events(events.clone());

        WorkflowController::new(
            collector,
            AnalysisStage::new(self.analyzer.build()),
            DigestAssembler::new(self.confidence_floor),
            sink,
            events,
            self.limits.clone(),
        )
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".marketscan").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Environment variable overrides
#[derive(Debug, Clone, Default)]
struct EnvOverrides {
    home: Option<String>,
    environment: Option<String>,
}

impl EnvOverrides {
    fn from_process() -> Self {
        Self {
            home: std::env::var(HOME_ENV).ok().filter(|v| !v.is_empty()),
            environment: std::env::var(ENV_ENV).ok().filter(|v| !v.is_empty()),
        }
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let config_file = find_config_file();
    let parsed = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };
    resolve(config_file, parsed, EnvOverrides::from_process())
}

fn resolve(config_path: Option<PathBuf>, file: ConfigFile, env: EnvOverrides) -> Result<ResolvedConfig> {
    // Relative paths in the config file resolve against .marketscan/
    let config_dir = config_path
        .as_ref()
        .and_then(|p| p.parent())
        .map(Path::to_path_buf);

    let home = if let Some(env_home) = env.home {
        PathBuf::from(env_home)
    } else if let (Some(dir), Some(home)) = (&config_dir, &file.home) {
        resolve_path(dir, home)
    } else {
        dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(".marketscan")
    };
    let relative = |p: &str| match &config_dir {
        Some(dir) => resolve_path(dir, p),
        None => PathBuf::from(p),
    };

    let environment = match env.environment {
        Some(name) => name
            .parse::<Environment>()
            .with_context(|| format!("Invalid {}", ENV_ENV))?,
        None => file.environment.unwrap_or_default(),
    };

    let defaults = RunLimits::default();
    let mut limits = RunLimits {
        run_timeout_seconds: file
            .limits
            .run_timeout_seconds
            .unwrap_or(defaults.run_timeout_seconds),
        collection_fraction: file
            .limits
            .collection_fraction
            .unwrap_or(defaults.collection_fraction),
        fetch_timeout_seconds: file
            .limits
            .fetch_timeout_seconds
            .unwrap_or_else(|| environment.fetch_timeout_seconds()),
        max_keys_per_source: file
            .limits
            .max_keys_per_source
            .unwrap_or(defaults.max_keys_per_source),
    };

    if !(limits.collection_fraction > 0.0 && limits.collection_fraction <= 1.0) {
        anyhow::bail!(
            "limits.collection_fraction must be in (0, 1], got {}",
            limits.collection_fraction
        );
    }

    // Every retry of a timing-out source must fit inside the collection deadline
    let retry = file.retry.unwrap_or_default();
    let max_fetch = limits.max_fetch_timeout_seconds(&retry);
    match file.limits.fetch_timeout_seconds {
        Some(secs) if secs > max_fetch => anyhow::bail!(
            "limits.fetch_timeout_seconds is {}s but {} attempts must fit in the {:?} collection deadline (max {}s)",
            secs,
            retry.max_attempts,
            limits.collection_deadline(),
            max_fetch
        ),
        Some(_) => {}
        None if limits.fetch_timeout_seconds > max_fetch => {
            debug!(
                profile = %environment,
                from = limits.fetch_timeout_seconds,
                to = max_fetch,
                "Clamped profile fetch timeout to the retry budget"
            );
            limits.fetch_timeout_seconds = max_fetch;
        }
        None => {}
    }

    let sources = resolve_sources(&file.sources, &home, max_fetch, relative)?;

    let analyzer = match file.analyzer.kind {
        AnalyzerKind::Heuristic => AnalyzerSettings::Heuristic,
        AnalyzerKind::Command => AnalyzerSettings::Command {
            program: file
                .analyzer
                .program
                .clone()
                .context("analyzer.program is required when analyzer.kind is 'command'")?,
            args: file.analyzer.args.clone(),
            timeout: Duration::from_secs(file.analyzer.timeout_seconds.unwrap_or(300)),
        },
    };

    if let Some(floor) = file.digest.confidence_floor {
        if floor > crate::domain::MAX_CONFIDENCE {
            anyhow::bail!("digest.confidence_floor must be at most 100, got {}", floor);
        }
    }

    let archive_dir = match &file.digest.archive_dir {
        Some(dir) => relative(dir),
        None => home.join("digests"),
    };

    Ok(ResolvedConfig {
        environment,
        config_file: config_path,
        limits,
        retry,
        sources,
        watchlists: file.watchlists.unwrap_or_default(),
        confidence_floor: file.digest.confidence_floor,
        archive_dir,
        webhook_url: file.digest.webhook_url,
        analyzer,
        home,
    })
}

/// The web scraper runs under a fixed timeout in every profile
fn default_source_timeout(id: SourceId) -> Option<u64> {
    match id {
        SourceId::ScrapedData => Some(120),
        _ => None,
    }
}

/// Unlisted sources read `<home>/snapshots/<source>.json`; disabled ones are dropped
fn resolve_sources(
    configured: &[SourceConfig],
    home: &Path,
    max_fetch: u64,
    relative: impl Fn(&str) -> PathBuf,
) -> Result<Vec<ResolvedSource>> {
    let default_timeout =
        |id| default_source_timeout(id).map(|secs: u64| Duration::from_secs(secs.min(max_fetch)));

    let mut resolved = Vec::new();

    for id in SourceId::ALL {
        let mut matching = configured.iter().filter(|s| s.id == id);
        let entry = matching.next();
        if matching.next().is_some() {
            anyhow::bail!("Source '{}' is configured more than once", id);
        }

        let Some(entry) = entry else {
            resolved.push(ResolvedSource {
                id,
                backend: SourceBackend::Snapshot(
                    home.join("snapshots").join(format!("{}.json", id)),
                ),
                timeout: default_timeout(id),
                batch_size: None,
            });
            continue;
        };

        if !entry.enabled {
            continue;
        }

        let backend = match (&entry.endpoint, &entry.snapshot) {
            (Some(endpoint), None) => SourceBackend::Http {
                endpoint: endpoint.clone(),
                api_key: match &entry.api_key_env {
                    Some(var) => Some(
                        std::env::var(var)
                            .with_context(|| format!("Source '{}': {} is not set", id, var))?,
                    ),
                    None => None,
                },
            },
            (None, Some(snapshot)) => SourceBackend::Snapshot(relative(snapshot)),
            (None, None) => SourceBackend::Snapshot(
                home.join("snapshots").join(format!("{}.json", id)),
            ),
            (Some(_), Some(_)) => {
                anyhow::bail!("Source '{}' sets both endpoint and snapshot", id)
            }
        };

        if entry.batch_size == Some(0) {
            anyhow::bail!("Source '{}' has batch_size 0", id);
        }

        let timeout = match entry.timeout_seconds {
            Some(secs) if secs > max_fetch => anyhow::bail!(
                "Source '{}' timeout_seconds is {}s, above the {}s retry budget",
                id,
                secs,
                max_fetch
            ),
            Some(secs) => Some(Duration::from_secs(secs.max(1))),
            None => default_timeout(id),
        };

        resolved.push(ResolvedSource {
            id,
            backend,
            timeout,
            batch_size: entry.batch_size,
        });
    }

    Ok(resolved)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Get the marketscan home directory (engine state)
pub fn marketscan_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the runs directory ($MARKETSCAN_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.runs_dir())
}
