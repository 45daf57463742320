use anyhow::{Context, Result};
use liveness::ProbeOptions;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONFIG: &str = "easm.yaml";
pub const DEFAULT_DB: &str = "easm.db";

#[derive(Debug, Default, Deserialize, Clone)]
pub struct RunConfig {
    pub domains: Option<Vec<String>>,
    pub mode: Option<String>,
    pub wordlist: Option<PathBuf>,
    pub threads: Option<usize>,
    pub webhook: Option<String>,
    pub database: Option<PathBuf>,
    pub report: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct DiscoveryConfig {
    pub subfinder: Option<String>,
    pub dnsx: Option<String>,
    pub seed_concurrency: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub permutation_tokens: Option<Vec<String>>,
    pub max_permutations: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ProbeConfig {
    pub ports: Option<String>,
    pub timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub qps: Option<u32>,
    pub redirects: Option<usize>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct NotifyConfig {
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub run: Option<RunConfig>,
    pub discovery: Option<DiscoveryConfig>,
    pub probe: Option<ProbeConfig>,
    pub notify: Option<NotifyConfig>,
}

/// Load the YAML config. Without an explicit path, `./easm.yaml` is used if it
/// exists. An explicit path that cannot be read, or any parse error, is fatal.
pub fn load_config(path: Option<&Path>) -> Result<Option<Config>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG);
            if p.exists() { p.to_path_buf() } else { return Ok(None); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading config {}", path.display()))?;
    let cfg = serde_yaml::from_str(&s).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(Some(cfg))
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("run mode is not set; set run.mode to 'fast' or 'complete' or pass --mode")]
    MissingMode,
    #[error("invalid run mode {0:?}; pick 'fast' or 'complete'")]
    InvalidMode(String),
    #[error("no seed domains configured (run.domains or --domain)")]
    NoSeeds,
    #[error("seed {0:?} is not a domain name")]
    InvalidSeed(String),
    #[error("threads must be greater than zero")]
    ZeroThreads,
    #[error("complete runs need an enumeration wordlist (run.wordlist or --wordlist)")]
    MissingWordlist,
    #[error("invalid port list {0:?}")]
    InvalidPorts(String),
    #[error("probe.qps {0} is above the limit of 1000000")]
    QpsTooHigh(u32),
}

/// Highest accepted `probe.qps`.
pub const MAX_QPS: u32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Passive enumeration only.
    Fast,
    /// Passive plus wordlist brute force and permutation expansion.
    Complete,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Fast => "fast",
            RunMode::Complete => "complete",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(RunMode::Fast),
            "complete" => Ok(RunMode::Complete),
            _ => Err(ConfigError::InvalidMode(s.to_string())),
        }
    }
}

/// Parse a comma-separated list of ports/ranges (e.g. "443,80" or "8000-8010").
/// Order is kept: the probe tries ports in the order given.
pub fn parse_ports(list: &str) -> Result<Vec<u16>, ConfigError> {
    let bad = || ConfigError::InvalidPorts(list.to_string());
    let mut ports = Vec::new();
    for part in list.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let s: u16 = start.trim().parse().map_err(|_| bad())?;
            let e: u16 = end.trim().parse().map_err(|_| bad())?;
            if s == 0 || e == 0 || s > e {
                return Err(bad());
            }
            ports.extend(s..=e);
        } else {
            let p: u16 = part.parse().map_err(|_| bad())?;
            if p == 0 {
                return Err(bad());
            }
            ports.push(p);
        }
    }
    let mut seen = std::collections::HashSet::new();
    ports.retain(|p| seen.insert(*p));
    if ports.is_empty() {
        return Err(bad());
    }
    Ok(ports)
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default, Clone)]
pub struct RunOverrides {
    pub mode: Option<String>,
    pub domains: Vec<String>,
    pub webhook: Option<String>,
    pub wordlist: Option<PathBuf>,
    pub threads: Option<usize>,
    pub database: Option<PathBuf>,
    pub report: Option<PathBuf>,
}

/// Fully validated settings for one run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub mode: RunMode,
    pub seeds: Vec<String>,
    pub wordlist: Option<PathBuf>,
    pub threads: usize,
    pub webhook: Option<String>,
    pub database: PathBuf,
    pub report: Option<PathBuf>,
    pub subfinder: String,
    pub dnsx: String,
    pub seed_concurrency: usize,
    pub discovery_timeout: Duration,
    pub permutation_tokens: Vec<String>,
    pub max_permutations: usize,
    pub probe: ProbeOptions,
    pub notify_timeout: Duration,
    pub notify_retries: u32,
    pub notify_retry_delay: Duration,
}

pub fn database_path(cfg: Option<&Config>, over: Option<&Path>) -> PathBuf {
    over.map(Path::to_path_buf)
        .or_else(|| cfg.and_then(|c| c.run.as_ref()).and_then(|r| r.database.clone()))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB))
}

impl RunSettings {
    pub fn resolve(cfg: Option<&Config>, over: &RunOverrides) -> Result<Self, ConfigError> {
        let run = cfg.and_then(|c| c.run.clone()).unwrap_or_default();
        let disc = cfg.and_then(|c| c.discovery.clone()).unwrap_or_default();
        let probe = cfg.and_then(|c| c.probe.clone()).unwrap_or_default();
        let notify = cfg.and_then(|c| c.notify.clone()).unwrap_or_default();

        let mode: RunMode = over.mode.clone().or(run.mode).ok_or(ConfigError::MissingMode)?.parse()?;

        let raw_seeds = if over.domains.is_empty() { run.domains.unwrap_or_default() } else { over.domains.clone() };
        let mut seeds = Vec::new();
        for s in raw_seeds.iter().filter(|s| !s.trim().is_empty()) {
            let d = easm_core::canonicalize(s).ok_or_else(|| ConfigError::InvalidSeed(s.clone()))?;
            if !seeds.contains(&d) {
                seeds.push(d);
            }
        }
        if seeds.is_empty() {
            return Err(ConfigError::NoSeeds);
        }

        let threads = over.threads.or(run.threads).unwrap_or(100);
        if threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        let wordlist = over.wordlist.clone().or(run.wordlist);
        if mode == RunMode::Complete && wordlist.is_none() {
            return Err(ConfigError::MissingWordlist);
        }

        let defaults = ProbeOptions::default();
        let ports = match probe.ports.as_deref() {
            Some(spec) => parse_ports(spec)?,
            None => defaults.ports.clone(),
        };

        let qps = probe.qps.filter(|q| *q > 0);
        if let Some(q) = qps.filter(|q| *q > MAX_QPS) {
            return Err(ConfigError::QpsTooHigh(q));
        }

        Ok(RunSettings {
            mode,
            seeds,
            wordlist,
            threads,
            webhook: over.webhook.clone().or(run.webhook).filter(|w| !w.trim().is_empty()),
            database: over.database.clone().or(run.database).unwrap_or_else(|| PathBuf::from(DEFAULT_DB)),
            report: over.report.clone().or(run.report),
            subfinder: disc.subfinder.unwrap_or_else(|| "subfinder".into()),
            dnsx: disc.dnsx.unwrap_or_else(|| "dnsx".into()),
            seed_concurrency: disc.seed_concurrency.unwrap_or(4).max(1),
            discovery_timeout: Duration::from_secs(disc.timeout_secs.unwrap_or(900)),
            permutation_tokens: disc
                .permutation_tokens
                .unwrap_or_else(|| discovery::DEFAULT_TOKENS.iter().map(|s| s.to_string()).collect()),
            max_permutations: disc.max_permutations.unwrap_or(20_000),
            probe: ProbeOptions {
                ports,
                timeout_ms: probe.timeout_ms.unwrap_or(defaults.timeout_ms),
                redirects: probe.redirects.unwrap_or(defaults.redirects),
                concurrency: probe.concurrency.unwrap_or(defaults.concurrency),
                qps,
                user_agent: probe.user_agent.unwrap_or(defaults.user_agent),
            },
            notify_timeout: notify.timeout_ms.map(Duration::from_millis).unwrap_or(::notify::DEFAULT_TIMEOUT),
            notify_retries: notify.retries.unwrap_or(0),
            notify_retry_delay: Duration::from_millis(notify.retry_delay_ms.unwrap_or(1000)),
        })
    }
}
