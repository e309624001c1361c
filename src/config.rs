use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::relations::RelationScope;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub wikinet: WikinetConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

/// General settings: where the cache lives and which wiki language to use
#[derive(Debug, Clone, Deserialize)]
pub struct WikinetConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for WikinetConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            language: default_language(),
            log_level: default_log_level(),
        }
    }
}

/// Crawl budgets and traversal policy
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub max_nodes: Option<usize>,
    #[serde(default)]
    pub max_edges: Option<usize>,
    /// `family`, `political`, or `both` (also accepts `family,political`)
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_true")]
    pub fallback: bool,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub resume: bool,
    /// Write the checkpoint after this many processed identifiers (and always at batch end)
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,
    /// Checkpoint file; defaults to `<cache_dir>/crawl_state.json`
    #[serde(default)]
    pub state_path: Option<PathBuf>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_nodes: None,
            max_edges: None,
            scope: default_scope(),
            fallback: true,
            fail_fast: false,
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            resume: false,
            checkpoint_every: default_checkpoint_every(),
            state_path: None,
        }
    }
}

/// Outbound request policy
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_rps")]
    pub requests_per_second: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent_env")]
    pub user_agent_env: String,
    #[serde(default = "default_memory_cache_capacity")]
    pub memory_cache_capacity: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rps(),
            burst: default_burst(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            timeout_secs: default_timeout_secs(),
            user_agent_env: default_user_agent_env(),
            memory_cache_capacity: default_memory_cache_capacity(),
        }
    }
}

/// Disambiguation weights and lookup limits
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_sitelink_weight")]
    pub sitelink_weight: f64,
    #[serde(default = "default_label_weight")]
    pub label_weight: f64,
    #[serde(default = "default_context_weight")]
    pub context_weight: f64,
    #[serde(default = "default_ambiguity_margin")]
    pub ambiguity_margin: f64,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    #[serde(default = "default_category_limit")]
    pub category_limit: usize,
    /// Terms describing what the seeds are about (e.g. "royal", "bahrain")
    #[serde(default)]
    pub context_terms: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            sitelink_weight: default_sitelink_weight(),
            label_weight: default_label_weight(),
            context_weight: default_context_weight(),
            ambiguity_margin: default_ambiguity_margin(),
            search_limit: default_search_limit(),
            category_limit: default_category_limit(),
            context_terms: Vec::new(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".wikinet-cache")
}

fn default_language() -> String {
    "en".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_depth() -> usize {
    1
}

fn default_scope() -> String {
    "both".to_string()
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    25
}

fn default_concurrency() -> usize {
    4
}

fn default_checkpoint_every() -> usize {
    1
}

/// Slowest accepted request rate: one request every 100 seconds
pub const MIN_REQUESTS_PER_SECOND: f64 = 0.01;

fn default_rps() -> f64 {
    5.0
}

fn default_burst() -> u32 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent_env() -> String {
    "WIKINET_USER_AGENT".to_string()
}

fn default_memory_cache_capacity() -> usize {
    512
}

fn default_sitelink_weight() -> f64 {
    0.4
}

fn default_label_weight() -> f64 {
    0.45
}

fn default_context_weight() -> f64 {
    0.15
}

fn default_ambiguity_margin() -> f64 {
    0.05
}

fn default_search_limit() -> usize {
    10
}

fn default_category_limit() -> usize {
    200
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in WIKINET_CONFIG environment variable (must exist)
    /// 2. ./config.toml in current directory (built-in defaults if absent)
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignore errors - file is optional)
        let _ = dotenv::dotenv();

        let config = match std::env::var("WIKINET_CONFIG") {
            Ok(path) => Self::load_from(Path::new(&path))?,
            Err(_) => {
                let default_path = PathBuf::from("config.toml");
                if default_path.exists() {
                    Self::load_from(&default_path)?
                } else {
                    log::debug!("No config.toml found, using built-in defaults");
                    Config::default()
                }
            }
        };

        config.validate()?;

        Ok(config)
    }

    /// Parse a specific TOML file without validating it
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.crawl.max_nodes == Some(0) {
            anyhow::bail!("crawl.max_nodes must be greater than 0");
        }

        if self.crawl.max_edges == Some(0) {
            anyhow::bail!("crawl.max_edges must be greater than 0");
        }

        if self.crawl.batch_size == 0 || self.crawl.batch_size > 200 {
            anyhow::bail!("crawl.batch_size must be between 1 and 200");
        }

        if self.crawl.concurrency == 0 {
            anyhow::bail!("crawl.concurrency must be greater than 0");
        }

        self.scope()
            .with_context(|| format!("Invalid crawl.scope '{}'", self.crawl.scope))?;

        if self.crawl.checkpoint_every == 0 {
            anyhow::bail!("crawl.checkpoint_every must be greater than 0");
        }

        if !(self.http.requests_per_second >= MIN_REQUESTS_PER_SECOND) || !self.http.requests_per_second.is_finite() {
            anyhow::bail!(
                "http.requests_per_second must be a finite value of at least {}",
                MIN_REQUESTS_PER_SECOND
            );
        }

        if self.http.burst == 0 {
            anyhow::bail!("http.burst must be greater than 0");
        }

        if self.http.max_attempts == 0 {
            anyhow::bail!("http.max_attempts must be at least 1");
        }

        let r = &self.resolver;
        if r.sitelink_weight < 0.0 || r.label_weight < 0.0 || r.context_weight < 0.0 {
            anyhow::bail!("resolver weights must not be negative");
        }

        if r.sitelink_weight + r.label_weight + r.context_weight <= 0.0 {
            anyhow::bail!("resolver weights must not all be zero");
        }

        if r.ambiguity_margin < 0.0 {
            anyhow::bail!("resolver.ambiguity_margin must not be negative");
        }

        if self.wikinet.language.trim().is_empty() {
            anyhow::bail!("wikinet.language must not be empty");
        }

        Ok(())
    }

    /// Parsed relation scope
    pub fn scope(&self) -> crate::Result<RelationScope> {
        self.crawl.scope.parse()
    }

    /// SQLite cache database location
    pub fn cache_db_path(&self) -> PathBuf {
        self.wikinet.cache_dir.join("http_cache.sqlite")
    }

    /// Crawl checkpoint location
    pub fn state_path(&self) -> PathBuf {
        self.crawl
            .state_path
            .clone()
            .unwrap_or_else(|| self.wikinet.cache_dir.join("crawl_state.json"))
    }

    /// User agent sent with every request
    pub fn user_agent(&self) -> String {
        std::env::var(&self.http.user_agent_env).unwrap_or_else(|_| {
            format!("wikinet/{} (+https://example.com/contact)", env!("CARGO_PKG_VERSION"))
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}
