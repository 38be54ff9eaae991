use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::Deserialize;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Top-level configuration loaded from `config.json`.
//
// Every section has defaults, so the file itself is optional.
// CLI flags override individual values after loading.
//
// Credentials are NEVER read from this file. Only the name of
// the environment variable holding them may be configured.
//
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Platform to collect from
    pub source: SourceKind,

    pub collector: CollectorConfig,
    pub output: OutputConfig,
    pub keyword: KeywordConfig,
    pub credentials: CredentialsConfig,
    pub http: HttpConfig,
    pub twitter: TwitterConfig,
    pub facebook: FacebookConfig,
    pub metrics: MetricsConfig,

    /// Optional debug configuration
    pub debug: Option<DebugConfig>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Twitter,
    Facebook,
}

impl SourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::Twitter => "twitter",
            SourceKind::Facebook => "facebook",
        }
    }

    /// Environment variable holding the platform credential.
    pub fn default_token_env(&self) -> &'static str {
        match self {
            SourceKind::Twitter => "TWITTER_BEARER_TOKEN",
            SourceKind::Facebook => "FACEBOOK_ACCESS_TOKEN",
        }
    }

    /// Output file stem for the full dataset and the batch files.
    fn default_output_names(&self) -> (&'static str, &'static str) {
        match self {
            SourceKind::Twitter => ("tweets_data", "tweets_batch"),
            SourceKind::Facebook => ("fb_posts_data", "fb_posts_batch"),
        }
    }

    fn page_size_range(&self) -> (u32, u32) {
        match self {
            SourceKind::Twitter => (10, 100),
            SourceKind::Facebook => (1, 100),
        }
    }
}

// ------------------------------------------------------------
// Collector loop tunables
// ------------------------------------------------------------
//
// Defaults mirror the limits of the Twitter v2 recent search
// endpoint (900 requests / 15 minutes, 100 results per page).
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CollectorConfig {
    /// Stop once this many unique records are collected
    pub max_records: usize,

    /// Items requested per page
    pub page_size: u32,

    /// Records per durable batch file
    pub batch_size: usize,

    /// Bounded worker count for per-page normalization
    pub normalize_workers: usize,

    /// Per-item normalization timeout
    pub normalize_timeout_ms: u64,

    /// Total fetch attempts for transient failures (first try included)
    pub fetch_attempts: u32,

    /// Backoff before the second attempt; doubles afterwards
    pub backoff_base_ms: u64,

    /// Backoff ceiling
    pub backoff_max_ms: u64,

    /// Consecutive rate-limit waits tolerated on a single page
    pub max_rate_limit_waits: u32,

    /// Write attempts per batch / final artifact
    pub flush_attempts: u32,

    /// Fixed delay between write attempts
    pub flush_delay_ms: u64,

    /// Conservative call budget assumed after a reset window passes
    pub default_remaining_calls: u32,

    /// Advertised requests per rate-limit window
    pub requests_per_window: u32,

    /// Rate-limit window length
    pub window_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_records: 1000,
            page_size: 100,
            batch_size: 500,
            normalize_workers: 3,
            normalize_timeout_ms: 10_000,
            fetch_attempts: 2,
            backoff_base_ms: 4_000,
            backoff_max_ms: 60_000,
            max_rate_limit_waits: 3,
            flush_attempts: 3,
            flush_delay_ms: 2_000,
            default_remaining_calls: 900,
            requests_per_window: 900,
            window_secs: 900,
        }
    }
}

impl CollectorConfig {
    /// Delay between successful pages.
    ///
    /// One request per `window / requests` plus a 10% margin,
    /// i.e. 1.1s for 900 requests per 15 minutes.
    pub fn page_delay(&self) -> Duration {
        let per_request = self.window_secs as f64 / self.requests_per_window.max(1) as f64;
        Duration::from_secs_f64(per_request * 1.1)
    }

    pub fn normalize_timeout(&self) -> Duration {
        Duration::from_millis(self.normalize_timeout_ms)
    }

    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }
}

// ------------------------------------------------------------
// Output configuration
// ------------------------------------------------------------
//
// Files land in `dir` as `<full_name>.json` and
// `<batch_prefix>_<n>.json`. Empty names fall back to the
// platform defaults (e.g. `tweets_data`, `tweets_batch`).
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: String,
    pub full_name: Option<String>,
    pub batch_prefix: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: ".".to_string(),
            full_name: None,
            batch_prefix: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KeywordConfig {
    /// Case-insensitive keyword replacements applied before the run
    pub aliases: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Overrides the platform's default credential variable
    pub env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TwitterConfig {
    pub base_url: String,
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.twitter.com".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FacebookConfig {
    pub base_url: String,
    pub api_version: String,
}

impl Default for FacebookConfig {
    fn default() -> Self {
        Self {
            base_url: "https://graph.facebook.com".to_string(),
            api_version: "v19.0".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    /// Seconds between `[METRICS]` log lines, 0 disables the reporter
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

// ------------------------------------------------------------
// Debug configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DebugConfig {
    /// Logs every raw page body at debug level
    pub log: Option<bool>,
}

impl Config {
    pub fn debug_log(&self) -> bool {
        self.debug
            .as_ref()
            .map_or(false, |d| d.log.unwrap_or(false))
    }

    pub fn token_env(&self) -> String {
        self.credentials
            .env
            .clone()
            .unwrap_or_else(|| self.source.default_token_env().to_string())
    }

    pub fn full_name(&self) -> String {
        self.output
            .full_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.source.default_output_names().0.to_string())
    }

    pub fn batch_prefix(&self) -> String {
        self.output
            .batch_prefix
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.source.default_output_names().1.to_string())
    }

    /// Rejects values the loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        let c = &self.collector;
        let (min, max) = self.source.page_size_range();

        if c.page_size < min || c.page_size > max {
            bail!(
                "page_size {} out of range {}..={} for {}",
                c.page_size,
                min,
                max,
                self.source.name()
            );
        }
        if c.max_records == 0 {
            bail!("max_records must be at least 1");
        }
        if c.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if c.normalize_workers == 0 {
            bail!("normalize_workers must be at least 1");
        }
        if c.fetch_attempts == 0 || c.flush_attempts == 0 {
            bail!("fetch_attempts and flush_attempts must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();

        assert_eq!(cfg.source, SourceKind::Twitter);
        assert_eq!(cfg.collector.max_records, 1000);
        assert_eq!(cfg.collector.page_size, 100);
        assert_eq!(cfg.collector.batch_size, 500);
        assert_eq!(cfg.collector.fetch_attempts, 2);
        assert_eq!(cfg.full_name(), "tweets_data");
        assert_eq!(cfg.batch_prefix(), "tweets_batch");
        assert_eq!(cfg.token_env(), "TWITTER_BEARER_TOKEN");
        assert!(!cfg.debug_log());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "source": "facebook",
                "collector": { "batch_size": 5, "page_size": 25 },
                "keyword": { "aliases": { "miroladdodik": "milorad dodik" } },
                "credentials": { "env": "FB_TOKEN" },
                "debug": { "log": true }
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.source, SourceKind::Facebook);
        assert_eq!(cfg.collector.batch_size, 5);
        assert_eq!(cfg.collector.normalize_workers, 3);
        assert_eq!(cfg.keyword.aliases.len(), 1);
        assert_eq!(cfg.token_env(), "FB_TOKEN");
        assert_eq!(cfg.full_name(), "fb_posts_data");
        assert!(cfg.debug_log());
    }

    #[test]
    fn page_delay_stays_under_window_budget() {
        let c = CollectorConfig::default();
        let delay = c.page_delay();
        assert!(delay >= Duration::from_secs(1));
        assert!(delay <= Duration::from_millis(1_101));
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut cfg = Config::default();
        cfg.collector.page_size = 5;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.collector.batch_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.collector.normalize_workers = 0;
        assert!(cfg.validate().is_err());
    }
}
