// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:    Configuration structs loaded from JSON
// - error:     Typed failure kinds for fetch, normalize, persist
// - schema:    Normalized record definition and derived fields
// - util:      Keyword preprocessing, timestamps, text helpers
// - sources:   Platform adapters and adapter registry
// - collector: Collection loop (rate limits, retries, batching)
// - storage:   Durable JSON output
// - metrics:   Per-run counters
// - summary:   End-of-run report
//
mod collector;
mod config;
mod error;
mod metrics;
mod schema;
mod sources;
mod storage;
mod summary;
mod util;

// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use clap::Parser;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use collector::runner::Collector;
use collector::{CancelSignal, RunStatus};
use config::{Config, SourceKind};
use metrics::RunMetrics;
use sources::get_adapter;
use storage::JsonFileSink;
use summary::Summary;
use util::KeywordPipeline;

// ------------------------------------------------------------
// Command line
// ------------------------------------------------------------
//
// Every flag is optional. Flags override the config file,
// which overrides built-in defaults.
//

/// Ten years. Platforms cap their own windows far below this.
const MAX_LOOKBACK_DAYS: i64 = 3650;

#[derive(Debug, Parser)]
#[command(name = "keyword-post-collector", version, about = "Collects recent social posts matching a keyword")]
struct Cli {
    /// Search keyword (read from stdin when omitted)
    #[arg(short, long)]
    keyword: Option<String>,

    /// Lookback window in days
    #[arg(short, long, default_value_t = 7, value_parser = clap::value_parser!(u32).range(1..=MAX_LOOKBACK_DAYS))]
    days: u32,

    /// Platform to collect from
    #[arg(short, long, value_enum)]
    source: Option<SourceKind>,

    /// Path of the JSON config file (optional)
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Stop after this many unique records
    #[arg(long)]
    max_records: Option<usize>,

    /// Directory for batch and full-dataset files
    #[arg(long)]
    output_dir: Option<String>,

    /// Environment variable holding the platform credential
    #[arg(long)]
    token_env: Option<String>,
}

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Load `.env`, logging and configuration
// - Resolve keyword and credential
// - Run one collection with Ctrl-C cancellation
// - Print the run summary
//
// Exit code is non-zero only for startup failures and
// interrupted runs. Aborted or empty runs still exit 0,
// the partial dataset is on disk and the log says why.
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `.env` first so RUST_LOG and tokens defined there apply
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // --------------------------------------------------------
    // Configuration: file (optional) + CLI overrides
    // --------------------------------------------------------
    let mut config = load_config(&cli.config)?;
    apply_overrides(&mut config, &cli);
    config.validate()?;

    // --------------------------------------------------------
    // Keyword
    // --------------------------------------------------------
    let raw_keyword = match cli.keyword.clone() {
        Some(k) => k,
        None => prompt_keyword()?,
    };
    let keyword = KeywordPipeline::standard(&config.keyword.aliases).apply(&raw_keyword);
    if keyword.is_empty() {
        println!("No keyword provided. Exiting.");
        return Ok(());
    }

    // --------------------------------------------------------
    // Credential
    //
    // NOTE:
    // - Read from the environment only, never from config.json
    // --------------------------------------------------------
    let token_env = config.token_env();
    let token = match std::env::var(&token_env) {
        Ok(t) if !t.trim().is_empty() => t,
        _ => {
            log::error!("{} environment variable not set", token_env);
            eprintln!("Error: {} environment variable not set.", token_env);
            eprintln!("Please ensure your .env file contains a valid credential.");
            return Ok(());
        }
    };

    // --------------------------------------------------------
    // Wire adapter, sink and collector
    // --------------------------------------------------------
    let adapter = get_adapter(&config, token)?;
    let sink = Arc::new(JsonFileSink::new(&config.output.dir));
    let output_path = sink.path_for(&config.full_name());

    let collector = Collector::new(adapter, sink, &config);

    println!("\nStarting {} collector...", config.source.name());
    println!("Keyword: '{}'", keyword);
    println!("Time range: Last {} days", cli.days);
    println!("Target: {} posts", config.collector.max_records);
    println!("Output: {}", output_path.display());

    // --------------------------------------------------------
    // Start metrics reporter (periodic, low-noise)
    // --------------------------------------------------------
    let reporter = spawn_reporter(collector.metrics(), config.metrics.interval_secs);

    // --------------------------------------------------------
    // Ctrl-C → cancel; the collector persists what it has
    // --------------------------------------------------------
    let (cancel_handle, cancel) = CancelSignal::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, stopping collection");
            cancel_handle.cancel();
        }
    });

    let started = Instant::now();
    let outcome = collector
        .run(&keyword, chrono::Duration::days(i64::from(cli.days)), cancel)
        .await;
    if let Some(reporter) = reporter {
        reporter.abort();
    }

    println!("\nCollection finished in {:.2} seconds", started.elapsed().as_secs_f64());
    log::info!("{}", outcome.metrics);
    if !outcome.is_success() {
        log::warn!("Run ended early ({:?}), partial results kept", outcome.status);
    }
    Summary::from_records(&outcome.records).print(config.source.name(), &output_path);

    if outcome.status == RunStatus::Interrupted {
        bail!("collection interrupted after {} records", outcome.records.len());
    }
    Ok(())
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Reads a JSON configuration file from disk and deserializes
// it into the strongly typed `Config` structure. A missing
// file means "all defaults".
//
fn load_config(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        log::info!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let cfg = serde_json::from_str(&data)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(cfg)
}

// ------------------------------------------------------------
// Metrics reporter
// ------------------------------------------------------------
//
// One `[METRICS]` line every `interval_secs`. 0 means no reporter.
//
fn spawn_reporter(metrics: Arc<RunMetrics>, interval_secs: u64) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        log::debug!("Metrics reporter disabled");
        return None;
    }

    let interval = Duration::from_secs(interval_secs);
    Some(tokio::spawn(async move {
        loop {
            sleep(interval).await;
            log::info!("{}", metrics.snapshot());
        }
    }))
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(source) = cli.source {
        config.source = source;
    }
    if let Some(max) = cli.max_records {
        config.collector.max_records = max;
    }
    if let Some(dir) = &cli.output_dir {
        config.output.dir = dir.clone();
    }
    if let Some(env) = &cli.token_env {
        config.credentials.env = Some(env.clone());
    }
}

fn prompt_keyword() -> anyhow::Result<String> {
    print!("Enter keyword to search: ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_config_values() {
        let cli = Cli::parse_from([
            "keyword-post-collector",
            "--keyword",
            "rust",
            "--source",
            "facebook",
            "--max-records",
            "50",
            "--output-dir",
            "out",
            "--token-env",
            "MY_TOKEN",
        ]);
        let mut config = Config::default();
        apply_overrides(&mut config, &cli);

        assert_eq!(cli.days, 7);
        assert_eq!(config.source, SourceKind::Facebook);
        assert_eq!(config.collector.max_records, 50);
        assert_eq!(config.output.dir, "out");
        assert_eq!(config.token_env(), "MY_TOKEN");
    }

    #[test]
    fn lookback_outside_bounds_is_rejected() {
        assert!(Cli::try_parse_from(["keyword-post-collector", "--days", "0"]).is_err());
        assert!(Cli::try_parse_from(["keyword-post-collector", "--days", "100000000"]).is_err());
        assert_eq!(Cli::try_parse_from(["keyword-post-collector", "--days", "3650"]).unwrap().days, 3650);
    }

    #[tokio::test]
    async fn zero_interval_disables_the_reporter() {
        let metrics = Arc::new(RunMetrics::default());

        assert!(spawn_reporter(metrics.clone(), 0).is_none());

        let reporter = spawn_reporter(metrics, 10).expect("reporter spawned");
        reporter.abort();
    }

    #[test]
    fn missing_config_file_means_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = load_config(&tmp.path().join("absent.json")).unwrap();
        assert_eq!(config.collector.max_records, 1000);
    }

    #[test]
    fn invalid_config_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_config(&path).is_err());
    }
}
