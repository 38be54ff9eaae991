/// Utility helpers shared by all sources and the collector.
///
/// This module contains:
/// - Keyword preprocessing (pluggable chain)
/// - Timestamp parsing with an observable fallback
/// - Small text extractors (hashtags, keyphrase, ids)
///
/// IMPORTANT:
/// - No platform-specific business logic should live here.
/// - Everything here is pure and deterministic, given its inputs.
///
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

// ------------------------------------------------------------
// Keyword preprocessing
// ------------------------------------------------------------
//
// Cosmetic data-entry cleanup applied to the keyword before the
// run starts. Steps are composable; nothing is hardcoded.
//
pub trait KeywordPreprocessor: Send + Sync {
    fn apply(&self, keyword: &str) -> String;
}

/// Strips surrounding whitespace and collapses inner runs of it.
pub struct Trim;

impl KeywordPreprocessor for Trim {
    fn apply(&self, keyword: &str) -> String {
        keyword.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Case-insensitive replacement table, e.g. for known misspellings.
pub struct Aliases {
    table: HashMap<String, String>,
}

impl Aliases {
    pub fn new(table: &HashMap<String, String>) -> Self {
        Self {
            table: table
                .iter()
                .map(|(from, to)| (from.to_lowercase(), to.clone()))
                .collect(),
        }
    }
}

impl KeywordPreprocessor for Aliases {
    fn apply(&self, keyword: &str) -> String {
        match self.table.get(&keyword.to_lowercase()) {
            Some(replacement) => {
                log::info!("Corrected keyword '{}' to '{}'", keyword, replacement);
                replacement.clone()
            }
            None => keyword.to_string(),
        }
    }
}

/// Ordered chain of preprocessing steps.
#[derive(Default)]
pub struct KeywordPipeline {
    steps: Vec<Box<dyn KeywordPreprocessor>>,
}

impl KeywordPipeline {
    pub fn with_step(mut self, step: impl KeywordPreprocessor + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Trim first, then apply the configured alias table.
    pub fn standard(aliases: &HashMap<String, String>) -> Self {
        Self::default().with_step(Trim).with_step(Aliases::new(aliases))
    }

    pub fn apply(&self, keyword: &str) -> String {
        self.steps
            .iter()
            .fold(keyword.to_string(), |acc, step| step.apply(&acc))
    }
}

// ------------------------------------------------------------
// Timestamps
// ------------------------------------------------------------

/// Parses a platform timestamp.
///
/// Accepts RFC 3339 (`2024-01-01T12:00:00.000Z`, Twitter) and the
/// Graph API form without a colon in the offset
/// (`2024-01-01T12:00:00+0000`, Facebook).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Returns the parsed timestamp, or `now` plus a fallback flag.
///
/// The flag ends up in `Record::timestamp_fallback` so substituted
/// times stay distinguishable downstream.
pub fn timestamp_or_now(raw: Option<&str>, now: DateTime<Utc>, id: &str) -> (DateTime<Utc>, bool) {
    match raw.and_then(parse_timestamp) {
        Some(ts) => (ts, false),
        None => {
            log::warn!(
                "Unparsable timestamp {:?} for item {}, using processing time",
                raw,
                id
            );
            (now, true)
        }
    }
}

// ------------------------------------------------------------
// Text extractors
// ------------------------------------------------------------

static URL_OR_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"http\S+|www\S+|@\w+").expect("valid regex"));

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s#]").expect("valid regex"));

static HASHTAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"#(\w+)").expect("valid regex"));

/// First `max_words` words after stripping links, mentions and punctuation.
pub fn keyphrase(text: &str, max_words: usize) -> String {
    let cleaned = URL_OR_MENTION.replace_all(text, "");
    let cleaned = NON_WORD.replace_all(&cleaned, "");
    cleaned
        .split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hashtags found in free text, without the `#`.
pub fn hashtags_in(text: &str) -> Vec<String> {
    HASHTAG
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Stable cross-run identifier for an (id, keyword) pair.
pub fn unique_id(id: &str, keyword: &str) -> String {
    format!("{:x}", md5::compute(format!("{}_{}", id, keyword)))
}
