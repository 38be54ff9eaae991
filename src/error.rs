use chrono::{DateTime, Utc};
use thiserror::Error;

// ------------------------------------------------------------
// Fetch errors
// ------------------------------------------------------------
//
// Returned by every source adapter for probe and page requests.
//
// The collector branches on the variant, never on the message:
// - Unauthorized: fatal, never retried
// - RateLimited:  wait until `reset_at`, retry the same page
// - Transient:    bounded exponential backoff, then fatal
// - Malformed:    fatal, never retried
//
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited until {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },

    #[error("transient network error: {0}")]
    Transient(String),

    #[error("malformed request or response: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Item-local failure. The item is skipped, the page continues.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("normalization timed out after {0} ms")]
    Timeout(u64),

    #[error("normalization task panicked: {0}")]
    Panicked(String),
}

/// Batch-local failure. Retried, then degraded to memory-only.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error for {label}: {source}")]
    Serialize {
        label: String,
        #[source]
        source: serde_json::Error,
    },
}

// ------------------------------------------------------------
// Run-level errors
// ------------------------------------------------------------
//
// Every variant carries enough context (stage, keyword, page,
// cursor) to resume a run by hand.
//
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollectError {
    #[error("credentials rejected during {stage} for '{keyword}': {message}")]
    Credential {
        stage: Stage,
        keyword: String,
        message: String,
    },

    #[error("quota exhausted for '{keyword}' until {reset_at}")]
    QuotaExhausted {
        keyword: String,
        reset_at: DateTime<Utc>,
    },

    #[error(
        "still rate limited after {waits} waits for '{keyword}' (page {page}, cursor {cursor:?})"
    )]
    RateLimited {
        keyword: String,
        page: usize,
        cursor: Option<String>,
        waits: u32,
    },

    #[error(
        "network failure during {stage} after {attempts} attempts for '{keyword}' (page {page}, cursor {cursor:?}): {message}"
    )]
    Network {
        stage: Stage,
        keyword: String,
        page: usize,
        cursor: Option<String>,
        attempts: u32,
        message: String,
    },

    #[error(
        "malformed response during {stage} for '{keyword}' (page {page}, cursor {cursor:?}): {message}"
    )]
    Malformed {
        stage: Stage,
        keyword: String,
        page: usize,
        cursor: Option<String>,
        message: String,
    },
}

/// Loop stage an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Probe,
    Fetch,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Probe => f.write_str("probe"),
            Stage::Fetch => f.write_str("fetch"),
        }
    }
}
