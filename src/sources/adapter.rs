use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{FetchError, NormalizeError};
use crate::schema::Record;

/// Rate-limit snapshot observed from the platform.
///
/// IMPORTANT:
/// - Only ever replaced from a probe or fetch response.
/// - Read by the collector before every fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    pub remaining_calls: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitState {
    pub fn is_exhausted_at(&self, now: DateTime<Utc>) -> bool {
        self.remaining_calls == 0 && now < self.reset_at
    }
}

/// One raw platform item plus the page-level context it refers to.
///
/// Twitter returns users and media once per page under
/// `includes`; every item of the page shares that value.
#[derive(Debug, Clone)]
pub struct RawItem {
    pub data: Value,
    pub includes: Arc<Value>,
}

impl RawItem {
    pub fn new(data: Value, includes: Arc<Value>) -> Self {
        Self { data, includes }
    }

    pub fn standalone(data: Value) -> Self {
        Self {
            data,
            includes: Arc::new(Value::Null),
        }
    }
}

/// One fetch response.
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<RawItem>,

    /// `None` means the result set is exhausted
    pub next_cursor: Option<String>,

    pub rate_limit: RateLimitState,
}

/// Run-level values every normalized record carries.
#[derive(Debug, Clone)]
pub struct NormalizeContext {
    pub keyword: String,
    pub collected_at: DateTime<Utc>,
}

/// SourceAdapter is the abstraction layer between:
/// - The generic collector loop
/// - Platform-specific HTTP APIs
///
/// Each platform implementation must:
/// - Validate credentials and report quota (probe)
/// - Fetch one page for a query and cursor
/// - Normalize raw items into `Record`
///
/// DESIGN GOALS:
/// - Zero platform-specific logic outside adapters
/// - Failures reported as tagged `FetchError` kinds
/// - Uniform output format across all platforms
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - `normalize` runs on blocking worker threads
///
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Canonical platform name, e.g. "twitter"
    fn name(&self) -> &'static str;

    /// Provenance domain, e.g. "twitter.com"
    fn source_domain(&self) -> &'static str;

    /// Cheap request that validates credentials and reads quota.
    async fn probe_credentials(&self) -> Result<RateLimitState, FetchError>;

    /// Fetches one page.
    ///
    /// MUST NOT:
    /// - Retry internally (the collector owns retry policy)
    /// - Sleep on rate limits (report `RateLimited` instead)
    async fn fetch_page(
        &self,
        query: &str,
        since: DateTime<Utc>,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<Page, FetchError>;

    /// Converts a raw item into a `Record`.
    ///
    /// IMPORTANT:
    /// - Pure: no I/O, no shared state
    /// - Must never panic on unexpected input
    fn normalize(&self, item: &RawItem, ctx: &NormalizeContext) -> Result<Record, NormalizeError>;
}
