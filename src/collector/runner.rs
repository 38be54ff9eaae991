use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    config::{CollectorConfig, Config},
    error::{CollectError, FetchError, NormalizeError, PersistError, Stage},
    metrics::RunMetrics,
    schema::Record,
    sources::adapter::{NormalizeContext, Page, RateLimitState, SourceAdapter},
    storage::RecordSink,
};

use super::normalize::normalize_page;
use super::rate_limit::{self, Gate, RateLimiter};
use super::retry::{self, Retried, RetryPolicy};
use super::{CancelSignal, CollectionOutcome, RunStatus, StopReason};

/// One collection run for one keyword.
///
/// Owns every piece of mutable run state:
/// - the accumulator and the pending batch buffer
/// - the set of ids seen in this run
/// - the batch counter
///
/// The rate-limit view and the cursor live on the stack of
/// [`Collector::run`]. Nothing is shared with other collectors
/// except the adapter's HTTP client.
///
/// LIFECYCLE:
/// - `new` → `run` (consumes the collector) → `CollectionOutcome`
///
pub struct Collector {
    adapter: Arc<dyn SourceAdapter>,
    sink: Arc<dyn RecordSink>,
    settings: CollectorConfig,
    full_name: String,
    batch_prefix: String,
    metrics: Arc<RunMetrics>,

    seen: HashSet<String>,
    records: Vec<Record>,
    pending: Vec<Record>,
    batch_num: usize,
}

impl Collector {
    pub fn new(adapter: Arc<dyn SourceAdapter>, sink: Arc<dyn RecordSink>, config: &Config) -> Self {
        Self {
            adapter,
            sink,
            settings: config.collector.clone(),
            full_name: config.full_name(),
            batch_prefix: config.batch_prefix(),
            metrics: Arc::new(RunMetrics::default()),
            seen: HashSet::new(),
            records: Vec::new(),
            pending: Vec::new(),
            batch_num: 0,
        }
    }

    /// Shared handle for the periodic reporter.
    pub fn metrics(&self) -> Arc<RunMetrics> {
        self.metrics.clone()
    }

    /// Runs the collection until the target count, exhaustion,
    /// a fatal error or cancellation.
    ///
    /// GUARANTEES:
    /// - Every termination path flushes the pending batch and
    ///   writes the full accumulator (best effort)
    /// - The returned records are everything accepted, even when
    ///   durable writes failed
    pub async fn run(
        mut self,
        keyword: &str,
        lookback: chrono::Duration,
        mut cancel: CancelSignal,
    ) -> CollectionOutcome {
        let since = Utc::now().checked_sub_signed(lookback).unwrap_or_else(|| {
            log::warn!("Lookback of {} days is out of range, starting from the earliest time", lookback.num_days());
            DateTime::<Utc>::MIN_UTC
        });
        log::info!(
            "Starting {} collection ({}) for '{}' since {} (target {} records)",
            self.adapter.name(),
            self.adapter.source_domain(),
            keyword,
            since.to_rfc3339(),
            self.settings.max_records
        );

        let status = match self.probe(keyword, &mut cancel).await {
            Ok(initial) => {
                let mut limiter = RateLimiter::new(initial, self.settings.default_remaining_calls);
                self.collect_pages(keyword, since, &mut limiter, &mut cancel).await
            }
            Err(status) => status,
        };

        self.finish(status).await
    }

    // ------------------------------------------------------------
    // Probe
    // ------------------------------------------------------------
    async fn probe(&self, keyword: &str, cancel: &mut CancelSignal) -> Result<RateLimitState, RunStatus> {
        let adapter = self.adapter.clone();
        let metrics = self.metrics.clone();

        let retried = retry::with_backoff(
            RetryPolicy::from_config(&self.settings),
            cancel,
            move |_, _| RunMetrics::incr(&metrics.transient_retries),
            move || {
                let adapter = adapter.clone();
                async move { adapter.probe_credentials().await }
            },
        )
        .await;

        match retried {
            Retried::Cancelled => Err(RunStatus::Interrupted),
            Retried::Done { result: Ok(state), .. } => {
                if state.is_exhausted_at(Utc::now()) {
                    return Err(self.quota_exhausted(keyword, state.reset_at));
                }
                log::info!(
                    "Credentials valid: {} calls remaining, reset at {}",
                    state.remaining_calls,
                    state.reset_at.to_rfc3339()
                );
                Ok(state)
            }
            Retried::Done {
                result: Err(FetchError::RateLimited { reset_at }),
                ..
            } => Err(self.quota_exhausted(keyword, reset_at)),
            Retried::Done {
                result: Err(e),
                attempts,
            } => {
                let err = fatal(e, Stage::Probe, keyword, 0, None, attempts);
                log::error!("Cannot start collection: {}", err);
                Err(RunStatus::Aborted(err))
            }
        }
    }

    fn quota_exhausted(&self, keyword: &str, reset_at: DateTime<Utc>) -> RunStatus {
        let err = CollectError::QuotaExhausted {
            keyword: keyword.to_string(),
            reset_at,
        };
        log::error!("Cannot start collection: {}", err);
        RunStatus::Aborted(err)
    }

    // ------------------------------------------------------------
    // Main loop
    // ------------------------------------------------------------
    async fn collect_pages(
        &mut self,
        keyword: &str,
        since: DateTime<Utc>,
        limiter: &mut RateLimiter,
        cancel: &mut CancelSignal,
    ) -> RunStatus {
        let mut cursor: Option<String> = None;
        let mut page_num = 0usize;

        while self.records.len() < self.settings.max_records {
            if cancel.is_cancelled() {
                return RunStatus::Interrupted;
            }

            // 1. Rate-limit gate
            if let Gate::Wait(wait) = limiter.check(Utc::now()) {
                log::info!(
                    "Rate limit reached. Waiting {:.2?} until {}",
                    wait,
                    limiter.state().reset_at.to_rfc3339()
                );
                RunMetrics::incr(&self.metrics.rate_limit_waits);
                if !cancel.sleep(wait).await {
                    return RunStatus::Interrupted;
                }
                limiter.restore(Utc::now());
            }

            log::info!(
                "Fetching page {} (cursor {:?}), collected {}/{}",
                page_num,
                cursor,
                self.records.len(),
                self.settings.max_records
            );

            // 2 + 3. Fetch, retrying the same cursor on rate limits
            let page = match self
                .fetch_same_page(keyword, since, cursor.as_deref(), page_num, limiter, cancel)
                .await
            {
                Ok(page) => page,
                Err(status) => return status,
            };
            limiter.observe(page.rate_limit);
            RunMetrics::incr(&self.metrics.pages_fetched);

            if page.items.is_empty() {
                log::info!("No more items found for '{}'", keyword);
                return RunStatus::Completed(StopReason::EmptyPage);
            }
            log::info!("Received {} items in page {}", page.items.len(), page_num);

            // 4. Normalize on the page-scoped pool
            let ctx = Arc::new(NormalizeContext {
                keyword: keyword.to_string(),
                collected_at: Utc::now(),
            });
            let results = normalize_page(
                self.adapter.clone(),
                page.items,
                ctx,
                self.settings.normalize_workers,
                self.settings.normalize_timeout(),
            )
            .await;

            // 5 + 6. Dedupe, accumulate, flush full batches
            self.accept(results, page_num).await;
            if self.records.len() >= self.settings.max_records {
                log::info!("Reached target of {} records", self.settings.max_records);
                return RunStatus::Completed(StopReason::TargetReached);
            }

            // 7. Pagination
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => {
                    log::info!("No more pages available for '{}'", keyword);
                    return RunStatus::Completed(StopReason::Exhausted);
                }
            }
            page_num += 1;

            // 8. Inter-page pacing
            if !cancel.sleep(self.settings.page_delay()).await {
                return RunStatus::Interrupted;
            }
        }

        RunStatus::Completed(StopReason::TargetReached)
    }

    /// Fetches one page, never advancing past it on a rate limit.
    async fn fetch_same_page(
        &self,
        keyword: &str,
        since: DateTime<Utc>,
        cursor: Option<&str>,
        page_num: usize,
        limiter: &mut RateLimiter,
        cancel: &mut CancelSignal,
    ) -> Result<Page, RunStatus> {
        let policy = RetryPolicy::from_config(&self.settings);
        let page_size = self.settings.page_size;
        let mut waits = 0u32;

        loop {
            let adapter = self.adapter.clone();
            let metrics = self.metrics.clone();

            let retried = retry::with_backoff(
                policy,
                cancel,
                move |_, _| RunMetrics::incr(&metrics.transient_retries),
                move || {
                    let adapter = adapter.clone();
                    async move { adapter.fetch_page(keyword, since, cursor, page_size).await }
                },
            )
            .await;

            match retried {
                Retried::Cancelled => return Err(RunStatus::Interrupted),
                Retried::Done { result: Ok(page), .. } => return Ok(page),
                Retried::Done {
                    result: Err(FetchError::RateLimited { reset_at }),
                    ..
                } => {
                    limiter.exhausted_until(reset_at);
                    waits += 1;
                    if waits > self.settings.max_rate_limit_waits {
                        let err = CollectError::RateLimited {
                            keyword: keyword.to_string(),
                            page: page_num,
                            cursor: cursor.map(str::to_string),
                            waits: waits - 1,
                        };
                        log::error!("{}", err);
                        return Err(RunStatus::Aborted(err));
                    }

                    let wait = rate_limit::rate_limited_wait(reset_at, Utc::now());
                    log::warn!(
                        "Rate limit hit on page {} (cursor {:?}). Waiting {:.2?} before retrying the same page",
                        page_num,
                        cursor,
                        wait
                    );
                    RunMetrics::incr(&self.metrics.rate_limit_waits);
                    if !cancel.sleep(wait).await {
                        return Err(RunStatus::Interrupted);
                    }
                    limiter.restore(Utc::now());
                }
                Retried::Done {
                    result: Err(e),
                    attempts,
                } => {
                    let err = fatal(e, Stage::Fetch, keyword, page_num, cursor, attempts);
                    log::error!("Stopping collection: {}", err);
                    return Err(RunStatus::Aborted(err));
                }
            }
        }
    }

    /// Dedupes normalized results in page order and appends the
    /// survivors, flushing the pending buffer at `batch_size`.
    async fn accept(&mut self, results: Vec<Result<Record, NormalizeError>>, page_num: usize) {
        for result in results {
            if self.records.len() >= self.settings.max_records {
                break;
            }

            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    log::error!("Error processing item on page {}: {}", page_num, e);
                    RunMetrics::incr(&self.metrics.normalize_errors);
                    continue;
                }
            };

            if !self.seen.insert(record.id.clone()) {
                log::debug!("Dropping duplicate item {}", record.id);
                RunMetrics::incr(&self.metrics.duplicates_dropped);
                continue;
            }

            if record.timestamp_fallback {
                RunMetrics::incr(&self.metrics.fallback_timestamps);
            }

            self.pending.push(record.clone());
            self.records.push(record);
            RunMetrics::incr(&self.metrics.records_accepted);

            if self.pending.len() >= self.settings.batch_size {
                self.flush_pending().await;
            }
        }
    }

    // ------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------
    async fn flush_pending(&mut self) {
        let batch = std::mem::take(&mut self.pending);
        let label = format!("{}_{}", self.batch_prefix, self.batch_num);
        self.batch_num += 1;

        let sink = self.sink.clone();
        let saved = self
            .write_with_retry(&label, || sink.write_batch(&batch, &label))
            .await;

        if saved {
            log::info!("Saved batch {} with {} records", label, batch.len());
            RunMetrics::incr(&self.metrics.batches_written);
        } else {
            log::error!(
                "Dropped batch {} from durable storage ({} records kept in memory)",
                label,
                batch.len()
            );
            RunMetrics::incr(&self.metrics.batch_failures);
        }
    }

    /// Fixed-delay retry around one write. Returns whether it landed.
    async fn write_with_retry<F, Fut>(&self, label: &str, mut write: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), PersistError>>,
    {
        let attempts = self.settings.flush_attempts.max(1);
        for attempt in 1..=attempts {
            match write().await {
                Ok(()) => return true,
                Err(e) => {
                    log::error!("Error saving {} (attempt {}/{}): {}", label, attempt, attempts, e);
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.flush_delay()).await;
                    }
                }
            }
        }
        log::error!("Failed to save {} after {} attempts", label, attempts);
        false
    }

    /// Final flush on every termination path.
    async fn finish(mut self, status: RunStatus) -> CollectionOutcome {
        if !self.pending.is_empty() {
            self.flush_pending().await;
        }

        if self.records.is_empty() {
            log::warn!("No records were collected");
        } else {
            let sink = self.sink.clone();
            let records = &self.records;
            let label = self.full_name.clone();
            if self
                .write_with_retry(&label, || sink.write_full(records, &label))
                .await
            {
                log::info!("Saved complete dataset: {} records to {}", records.len(), label);
            }
        }

        match &status {
            RunStatus::Completed(reason) => log::info!("Collection completed ({:?})", reason),
            RunStatus::Aborted(e) => log::error!("Collection aborted: {}", e),
            RunStatus::Interrupted => log::warn!("Collection interrupted, partial data saved"),
        }

        CollectionOutcome {
            records: self.records,
            status,
            metrics: self.metrics.snapshot(),
        }
    }
}

/// Wraps a non-retryable (or retry-exhausted) fetch error with run context.
fn fatal(
    e: FetchError,
    stage: Stage,
    keyword: &str,
    page: usize,
    cursor: Option<&str>,
    attempts: u32,
) -> CollectError {
    let keyword = keyword.to_string();
    let cursor = cursor.map(str::to_string);
    match e {
        FetchError::Unauthorized(message) => CollectError::Credential {
            stage,
            keyword,
            message,
        },
        FetchError::Transient(message) => CollectError::Network {
            stage,
            keyword,
            page,
            cursor,
            attempts,
            message,
        },
        FetchError::Malformed(message) => CollectError::Malformed {
            stage,
            keyword,
            page,
            cursor,
            message,
        },
        FetchError::RateLimited { .. } => CollectError::RateLimited {
            keyword,
            page,
            cursor,
            waits: 0,
        },
    }
}
