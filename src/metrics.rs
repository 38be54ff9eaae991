use std::sync::atomic::{AtomicUsize, Ordering};

/// Runtime counters for one collector run.
///
/// Purpose:
/// - Diagnostics for skipped work (duplicates, bad items, lost batches)
/// - Periodic progress reporting while the loop runs
///
/// Design:
/// - Lock-free (Atomics), owned by one collector via `Arc`
/// - The reporter task only reads
#[derive(Default, Debug)]
pub struct RunMetrics {
    pub pages_fetched: AtomicUsize,
    pub records_accepted: AtomicUsize,
    pub duplicates_dropped: AtomicUsize,
    pub normalize_errors: AtomicUsize,
    pub fallback_timestamps: AtomicUsize,

    pub batches_written: AtomicUsize,
    pub batch_failures: AtomicUsize,

    pub transient_retries: AtomicUsize,
    pub rate_limit_waits: AtomicUsize,
}

/// Plain copy of the counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub pages_fetched: usize,
    pub records_accepted: usize,
    pub duplicates_dropped: usize,
    pub normalize_errors: usize,
    pub fallback_timestamps: usize,
    pub batches_written: usize,
    pub batch_failures: usize,
    pub transient_retries: usize,
    pub rate_limit_waits: usize,
}

impl RunMetrics {
    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            records_accepted: self.records_accepted.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            normalize_errors: self.normalize_errors.load(Ordering::Relaxed),
            fallback_timestamps: self.fallback_timestamps.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            batch_failures: self.batch_failures.load(Ordering::Relaxed),
            transient_retries: self.transient_retries.load(Ordering::Relaxed),
            rate_limit_waits: self.rate_limit_waits.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[METRICS] pages={} accepted={} dup={} norm_err={} ts_fallback={} batches={} batch_err={} retries={} rl_waits={}",
            self.pages_fetched,
            self.records_accepted,
            self.duplicates_dropped,
            self.normalize_errors,
            self.fallback_timestamps,
            self.batches_written,
            self.batch_failures,
            self.transient_retries,
            self.rate_limit_waits,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let metrics = RunMetrics::default();
        RunMetrics::incr(&metrics.pages_fetched);
        for _ in 0..5 {
            RunMetrics::incr(&metrics.records_accepted);
        }
        RunMetrics::incr(&metrics.duplicates_dropped);

        let snap = metrics.snapshot();
        assert_eq!(snap.pages_fetched, 1);
        assert_eq!(snap.records_accepted, 5);
        assert_eq!(snap.duplicates_dropped, 1);
        assert_eq!(snap.batch_failures, 0);
        assert!(snap.to_string().starts_with("[METRICS] pages=1 accepted=5 dup=1"));
    }
}
