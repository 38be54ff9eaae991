/// Collector module
///
/// This module groups all logic responsible for:
/// - Driving one keyword's fetch → normalize → dedupe → persist loop
/// - Honoring platform quota and retry budgets
/// - Stopping cleanly on exhaustion, fatal errors or Ctrl-C
///
/// The collector sits between:
/// - Source adapters (Twitter, Facebook)
/// - The record sink (JSON files on disk)
///
/// Design notes:
/// - Platform-specific logic MUST NOT live here
/// - All run state belongs to one `Collector` value, nothing global
pub mod normalize;
pub mod rate_limit;
pub mod retry;
pub mod runner;

use std::time::Duration;

use tokio::sync::watch;

use crate::error::CollectError;
use crate::metrics::MetricsSnapshot;
use crate::schema::Record;

// ------------------------------------------------------------
// Cancellation
// ------------------------------------------------------------
//
// Every suspension point of the loop (fetch, backoff sleep,
// rate-limit wait, pacing delay) races this signal. Writes
// are never raced: a started flush always completes.
//

/// Receiving side, owned by the running collector.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Sending side, owned by whoever decides to stop the run.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelSignal {
    pub fn new() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelSignal { rx })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested.
    /// Never resolves if the handle is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        let closed = self.rx.wait_for(|c| *c).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }

    /// Sleeps for `duration`. Returns false when cancelled first.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

// ------------------------------------------------------------
// Run outcome
// ------------------------------------------------------------

/// Why a run that did not fail stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Accumulator reached `max_records`
    TargetReached,
    /// Platform returned no next cursor
    Exhausted,
    /// Platform returned a page with zero items
    EmptyPage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Completed(StopReason),
    Aborted(CollectError),
    Interrupted,
}

/// Everything a run hands back to its caller.
///
/// `records` is the in-memory accumulator in acceptance order.
/// It is complete even when durable writes failed.
#[derive(Debug)]
pub struct CollectionOutcome {
    pub records: Vec<Record>,
    pub status: RunStatus,
    pub metrics: MetricsSnapshot,
}

impl CollectionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Completed(_))
    }
}
