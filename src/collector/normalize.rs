use std::sync::Arc;
use std::time::Duration;

use futures_util::{StreamExt, stream};

use crate::error::NormalizeError;
use crate::schema::Record;
use crate::sources::adapter::{NormalizeContext, RawItem, SourceAdapter};

/// Normalizes one page on a bounded pool of blocking workers.
///
/// GUARANTEES:
/// - At most `workers` items are in flight at once
/// - Output order equals input order, whatever the scheduling
/// - A task exceeding `timeout` yields `NormalizeError::Timeout`
/// - A panicking task yields `NormalizeError::Panicked`
///
/// The pool lives exactly as long as this call.
pub async fn normalize_page(
    adapter: Arc<dyn SourceAdapter>,
    items: Vec<RawItem>,
    ctx: Arc<NormalizeContext>,
    workers: usize,
    timeout: Duration,
) -> Vec<Result<Record, NormalizeError>> {
    stream::iter(items)
        .map(|item| {
            let adapter = adapter.clone();
            let ctx = ctx.clone();
            async move {
                let task = tokio::task::spawn_blocking(move || adapter.normalize(&item, &ctx));
                match tokio::time::timeout(timeout, task).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(join)) => Err(NormalizeError::Panicked(join.to_string())),
                    Err(_) => Err(NormalizeError::Timeout(timeout.as_millis() as u64)),
                }
            }
        })
        // `buffered`, not `buffer_unordered`: keeps page order
        .buffered(workers.max(1))
        .collect()
        .await
}
