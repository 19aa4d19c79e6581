//! Pipeline stages.
//!
//! Each stage wraps one concern: the search call, planning extract batches,
//! and the extract call with its per-URL reconciliation.

mod batch;
mod extract;
mod search;

pub use batch::{plan_batches, Batch, BatchPlan};
pub use extract::{reconcile, BatchOutcome, ExtractParams, ExtractStage, Reconciled};
pub use search::{SearchInput, SearchOutput, SearchStage};

use std::time::Duration;
use tokio::time::timeout;

use crate::errors::{ResearchError, Result};
use crate::rate_limit::RateLimiter;

/// Runs one service call under the rate limiter and a timeout.
///
/// Timer expiry surfaces as a `Transport` error.
pub(crate) async fn guarded_call<T, F>(
    limiter: Option<&RateLimiter>,
    limit: Duration,
    label: &str,
    call: F,
) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    if let Some(limiter) = limiter {
        limiter.acquire().await;
    }
    match timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ResearchError::transport(format!(
            "{label} timed out after {:.3}s",
            limit.as_secs_f64()
        ))),
    }
}
