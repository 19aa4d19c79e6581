//! The extract stage: one batch call and its per-URL reconciliation.
//!
//! A batch never fails as a whole. Whatever the service does, every
//! requested URL ends up either in `results` or in `errors` of the
//! [`BatchOutcome`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::config::FetchPolicy;
use crate::errors::{ErrorKind, ResearchError};
use crate::models::{
    ExtractRequest, ExtractResponse, ExtractResult, UrlError, Usage, Warning, WarningSource,
};
use crate::rate_limit::RateLimiter;
use crate::retry::{with_retry, RetryAttempt, RetryConfig};
use crate::services::ExtractService;

use super::{guarded_call, Batch};

/// Per-run settings shared by every batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractParams {
    /// Objective used to focus excerpts.
    pub objective: Option<String>,
    /// Queries used to focus excerpts.
    pub queries: Vec<String>,
    /// Request excerpts.
    pub excerpts: bool,
    /// Request full content.
    pub full_content: bool,
    /// Fetch policy for each call.
    pub fetch_policy: FetchPolicy,
}

/// Tagged outcome of one batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Batch index.
    pub index: usize,
    /// Successful extractions, in request order.
    pub results: Vec<ExtractResult>,
    /// Failed URLs, in request order.
    pub errors: Vec<UrlError>,
    /// Service and reconciliation warnings.
    pub warnings: Vec<Warning>,
    /// Usage of the successful call.
    pub usage: Usage,
    /// Calls made, including retries.
    pub attempts: usize,
    /// Wall time in milliseconds.
    pub duration_ms: f64,
}

/// Result of matching a response against the requested URLs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    /// URLs with content, in request order.
    pub results: Vec<ExtractResult>,
    /// URLs without content, in request order.
    pub errors: Vec<UrlError>,
    /// Anomalies noticed while matching.
    pub warnings: Vec<Warning>,
}

/// Matches a service response against the requested URLs.
///
/// Unrequested URLs are dropped with a warning, requested URLs the service
/// never mentions become `MissingResult`, a result beats an error for the
/// same URL, the first of several results wins, and a result without any
/// content becomes `EmptyContent`.
pub fn reconcile(requested: &[String], response: ExtractResponse) -> Reconciled {
    let wanted: HashSet<&str> = requested.iter().map(String::as_str).collect();
    let mut warnings = response.warnings;

    let mut pages = HashMap::new();
    for page in response.results {
        if !wanted.contains(page.url.as_str()) {
            tracing::warn!(url = %page.url, "Extract returned an unrequested URL");
            warnings.push(
                Warning::new(WarningSource::Extract, "dropped result for a URL that was not requested")
                    .with_url(page.url),
            );
            continue;
        }
        if pages.contains_key(&page.url) {
            tracing::debug!(url = %page.url, "Duplicate extract result ignored");
            warnings.push(
                Warning::new(WarningSource::Extract, "duplicate result ignored, keeping the first")
                    .with_url(page.url),
            );
            continue;
        }
        pages.insert(page.url.clone(), page);
    }

    let mut failures = HashMap::new();
    for failure in response.errors {
        if !wanted.contains(failure.url.as_str()) {
            warnings.push(
                Warning::new(WarningSource::Extract, "dropped error for a URL that was not requested")
                    .with_url(failure.url),
            );
            continue;
        }
        failures.entry(failure.url.clone()).or_insert(failure);
    }

    let mut results = Vec::new();
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for url in requested {
        if !seen.insert(url.as_str()) {
            continue;
        }
        if let Some(page) = pages.remove(url) {
            if failures.remove(url).is_some() {
                tracing::debug!(url = %url, "Extract reported both result and error, keeping result");
            }
            let result = ExtractResult::ok(page);
            if result.has_content() {
                results.push(result);
            } else {
                errors.push(UrlError::new(
                    url.clone(),
                    ErrorKind::EmptyContent,
                    "service returned no excerpt and no content",
                ));
            }
        } else if let Some(failure) = failures.remove(url) {
            let detail = if failure.detail.is_empty() {
                failure.error_type
            } else {
                format!("{}: {}", failure.error_type, failure.detail)
            };
            errors.push(
                UrlError::new(url.clone(), ErrorKind::Unreadable, detail).with_status(failure.status),
            );
        } else {
            tracing::warn!(url = %url, "Extract response omitted a requested URL");
            errors.push(UrlError::new(
                url.clone(),
                ErrorKind::MissingResult,
                "service response did not mention this URL",
            ));
        }
    }

    Reconciled {
        results,
        errors,
        warnings,
    }
}

/// Marks every URL of a failed call with the call's error.
fn degrade(urls: &[String], error: &ResearchError) -> Vec<UrlError> {
    let kind = match error {
        ResearchError::Transport(_) => ErrorKind::TransportError,
        _ => ErrorKind::ServiceError,
    };
    urls.iter()
        .map(|url| UrlError::new(url.clone(), kind, error.to_string()).with_status(error.status()))
        .collect()
}

/// Runs extract calls against an [`ExtractService`].
#[derive(Clone)]
pub struct ExtractStage {
    service: Arc<dyn ExtractService>,
    retry: RetryConfig,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl std::fmt::Debug for ExtractStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractStage")
            .field("retry", &self.retry)
            .field("rate_limited", &self.rate_limiter.is_some())
            .finish_non_exhaustive()
    }
}

impl ExtractStage {
    /// Creates an extract stage retrying each batch once.
    #[must_use]
    pub fn new(service: Arc<dyn ExtractService>) -> Self {
        Self {
            service,
            retry: RetryConfig::default().with_max_attempts(2),
            rate_limiter: None,
        }
    }

    /// Sets the batch retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Shares a rate limiter with other callers of the service.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Extracts one batch. Never fails: call failures are recorded per URL.
    pub async fn run_batch<R>(&self, batch: &Batch, params: &ExtractParams, on_retry: R) -> BatchOutcome
    where
        R: FnMut(&RetryAttempt<'_>),
    {
        let started = Instant::now();
        let request = ExtractRequest {
            urls: batch.urls.clone(),
            objective: params.objective.clone(),
            queries: params.queries.clone(),
            excerpts: params.excerpts,
            full_content: params.full_content,
            fetch_policy: Some(params.fetch_policy.clone()),
        };
        let limit = params.fetch_policy.timeout();
        let key = format!("extract[{}]", batch.index);

        let mut attempts = 0;
        let response = with_retry(
            &self.retry,
            &key,
            || {
                attempts += 1;
                let request = request.clone();
                async move {
                    guarded_call(
                        self.rate_limiter.as_deref(),
                        limit,
                        "extract",
                        self.service.extract(request),
                    )
                    .await
                }
            },
            on_retry,
        )
        .await;

        let mut outcome = BatchOutcome {
            index: batch.index,
            attempts,
            ..Default::default()
        };
        match response {
            Ok(response) => {
                outcome.usage = response.usage.clone();
                let reconciled = reconcile(&batch.urls, response);
                outcome.results = reconciled.results;
                outcome.errors = reconciled.errors;
                outcome.warnings = reconciled.warnings;
            }
            Err(error) => {
                tracing::warn!(
                    batch = batch.index,
                    urls = batch.len(),
                    attempts,
                    error = %error,
                    "Extract batch failed, recording every URL as an error"
                );
                outcome.errors = degrade(&batch.urls, &error);
            }
        }
        outcome.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        outcome
    }
}
