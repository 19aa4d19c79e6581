//! The search stage: one ranked search call with retry and budgeting.

use std::sync::Arc;

use crate::budget::{apply_to_excerpts, Budget};
use crate::config::FetchPolicy;
use crate::domain::SourcePolicy;
use crate::errors::{ResearchError, Result};
use crate::models::{SearchRequest, SearchResult, Usage, Warning, WarningSource};
use crate::rate_limit::RateLimiter;
use crate::retry::{with_retry, RetryAttempt, RetryConfig};
use crate::services::SearchService;

use super::guarded_call;

/// Input of one search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchInput {
    /// Research objective.
    pub objective: String,
    /// Keyword queries.
    pub queries: Vec<String>,
    /// Results wanted.
    pub max_results: usize,
    /// Already-normalized source policy.
    pub source_policy: Option<SourcePolicy>,
    /// Overrides the fetch policy's cache max age.
    pub max_age_seconds: Option<u64>,
}

/// Ranked results and metadata from a search.
#[derive(Debug, Clone, Default)]
pub struct SearchOutput {
    /// Results in ranker order, `rank` starting at 1.
    pub results: Vec<SearchResult>,
    /// Service and stage warnings.
    pub warnings: Vec<Warning>,
    /// Usage reported by the successful call.
    pub usage: Usage,
    /// Calls made, including retries.
    pub attempts: usize,
}

/// Runs search calls against a [`SearchService`].
#[derive(Clone)]
pub struct SearchStage {
    service: Arc<dyn SearchService>,
    budget: Budget,
    fetch: FetchPolicy,
    retry: RetryConfig,
    max_results_ceiling: usize,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl std::fmt::Debug for SearchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchStage")
            .field("budget", &self.budget)
            .field("fetch", &self.fetch)
            .field("retry", &self.retry)
            .field("max_results_ceiling", &self.max_results_ceiling)
            .finish_non_exhaustive()
    }
}

impl SearchStage {
    /// Creates a search stage with default budget, fetch and retry settings.
    #[must_use]
    pub fn new(service: Arc<dyn SearchService>) -> Self {
        Self {
            service,
            budget: Budget::search_default(),
            fetch: FetchPolicy::default(),
            retry: RetryConfig::default(),
            max_results_ceiling: 20,
            rate_limiter: None,
        }
    }

    /// Sets the excerpt budget.
    #[must_use]
    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    /// Sets the fetch policy.
    #[must_use]
    pub fn with_fetch_policy(mut self, fetch: FetchPolicy) -> Self {
        self.fetch = fetch;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the largest allowed `max_results`.
    #[must_use]
    pub fn with_max_results_ceiling(mut self, ceiling: usize) -> Self {
        self.max_results_ceiling = ceiling;
        self
    }

    /// Shares a rate limiter with other callers of the service.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Checks the input contract without any I/O.
    pub fn validate(&self, input: &SearchInput) -> Result<()> {
        if input.objective.trim().is_empty() {
            return Err(ResearchError::invalid_request("objective must not be empty"));
        }
        if input.queries.is_empty() || input.queries.iter().any(|q| q.trim().is_empty()) {
            return Err(ResearchError::invalid_request(
                "queries must contain at least one non-empty query",
            ));
        }
        if input.max_results == 0 || input.max_results > self.max_results_ceiling {
            return Err(ResearchError::invalid_request(format!(
                "max_results must be between 1 and {}, got {}",
                self.max_results_ceiling, input.max_results
            )));
        }
        Ok(())
    }

    /// Runs the search, retrying transient failures.
    ///
    /// Results keep the service's order. Excess and URL-less results are
    /// dropped with a warning, and excerpts are cut to the search budget.
    pub async fn run<R>(&self, input: SearchInput, on_retry: R) -> Result<SearchOutput>
    where
        R: FnMut(&RetryAttempt<'_>),
    {
        self.validate(&input)?;

        let mut fetch = self.fetch.clone();
        if let Some(max_age) = input.max_age_seconds {
            fetch.max_age_seconds = Some(max_age);
        }
        let limit = fetch.timeout();
        let max_results = input.max_results;
        let request = SearchRequest {
            objective: input.objective,
            queries: input.queries,
            max_results,
            source_policy: input.source_policy,
            fetch_policy: Some(fetch),
        };

        let mut attempts = 0;
        let response = with_retry(
            &self.retry,
            "search",
            || {
                attempts += 1;
                let request = request.clone();
                async move {
                    guarded_call(
                        self.rate_limiter.as_deref(),
                        limit,
                        "search",
                        self.service.search(request),
                    )
                    .await
                }
            },
            on_retry,
        )
        .await?;

        let mut warnings = response.warnings;
        let mut kept = Vec::with_capacity(response.results.len().min(max_results));
        let mut overflow = 0;
        for hit in response.results {
            if hit.url.trim().is_empty() {
                warnings.push(Warning::new(
                    WarningSource::Search,
                    format!("dropped result without URL (title '{}')", hit.title),
                ));
                continue;
            }
            if kept.len() == max_results {
                overflow += 1;
                continue;
            }
            kept.push(hit);
        }
        if overflow > 0 {
            warnings.push(Warning::new(
                WarningSource::Search,
                format!("service returned {overflow} results beyond max_results={max_results}"),
            ));
        }

        let allocations = self.budget.allocate(kept.len());
        let results: Vec<SearchResult> = kept
            .into_iter()
            .zip(allocations)
            .enumerate()
            .map(|(position, (mut hit, limit))| {
                hit.excerpts = apply_to_excerpts(&hit.excerpts, limit);
                SearchResult::from_hit(hit, position + 1)
            })
            .collect();

        tracing::debug!(
            results = results.len(),
            warnings = warnings.len(),
            attempts,
            "Search complete"
        );

        Ok(SearchOutput {
            results,
            warnings,
            usage: response.usage,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SearchHit, SearchResponse};
    use crate::retry::JitterStrategy;
    use crate::services::MockSearchService;
    use mockall::Sequence;
    use pretty_assertions::assert_eq;

    fn input(max_results: usize) -> SearchInput {
        SearchInput {
            objective: "async runtimes".into(),
            queries: vec!["tokio".into()],
            max_results,
            source_policy: None,
            max_age_seconds: None,
        }
    }

    fn fast_retry(attempts: usize) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(attempts)
            .with_base_delay_ms(1)
            .with_max_delay_ms(2)
            .with_jitter(JitterStrategy::None)
    }

    fn hits(urls: &[&str]) -> Vec<SearchHit> {
        urls.iter()
            .map(|u| SearchHit::new(*u, format!("title {u}")).with_excerpt("x".repeat(50)))
            .collect()
    }

    #[tokio::test]
    async fn test_ranks_follow_service_order() {
        let mut mock = MockSearchService::new();
        mock.expect_search().times(1).returning(|_| {
            Ok(SearchResponse {
                results: hits(&["https://c.com", "https://a.com", "https://b.com"]),
                ..Default::default()
            })
        });

        let stage = SearchStage::new(Arc::new(mock));
        let out = stage.run(input(5), |_| {}).await.unwrap();

        let order: Vec<(&str, usize)> = out.results.iter().map(|r| (r.url.as_str(), r.rank)).collect();
        assert_eq!(
            order,
            vec![("https://c.com", 1), ("https://a.com", 2), ("https://b.com", 3)]
        );
        assert_eq!(out.attempts, 1);
    }

    #[tokio::test]
    async fn test_drops_excess_and_empty_urls() {
        let mut mock = MockSearchService::new();
        mock.expect_search().returning(|_| {
            Ok(SearchResponse {
                results: hits(&["https://a.com", "", "https://b.com", "https://c.com"]),
                ..Default::default()
            })
        });

        let stage = SearchStage::new(Arc::new(mock));
        let out = stage.run(input(2), |_| {}).await.unwrap();

        assert_eq!(out.results.len(), 2);
        assert_eq!(out.results[1].url, "https://b.com");
        assert_eq!(out.warnings.len(), 2);
        assert!(out.warnings.iter().all(|w| w.source == WarningSource::Search));
    }

    #[tokio::test]
    async fn test_excerpts_budgeted() {
        let mut mock = MockSearchService::new();
        mock.expect_search().returning(|_| {
            Ok(SearchResponse {
                results: hits(&["https://a.com", "https://b.com"]),
                ..Default::default()
            })
        });

        let stage = SearchStage::new(Arc::new(mock)).with_budget(Budget::new(40, 60));
        let out = stage.run(input(5), |_| {}).await.unwrap();

        assert_eq!(out.results[0].excerpts[0].len(), 30);
        assert_eq!(out.results[1].excerpts[0].len(), 30);
    }

    #[tokio::test]
    async fn test_request_carries_policy_and_freshness() {
        let mut mock = MockSearchService::new();
        mock.expect_search()
            .withf(|req| {
                req.max_results == 3
                    && req.fetch_policy.as_ref().and_then(|f| f.max_age_seconds) == Some(600)
                    && req
                        .source_policy
                        .as_ref()
                        .is_some_and(|p| p.include_domains == vec!["docs.rs".to_string()])
            })
            .times(1)
            .returning(|_| Ok(SearchResponse::default()));

        let stage = SearchStage::new(Arc::new(mock));
        let mut search = input(3);
        search.source_policy = Some(SourcePolicy::new().include("docs.rs"));
        search.max_age_seconds = Some(600);
        let out = stage.run(search, |_| {}).await.unwrap();
        assert!(out.results.is_empty());
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let mut mock = MockSearchService::new();
        let mut seq = Sequence::new();
        mock.expect_search()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(ResearchError::service(503, "busy")));
        mock.expect_search()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(SearchResponse {
                    results: hits(&["https://a.com"]),
                    ..Default::default()
                })
            });

        let stage = SearchStage::new(Arc::new(mock)).with_retry(fast_retry(3));
        let mut retries = 0;
        let out = stage.run(input(5), |_| retries += 1).await.unwrap();

        assert_eq!(out.results.len(), 1);
        assert_eq!(out.attempts, 2);
        assert_eq!(retries, 1);
    }

    #[tokio::test]
    async fn test_non_retryable_status_fails_immediately() {
        let mut mock = MockSearchService::new();
        mock.expect_search()
            .times(1)
            .returning(|_| Err(ResearchError::service(401, "bad key")));

        let stage = SearchStage::new(Arc::new(mock)).with_retry(fast_retry(3));
        let err = stage.run(input(5), |_| {}).await.unwrap_err();
        assert_eq!(err.status(), Some(401));
    }

    #[tokio::test]
    async fn test_invalid_input_makes_no_call() {
        let mut mock = MockSearchService::new();
        mock.expect_search().times(0);

        let stage = SearchStage::new(Arc::new(mock));
        assert!(stage.run(input(0), |_| {}).await.is_err());
        assert!(stage.run(input(21), |_| {}).await.is_err());

        let mut blank = input(5);
        blank.queries = vec![String::new()];
        let err = stage.run(blank, |_| {}).await.unwrap_err();
        assert!(err.is_contract_violation());
    }
}
