//! Test fixtures for pipeline testing.

use crate::config::PipelineConfig;
use crate::models::SearchHit;
use crate::retry::{JitterStrategy, RetryConfig};
use crate::run::RunRequest;

/// URL used for the `i`-th fixture hit.
#[must_use]
pub fn hit_url(i: usize) -> String {
    format!("https://site{i}.example.com/article-{i}")
}

/// `n` distinct search hits, each with one excerpt.
#[must_use]
pub fn search_hits(n: usize) -> Vec<SearchHit> {
    (0..n)
        .map(|i| {
            SearchHit::new(hit_url(i), format!("Article {i}"))
                .with_excerpt(format!("Search excerpt for article {i}."))
                .with_publish_date("2024-03-01")
        })
        .collect()
}

/// A valid request extracting the top `top_n` results.
#[must_use]
pub fn request(top_n: usize) -> RunRequest {
    RunRequest::new(
        "Compare the scheduling models of Rust async runtimes",
        ["tokio work stealing scheduler", "async-std executor design"],
    )
    .with_top_n(top_n)
}

/// Retry policy with millisecond delays and no jitter.
#[must_use]
pub fn fast_retry(max_attempts: usize) -> RetryConfig {
    RetryConfig::new()
        .with_max_attempts(max_attempts)
        .with_base_delay_ms(1)
        .with_max_delay_ms(5)
        .with_jitter(JitterStrategy::None)
}

/// Default configuration with fast retries.
#[must_use]
pub fn fast_config() -> PipelineConfig {
    PipelineConfig::new()
        .with_search_retry(fast_retry(3))
        .with_extract_retry(fast_retry(2))
}
