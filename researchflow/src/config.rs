//! Configuration types for the research pipeline.
//!
//! Limits that differ between stages (result caps, batch caps, character
//! budgets, timeouts) are collected here and validated once, when the
//! orchestrator is built.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::budget::Budget;
use crate::errors::{ResearchError, Result};
use crate::retry::RetryConfig;

/// Largest number of URLs the extract service accepts in one call.
pub const MAX_BATCH_CAP: usize = 10;

/// Longest timeout a fetch policy may ask for.
pub const MAX_TIMEOUT_SECONDS: f64 = 86_400.0;

/// Slowest refill rate a rate limit may use.
pub const MIN_REQUESTS_PER_SECOND: f64 = 0.001;

/// Hard limits imposed by the remote services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Largest `max_results` a search call may ask for.
    #[serde(default = "default_max_results_ceiling")]
    pub max_results_ceiling: usize,
    /// Largest number of URLs in one extract call.
    #[serde(default = "default_batch_cap")]
    pub batch_cap: usize,
    /// Largest include/exclude domain list after normalization.
    #[serde(default = "default_max_domains")]
    pub max_domains: usize,
}

fn default_max_results_ceiling() -> usize {
    20
}

fn default_batch_cap() -> usize {
    10
}

fn default_max_domains() -> usize {
    10
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_results_ceiling: default_max_results_ceiling(),
            batch_cap: default_batch_cap(),
            max_domains: default_max_domains(),
        }
    }
}

/// Per-call controls over cache usage, recrawl freshness and timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchPolicy {
    /// Maximum age of cached content before a live fetch is forced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_seconds: Option<u64>,
    /// Timeout for the call, in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    /// Fail instead of serving stale cache when a live fetch fails.
    #[serde(default)]
    pub disable_cache_fallback: bool,
}

fn default_timeout_seconds() -> f64 {
    60.0
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_age_seconds: None,
            timeout_seconds: default_timeout_seconds(),
            disable_cache_fallback: false,
        }
    }
}

impl FetchPolicy {
    /// Creates a new fetch policy with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Sets the cache max age.
    #[must_use]
    pub fn with_max_age(mut self, seconds: u64) -> Self {
        self.max_age_seconds = Some(seconds);
        self
    }

    /// Disables the stale-cache fallback.
    #[must_use]
    pub fn without_cache_fallback(mut self) -> Self {
        self.disable_cache_fallback = true;
        self
    }

    /// Gets timeout as Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_seconds.min(MAX_TIMEOUT_SECONDS))
            .unwrap_or(Duration::ZERO)
    }

    /// Validates the policy.
    pub fn validate(&self, name: &str) -> Result<()> {
        if !self.timeout_seconds.is_finite() || self.timeout_seconds <= 0.0 {
            return Err(ResearchError::invalid_request(format!(
                "{name}: timeout_seconds must be a positive number"
            )));
        }
        if self.timeout_seconds > MAX_TIMEOUT_SECONDS {
            return Err(ResearchError::invalid_request(format!(
                "{name}: timeout_seconds must be at most {MAX_TIMEOUT_SECONDS}"
            )));
        }
        Ok(())
    }
}

/// Token-bucket settings for calls to one remote service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Steady refill rate.
    pub requests_per_second: f64,
    /// Bucket capacity.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5.0,
            burst: 5,
        }
    }
}

impl RateLimitConfig {
    /// Validates the settings.
    pub fn validate(&self) -> Result<()> {
        if !self.requests_per_second.is_finite()
            || self.requests_per_second < MIN_REQUESTS_PER_SECOND
        {
            return Err(ResearchError::invalid_request(format!(
                "rate_limit: requests_per_second must be at least {MIN_REQUESTS_PER_SECOND}"
            )));
        }
        if self.burst == 0 {
            return Err(ResearchError::invalid_request(
                "rate_limit: burst must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Combined configuration for the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Service limits.
    #[serde(default)]
    pub limits: Limits,
    /// Budget applied to search excerpts.
    #[serde(default = "Budget::search_default")]
    pub search_budget: Budget,
    /// Budget applied to extracted content.
    #[serde(default = "Budget::extract_default")]
    pub extract_budget: Budget,
    /// Fetch policy for search calls.
    #[serde(default)]
    pub search_fetch: FetchPolicy,
    /// Fetch policy for extract calls.
    #[serde(default)]
    pub extract_fetch: FetchPolicy,
    /// Retry policy for search calls.
    #[serde(default)]
    pub search_retry: RetryConfig,
    /// Retry policy for extract batches.
    #[serde(default = "default_extract_retry")]
    pub extract_retry: RetryConfig,
    /// Maximum batches in flight at once.
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    /// Optional rate limit shared by every call to a service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
}

fn default_extract_retry() -> RetryConfig {
    RetryConfig::default().with_max_attempts(2)
}

fn default_max_concurrent_batches() -> usize {
    4
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            search_budget: Budget::search_default(),
            extract_budget: Budget::extract_default(),
            search_fetch: FetchPolicy::default(),
            extract_fetch: FetchPolicy::default(),
            search_retry: RetryConfig::default(),
            extract_retry: default_extract_retry(),
            max_concurrent_batches: default_max_concurrent_batches(),
            rate_limit: None,
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON configuration document.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the extract batch cap.
    #[must_use]
    pub fn with_batch_cap(mut self, cap: usize) -> Self {
        self.limits.batch_cap = cap;
        self
    }

    /// Sets the maximum concurrent batches.
    #[must_use]
    pub fn with_max_concurrent_batches(mut self, max: usize) -> Self {
        self.max_concurrent_batches = max;
        self
    }

    /// Sets the search budget.
    #[must_use]
    pub fn with_search_budget(mut self, budget: Budget) -> Self {
        self.search_budget = budget;
        self
    }

    /// Sets the extract budget.
    #[must_use]
    pub fn with_extract_budget(mut self, budget: Budget) -> Self {
        self.extract_budget = budget;
        self
    }

    /// Sets the search retry policy.
    #[must_use]
    pub fn with_search_retry(mut self, retry: RetryConfig) -> Self {
        self.search_retry = retry;
        self
    }

    /// Sets the extract retry policy.
    #[must_use]
    pub fn with_extract_retry(mut self, retry: RetryConfig) -> Self {
        self.extract_retry = retry;
        self
    }

    /// Sets the extract fetch policy.
    #[must_use]
    pub fn with_extract_fetch(mut self, fetch: FetchPolicy) -> Self {
        self.extract_fetch = fetch;
        self
    }

    /// Sets the search fetch policy.
    #[must_use]
    pub fn with_search_fetch(mut self, fetch: FetchPolicy) -> Self {
        self.search_fetch = fetch;
        self
    }

    /// Enables rate limiting.
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<()> {
        if self.limits.batch_cap == 0 || self.limits.batch_cap > MAX_BATCH_CAP {
            return Err(ResearchError::invalid_request(format!(
                "limits: batch_cap must be between 1 and {MAX_BATCH_CAP}"
            )));
        }
        if self.limits.max_results_ceiling == 0 {
            return Err(ResearchError::invalid_request(
                "limits: max_results_ceiling must be at least 1",
            ));
        }
        if self.max_concurrent_batches == 0 {
            return Err(ResearchError::invalid_request(
                "max_concurrent_batches must be at least 1",
            ));
        }
        self.search_budget.validate("search_budget")?;
        self.extract_budget.validate("extract_budget")?;
        for (name, budget) in [
            ("search_budget", self.search_budget),
            ("extract_budget", self.extract_budget),
        ] {
            // Every result up to the ceiling must get at least one character.
            if budget.max_chars_total < self.limits.max_results_ceiling {
                return Err(ResearchError::invalid_request(format!(
                    "{name}: max_chars_total must be at least max_results_ceiling ({})",
                    self.limits.max_results_ceiling
                )));
            }
        }
        self.search_fetch.validate("search_fetch")?;
        self.extract_fetch.validate("extract_fetch")?;
        self.search_retry.validate("search_retry")?;
        self.extract_retry.validate("extract_retry")?;
        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.limits.batch_cap, 10);
        assert_eq!(config.limits.max_results_ceiling, 20);
        assert_eq!(config.limits.max_domains, 10);
        assert_eq!(config.search_retry.max_attempts, 3);
        assert_eq!(config.extract_retry.max_attempts, 2);
        assert!(config.rate_limit.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = PipelineConfig::from_json(
            r#"{
                "limits": { "batch_cap": 5 },
                "extract_fetch": { "timeout_seconds": 15.0, "disable_cache_fallback": true },
                "rate_limit": { "requests_per_second": 2.0, "burst": 1 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.limits.batch_cap, 5);
        assert_eq!(config.limits.max_domains, 10);
        assert_eq!(config.extract_fetch.timeout(), Duration::from_secs(15));
        assert!(config.extract_fetch.disable_cache_fallback);
        assert_eq!(config.search_budget, Budget::search_default());
        assert_eq!(config.rate_limit.map(|r| r.burst), Some(1));
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        let err = PipelineConfig::from_json(r#"{ "limits": { "batch_cap": 0 } }"#).unwrap_err();
        assert!(err.is_contract_violation());

        let err = PipelineConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, ResearchError::Serialization(_)));
    }

    #[test]
    fn test_fetch_policy_builder() {
        let policy = FetchPolicy::new()
            .with_timeout(5.0)
            .with_max_age(3600)
            .without_cache_fallback();

        assert_eq!(policy.timeout(), Duration::from_secs(5));
        assert_eq!(policy.max_age_seconds, Some(3600));
        assert!(policy.disable_cache_fallback);
        assert!(FetchPolicy::new().with_timeout(0.0).validate("x").is_err());
    }

    #[test]
    fn test_rate_limit_validate() {
        assert!(RateLimitConfig::default().validate().is_ok());
        let bad = RateLimitConfig {
            requests_per_second: 0.0,
            burst: 1,
        };
        assert!(bad.validate().is_err());

        let crawl = RateLimitConfig {
            requests_per_second: 1e-300,
            burst: 1,
        };
        assert!(crawl.validate().is_err());
        assert!(PipelineConfig::default()
            .with_rate_limit(crawl)
            .validate()
            .is_err());
    }

    #[test]
    fn test_timeout_upper_bound() {
        let huge = FetchPolicy::new().with_timeout(1e20);
        assert!(huge.validate("extract_fetch").is_err());
        assert_eq!(huge.timeout(), Duration::from_secs(86_400));

        assert!(FetchPolicy::new()
            .with_timeout(MAX_TIMEOUT_SECONDS)
            .validate("extract_fetch")
            .is_ok());
        assert!(PipelineConfig::default()
            .with_search_fetch(huge)
            .validate()
            .is_err());
    }

    #[test]
    fn test_batch_cap_bounded_by_service_limit() {
        assert!(PipelineConfig::default()
            .with_batch_cap(MAX_BATCH_CAP)
            .validate()
            .is_ok());
        let err = PipelineConfig::default()
            .with_batch_cap(usize::MAX)
            .validate()
            .unwrap_err();
        assert!(err.is_contract_violation());
        assert!(PipelineConfig::from_json(r#"{ "limits": { "batch_cap": 11 } }"#).is_err());
    }

    #[test]
    fn test_budget_must_cover_every_result() {
        let starved = PipelineConfig::default().with_extract_budget(Budget::new(10, 3));
        let err = starved.validate().unwrap_err();
        assert!(err.is_contract_violation());
        assert!(err.to_string().contains("extract_budget"));

        assert!(PipelineConfig::default()
            .with_search_budget(Budget::new(10, 19))
            .validate()
            .is_err());
        assert!(PipelineConfig::default()
            .with_extract_budget(Budget::new(10, 20))
            .validate()
            .is_ok());
    }
}
