//! Data models exchanged with the search and extract services.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::FetchPolicy;
use crate::domain::SourcePolicy;
use crate::errors::ErrorKind;

/// Origin of a non-fatal warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningSource {
    /// Advisory returned by the search service or raised by the search stage.
    Search,
    /// Advisory returned by the extract service or raised during reconciliation.
    Extract,
    /// Note produced while normalizing the source policy.
    Normalization,
    /// Note produced by the orchestrator itself.
    Pipeline,
}

/// A non-fatal advisory attached to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    /// Where the warning came from.
    pub source: WarningSource,
    /// Human-readable message.
    pub message: String,
    /// URL the warning is about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Warning {
    /// Creates a new warning.
    #[must_use]
    pub fn new(source: WarningSource, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
            url: None,
        }
    }

    /// Attaches a URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Named usage counters reported by the services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Usage {
    counters: BTreeMap<String, u64>,
}

impl Usage {
    /// Creates empty usage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `count` to the named counter.
    pub fn add(&mut self, name: impl Into<String>, count: u64) {
        *self.counters.entry(name.into()).or_insert(0) += count;
    }

    /// Builder form of [`Usage::add`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, count: u64) -> Self {
        self.add(name, count);
        self
    }

    /// Merges another usage report into this one.
    pub fn merge(&mut self, other: &Self) {
        for (name, count) in &other.counters {
            self.add(name.clone(), *count);
        }
    }

    /// Returns a counter, zero when absent.
    #[must_use]
    pub fn get(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Iterates over the counters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counters.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Returns true when no counter was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

/// One hit as returned by the search service, in ranker order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Result URL.
    pub url: String,
    /// Page title.
    #[serde(default)]
    pub title: String,
    /// Publication date as reported by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<String>,
    /// Relevant excerpts, in service order.
    #[serde(default)]
    pub excerpts: Vec<String>,
}

impl SearchHit {
    /// Creates a hit with just a URL and title.
    #[must_use]
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Adds an excerpt.
    #[must_use]
    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpts.push(excerpt.into());
        self
    }

    /// Sets the publication date.
    #[must_use]
    pub fn with_publish_date(mut self, date: impl Into<String>) -> Self {
        self.publish_date = Some(date.into());
        self
    }
}

/// A ranked search result after the search stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Result URL.
    pub url: String,
    /// Page title.
    pub title: String,
    /// Publication date as reported by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<String>,
    /// Budgeted excerpts.
    pub excerpts: Vec<String>,
    /// 1-based position assigned by the remote ranker.
    pub rank: usize,
}

impl SearchResult {
    /// Builds a ranked result from a service hit.
    #[must_use]
    pub fn from_hit(hit: SearchHit, rank: usize) -> Self {
        Self {
            url: hit.url,
            title: hit.title,
            publish_date: hit.publish_date,
            excerpts: hit.excerpts,
            rank,
        }
    }
}

/// Parameters of one search call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Research objective.
    pub objective: String,
    /// Keyword queries.
    pub queries: Vec<String>,
    /// Number of results wanted.
    pub max_results: usize,
    /// Normalized source policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_policy: Option<SourcePolicy>,
    /// Fetch policy for the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_policy: Option<FetchPolicy>,
}

/// What the search service returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResponse {
    /// Hits in ranker order.
    pub results: Vec<SearchHit>,
    /// Service advisories.
    pub warnings: Vec<Warning>,
    /// Usage counters.
    pub usage: Usage,
}

/// Parameters of one extract call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractRequest {
    /// URLs to extract, at most the batch cap.
    pub urls: Vec<String>,
    /// Objective used to focus excerpts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
    /// Queries used to focus excerpts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<String>,
    /// Whether to return excerpts.
    pub excerpts: bool,
    /// Whether to return full page content.
    pub full_content: bool,
    /// Fetch policy for the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_policy: Option<FetchPolicy>,
}

/// A page as returned by the extract service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedPage {
    /// Page URL.
    pub url: String,
    /// Page title.
    #[serde(default)]
    pub title: String,
    /// Publication date as reported by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<String>,
    /// Focused excerpts.
    #[serde(default)]
    pub excerpts: Vec<String>,
    /// Full page content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_content: Option<String>,
}

impl ExtractedPage {
    /// Creates a page with excerpts only.
    #[must_use]
    pub fn with_excerpts(url: impl Into<String>, excerpts: Vec<String>) -> Self {
        Self {
            url: url.into(),
            excerpts,
            ..Default::default()
        }
    }
}

/// A per-URL failure as reported by the extract service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractFailure {
    /// URL that could not be extracted.
    pub url: String,
    /// Service-specific error type.
    pub error_type: String,
    /// HTTP status of the fetch, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Free-form detail.
    #[serde(default)]
    pub detail: String,
}

/// What the extract service returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractResponse {
    /// Successfully extracted pages.
    pub results: Vec<ExtractedPage>,
    /// URLs the service could not extract.
    pub errors: Vec<ExtractFailure>,
    /// Service advisories.
    pub warnings: Vec<Warning>,
    /// Usage counters.
    pub usage: Usage,
}

/// Status of one URL's extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractStatus {
    /// Content was extracted.
    Ok,
    /// Extraction failed.
    Error,
}

/// Outcome of extracting one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractResult {
    /// Page URL.
    pub url: String,
    /// Page title.
    pub title: String,
    /// Publication date as reported by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<String>,
    /// Focused excerpts.
    pub excerpts: Vec<String>,
    /// Full page content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_content: Option<String>,
    /// Extraction status.
    pub status: ExtractStatus,
    /// Error detail for failed extractions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl ExtractResult {
    /// Builds an `ok` result from a page.
    #[must_use]
    pub fn ok(page: ExtractedPage) -> Self {
        Self {
            url: page.url,
            title: page.title,
            publish_date: page.publish_date,
            excerpts: page.excerpts,
            full_content: page.full_content,
            status: ExtractStatus::Ok,
            error_detail: None,
        }
    }

    /// Returns true when the result carries an excerpt or full content.
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.excerpts.iter().any(|e| !e.is_empty())
            || self.full_content.as_deref().is_some_and(|c| !c.is_empty())
    }

    /// Returns true for `ok` results.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == ExtractStatus::Ok
    }
}

/// A URL-level failure recorded in a run's `errors` partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlError {
    /// URL that failed.
    pub url: String,
    /// Failure classification.
    pub kind: ErrorKind,
    /// HTTP status, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Free-form detail.
    pub detail: String,
    /// Selection positions referencing this URL.
    #[serde(default)]
    pub positions: Vec<usize>,
}

impl UrlError {
    /// Creates a new URL error.
    #[must_use]
    pub fn new(url: impl Into<String>, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind,
            status: None,
            detail: detail.into(),
            positions: Vec::new(),
        }
    }

    /// Sets the HTTP status.
    #[must_use]
    pub fn with_status(mut self, status: Option<u16>) -> Self {
        self.status = status;
        self
    }
}

/// Extraction toggles and overrides for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractOptions {
    /// Request focused excerpts.
    #[serde(default = "default_true")]
    pub excerpts: bool,
    /// Request full page content.
    #[serde(default)]
    pub full_content: bool,
    /// Override the configured extract fetch policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_policy: Option<FetchPolicy>,
}

fn default_true() -> bool {
    true
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            excerpts: true,
            full_content: false,
            fetch_policy: None,
        }
    }
}

impl ExtractOptions {
    /// Creates default options (excerpts only).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests full content as well.
    #[must_use]
    pub fn with_full_content(mut self) -> Self {
        self.full_content = true;
        self
    }

    /// Disables excerpts.
    #[must_use]
    pub fn without_excerpts(mut self) -> Self {
        self.excerpts = false;
        self
    }

    /// Overrides the fetch policy.
    #[must_use]
    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = Some(policy);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_merge() {
        let mut usage = Usage::new().with("search_calls", 1);
        usage.merge(&Usage::new().with("search_calls", 2).with("extract_urls", 10));

        assert_eq!(usage.get("search_calls"), 3);
        assert_eq!(usage.get("extract_urls"), 10);
        assert_eq!(usage.get("missing"), 0);
        assert_eq!(
            serde_json::to_value(&usage).unwrap(),
            serde_json::json!({ "extract_urls": 10, "search_calls": 3 })
        );
    }

    #[test]
    fn test_extract_result_has_content() {
        let ok = ExtractResult::ok(ExtractedPage::with_excerpts("https://a.com", vec!["x".into()]));
        assert!(ok.has_content());
        assert!(ok.is_ok());

        let empty = ExtractResult::ok(ExtractedPage {
            url: "https://a.com".into(),
            excerpts: vec![String::new()],
            full_content: Some(String::new()),
            ..Default::default()
        });
        assert!(!empty.has_content());

        let full = ExtractResult::ok(ExtractedPage {
            url: "https://a.com".into(),
            full_content: Some("body".into()),
            ..Default::default()
        });
        assert!(full.has_content());
    }

    #[test]
    fn test_search_result_from_hit() {
        let hit = SearchHit::new("https://a.com", "A")
            .with_excerpt("one")
            .with_publish_date("2024-05-01");
        let result = SearchResult::from_hit(hit, 3);
        assert_eq!(result.rank, 3);
        assert_eq!(result.excerpts, vec!["one".to_string()]);
        assert_eq!(result.publish_date.as_deref(), Some("2024-05-01"));
    }

    #[test]
    fn test_extract_options_defaults() {
        let opts: ExtractOptions = serde_json::from_str("{}").unwrap();
        assert!(opts.excerpts);
        assert!(!opts.full_content);
        assert_eq!(opts, ExtractOptions::default());
    }

    #[test]
    fn test_warning_serialization() {
        let warning = Warning::new(WarningSource::Extract, "dropped").with_url("https://x.io");
        let json = serde_json::to_value(&warning).unwrap();
        assert_eq!(json["source"], "extract");
        assert_eq!(json["url"], "https://x.io");
    }
}
