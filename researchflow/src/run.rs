//! Run requests, run states and the final `PipelineRun` record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::domain::SourcePolicy;
use crate::errors::{ErrorKind, ExitStatus, ResearchError, Result};
use crate::models::{ExtractOptions, SearchResult, UrlError, Usage, Warning};

/// One invocation of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Natural-language research objective.
    pub objective: String,
    /// Keyword queries, at least one.
    pub queries: Vec<String>,
    /// Optional domain and freshness rules for the search call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_policy: Option<SourcePolicy>,
    /// How many top-ranked results to extract. Zero means search only.
    pub top_n: usize,
    /// Results to ask the search service for. Defaults to `top_n`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
    /// Extraction toggles.
    #[serde(default)]
    pub extract: ExtractOptions,
    /// Maximum age of cached search results, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freshness_max_age_seconds: Option<u64>,
}

impl RunRequest {
    /// Creates a request extracting the top 5 results.
    #[must_use]
    pub fn new<Q, S>(objective: impl Into<String>, queries: Q) -> Self
    where
        Q: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            objective: objective.into(),
            queries: queries.into_iter().map(Into::into).collect(),
            source_policy: None,
            top_n: 5,
            max_results: None,
            extract: ExtractOptions::default(),
            freshness_max_age_seconds: None,
        }
    }

    /// Sets how many results to extract.
    #[must_use]
    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    /// Sets how many results to request from search.
    #[must_use]
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    /// Sets the source policy.
    #[must_use]
    pub fn with_source_policy(mut self, policy: SourcePolicy) -> Self {
        self.source_policy = Some(policy);
        self
    }

    /// Sets the extraction options.
    #[must_use]
    pub fn with_extract(mut self, options: ExtractOptions) -> Self {
        self.extract = options;
        self
    }

    /// Sets the search freshness window.
    #[must_use]
    pub fn with_freshness(mut self, max_age_seconds: u64) -> Self {
        self.freshness_max_age_seconds = Some(max_age_seconds);
        self
    }

    /// Number of results the search call will ask for.
    #[must_use]
    pub fn effective_max_results(&self, ceiling: usize) -> usize {
        self.max_results
            .unwrap_or_else(|| self.top_n.clamp(1, ceiling.max(1)))
    }

    /// Checks the request contract. Never performs I/O.
    pub fn validate(&self, ceiling: usize) -> Result<()> {
        if self.objective.trim().is_empty() {
            return Err(ResearchError::invalid_request("objective must not be empty"));
        }
        if self.queries.is_empty() {
            return Err(ResearchError::invalid_request("at least one query is required"));
        }
        if let Some(idx) = self.queries.iter().position(|q| q.trim().is_empty()) {
            return Err(ResearchError::invalid_request(format!(
                "query {idx} is empty"
            )));
        }
        let max_results = self.effective_max_results(ceiling);
        if max_results == 0 || max_results > ceiling {
            return Err(ResearchError::invalid_request(format!(
                "max_results must be between 1 and {ceiling}, got {max_results}"
            )));
        }
        if self.top_n > 0 && !self.extract.excerpts && !self.extract.full_content {
            return Err(ResearchError::invalid_request(
                "extraction needs excerpts or full_content enabled",
            ));
        }
        if let Some(policy) = &self.extract.fetch_policy {
            policy.validate("extract.fetch_policy")?;
        }
        Ok(())
    }
}

/// Hashes a request so identical invocations can be correlated.
///
/// Source-policy domains are normalized first, so `https://www.Example.com`
/// and `example.com` produce the same fingerprint.
#[must_use]
pub fn request_fingerprint(request: &RunRequest) -> String {
    let mut canonical = request.clone();
    if let Some(policy) = &request.source_policy {
        if let Ok((normalized, _)) = policy.normalized(usize::MAX) {
            canonical.source_policy = Some(normalized);
        }
    }
    if canonical.source_policy.as_ref().is_some_and(SourcePolicy::is_empty) {
        canonical.source_policy = None;
    }

    let json = serde_json::to_string(&canonical).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// States of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created, nothing validated yet.
    Idle,
    /// Search call in progress.
    Searching,
    /// Choosing the URLs to extract.
    Selecting,
    /// Extract batches in progress.
    Extracting,
    /// Merging search metadata with extracted content.
    Aggregating,
    /// Finished, possibly with per-URL failures.
    Done,
    /// The run could not complete.
    Failed,
    /// Stopped early at the caller's request.
    Cancelled,
}

impl RunState {
    /// Whether no transition leaves this state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if next == Self::Cancelled {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Self::Idle, Self::Searching)
                | (Self::Searching, Self::Selecting | Self::Failed)
                | (Self::Selecting, Self::Extracting)
                | (Self::Extracting, Self::Aggregating | Self::Failed)
                | (Self::Aggregating, Self::Done)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Searching => "searching",
            Self::Selecting => "selecting",
            Self::Extracting => "extracting",
            Self::Aggregating => "aggregating",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage ran.
    Done,
    /// Search failed or an internal invariant broke.
    Failed,
    /// Cancellation stopped extraction early.
    Cancelled,
}

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    /// Error classification.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// HTTP status, for service errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl From<&ResearchError> for RunFailure {
    fn from(err: &ResearchError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            status: err.status(),
        }
    }
}

/// Content extracted for one selected URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedContent {
    /// Budgeted excerpts.
    pub excerpts: Vec<String>,
    /// Budgeted full content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_content: Option<String>,
}

/// One selected URL in the final run, in selection order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchItem {
    /// Zero-based selection position.
    pub position: usize,
    /// Result URL.
    pub url: String,
    /// Title, from search when available.
    pub title: String,
    /// Publication date, from search when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<String>,
    /// Rank assigned by the search service.
    pub rank: usize,
    /// Excerpts returned by search.
    pub search_excerpts: Vec<String>,
    /// Extracted content, when extraction succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction: Option<ExtractedContent>,
}

impl ResearchItem {
    /// Creates a search-only item.
    #[must_use]
    pub fn from_search(position: usize, result: &SearchResult) -> Self {
        Self {
            position,
            url: result.url.clone(),
            title: result.title.clone(),
            publish_date: result.publish_date.clone(),
            rank: result.rank,
            search_excerpts: result.excerpts.clone(),
            extraction: None,
        }
    }

    /// Whether extracted content is attached.
    #[must_use]
    pub fn is_extracted(&self) -> bool {
        self.extraction.is_some()
    }
}

/// The immutable outcome of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Fingerprint of the normalized request.
    pub request_fingerprint: String,
    /// Research objective.
    pub objective: String,
    /// Queries sent to search.
    pub queries: Vec<String>,
    /// Normalized source policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_policy: Option<SourcePolicy>,
    /// Final status.
    pub status: RunStatus,
    /// Every state visited, in order.
    pub state_history: Vec<RunState>,
    /// Ranked search results.
    pub search_results: Vec<SearchResult>,
    /// Selected URLs with their extracted content.
    pub results: Vec<ResearchItem>,
    /// URL-level extraction failures.
    pub errors: Vec<UrlError>,
    /// Non-fatal advisories.
    pub warnings: Vec<Warning>,
    /// Merged service usage.
    pub usage: Usage,
    /// Duration of each stage in milliseconds.
    pub stage_timings_ms: BTreeMap<String, f64>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run ended.
    pub ended_at: DateTime<Utc>,
    /// Why the run failed, when status is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
}

impl PipelineRun {
    /// Process-style status for this run.
    ///
    /// Per-URL failures and cancellation still map to `Ok`.
    #[must_use]
    pub fn exit_status(&self) -> ExitStatus {
        match (&self.status, &self.failure) {
            (RunStatus::Failed, Some(failure)) => match failure.kind {
                ErrorKind::TransportError | ErrorKind::ServiceError => ExitStatus::ServiceError,
                ErrorKind::InvalidRequest
                | ErrorKind::InvalidDomain
                | ErrorKind::PolicyLimitExceeded => ExitStatus::InvalidArguments,
                _ => ExitStatus::UnexpectedError,
            },
            (RunStatus::Failed, None) => ExitStatus::UnexpectedError,
            _ => ExitStatus::Ok,
        }
    }

    /// Number of selected URLs with extracted content.
    #[must_use]
    pub fn extracted_count(&self) -> usize {
        self.results.iter().filter(|item| item.is_extracted()).count()
    }

    /// Whether the run finished but some selected URLs have no content.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.status == RunStatus::Cancelled
            || (self.status == RunStatus::Done && !self.errors.is_empty())
    }

    /// Serializes the run as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        let ok = RunRequest::new("find rust async runtimes", ["tokio"]);
        assert!(ok.validate(20).is_ok());

        let blank = RunRequest::new("  ", ["tokio"]);
        assert!(blank.validate(20).unwrap_err().is_contract_violation());

        let no_queries = RunRequest::new("x", Vec::<String>::new());
        assert!(no_queries.validate(20).is_err());

        let empty_query = RunRequest::new("x", ["tokio", " "]);
        assert!(empty_query.validate(20).is_err());

        let too_many = RunRequest::new("x", ["q"]).with_max_results(21);
        assert!(too_many.validate(20).is_err());

        let nothing_to_extract =
            RunRequest::new("x", ["q"]).with_extract(ExtractOptions::new().without_excerpts());
        assert!(nothing_to_extract.validate(20).is_err());
        assert!(nothing_to_extract.with_top_n(0).validate(20).is_ok());
    }

    #[test]
    fn test_effective_max_results() {
        assert_eq!(RunRequest::new("x", ["q"]).with_top_n(3).effective_max_results(20), 3);
        assert_eq!(RunRequest::new("x", ["q"]).with_top_n(50).effective_max_results(20), 20);
        assert_eq!(RunRequest::new("x", ["q"]).with_top_n(0).effective_max_results(20), 1);
        assert_eq!(
            RunRequest::new("x", ["q"]).with_top_n(2).with_max_results(10).effective_max_results(20),
            10
        );
    }

    #[test]
    fn test_fingerprint_normalizes_domains() {
        let a = RunRequest::new("x", ["q"])
            .with_source_policy(SourcePolicy::new().include("https://www.Example.com/path"));
        let b = RunRequest::new("x", ["q"]).with_source_policy(SourcePolicy::new().include("example.com"));
        let c = RunRequest::new("y", ["q"]).with_source_policy(SourcePolicy::new().include("example.com"));

        assert_eq!(request_fingerprint(&a), request_fingerprint(&b));
        assert_ne!(request_fingerprint(&a), request_fingerprint(&c));
        assert_eq!(request_fingerprint(&a).len(), 32);
    }

    #[test]
    fn test_fingerprint_ignores_empty_policy() {
        let plain = RunRequest::new("x", ["q"]);
        let empty = plain.clone().with_source_policy(SourcePolicy::new());
        assert_eq!(request_fingerprint(&plain), request_fingerprint(&empty));
    }

    #[test]
    fn test_state_transitions() {
        use RunState::*;
        let legal = [
            (Idle, Searching),
            (Searching, Selecting),
            (Searching, Failed),
            (Selecting, Extracting),
            (Extracting, Aggregating),
            (Extracting, Failed),
            (Aggregating, Done),
            (Idle, Cancelled),
            (Aggregating, Cancelled),
        ];
        for (from, to) in legal {
            assert!(from.can_transition_to(to), "{from} -> {to}");
        }

        let illegal = [
            (Idle, Extracting),
            (Selecting, Failed),
            (Searching, Done),
            (Done, Cancelled),
            (Failed, Searching),
            (Aggregating, Failed),
        ];
        for (from, to) in illegal {
            assert!(!from.can_transition_to(to), "{from} -> {to}");
        }
    }

    #[test]
    fn test_run_failure_from_error() {
        let failure = RunFailure::from(&ResearchError::service(503, "down"));
        assert_eq!(failure.kind, ErrorKind::ServiceError);
        assert_eq!(failure.status, Some(503));
    }
}
