//! Scripted service fakes.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::errors::{ResearchError, Result};
use crate::models::{
    ExtractFailure, ExtractRequest, ExtractResponse, ExtractedPage, SearchHit, SearchRequest,
    SearchResponse, Usage,
};
use crate::services::{ExtractService, SearchService};

/// A search service that replays scripted responses and records requests.
#[derive(Debug)]
pub struct ScriptedSearchService {
    response: SearchResponse,
    failures: Mutex<VecDeque<ResearchError>>,
    delay: Duration,
    requests: Mutex<Vec<SearchRequest>>,
}

impl ScriptedSearchService {
    /// Creates a service that always returns `hits`.
    #[must_use]
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            response: SearchResponse {
                results: hits,
                warnings: Vec::new(),
                usage: Usage::new().with("search_calls", 1),
            },
            failures: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fails the next call with `error`. Queued failures are used in order.
    #[must_use]
    pub fn failing_with(self, error: ResearchError) -> Self {
        self.failures.lock().push_back(error);
        self
    }

    /// Fails the next `times` calls with `error`.
    #[must_use]
    pub fn failing_times(self, error: &ResearchError, times: usize) -> Self {
        {
            let mut failures = self.failures.lock();
            for _ in 0..times {
                failures.push_back(error.clone());
            }
        }
        self
    }

    /// Delays every call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Requests received, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<SearchRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl SearchService for ScriptedSearchService {
    async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        self.requests.lock().push(request);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failure = self.failures.lock().pop_front();
        match failure {
            Some(error) => Err(error),
            None => Ok(self.response.clone()),
        }
    }
}

/// How the scripted extract service answers for one URL.
#[derive(Debug, Clone)]
enum UrlScript {
    Page(ExtractedPage),
    Failure(ExtractFailure),
    Omit,
}

/// An extract service with per-URL scripts, delays and call accounting.
///
/// URLs without a script get a page with one excerpt.
#[derive(Debug, Default)]
pub struct ScriptedExtractService {
    scripts: HashMap<String, UrlScript>,
    delays: HashMap<String, Duration>,
    call_failures: Mutex<VecDeque<ResearchError>>,
    requests: Mutex<Vec<ExtractRequest>>,
    completions: Mutex<Vec<Vec<String>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedExtractService {
    /// Creates a service that extracts every URL successfully.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `page` for its URL.
    #[must_use]
    pub fn with_page(mut self, page: ExtractedPage) -> Self {
        self.scripts.insert(page.url.clone(), UrlScript::Page(page));
        self
    }

    /// Reports `url` as a per-URL failure.
    #[must_use]
    pub fn with_url_failure(
        mut self,
        url: impl Into<String>,
        error_type: impl Into<String>,
        status: Option<u16>,
    ) -> Self {
        let url = url.into();
        let failure = ExtractFailure {
            url: url.clone(),
            error_type: error_type.into(),
            status,
            detail: String::new(),
        };
        self.scripts.insert(url, UrlScript::Failure(failure));
        self
    }

    /// Leaves `url` out of the response entirely.
    #[must_use]
    pub fn omitting(mut self, url: impl Into<String>) -> Self {
        self.scripts.insert(url.into(), UrlScript::Omit);
        self
    }

    /// Delays any call containing `url`. A call waits for its slowest URL.
    #[must_use]
    pub fn with_delay_for(mut self, url: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(url.into(), delay);
        self
    }

    /// Fails the next `times` calls with `error`.
    #[must_use]
    pub fn failing_calls(self, error: &ResearchError, times: usize) -> Self {
        {
            let mut failures = self.call_failures.lock();
            for _ in 0..times {
                failures.push_back(error.clone());
            }
        }
        self
    }

    /// Number of calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Requests received, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<ExtractRequest> {
        self.requests.lock().clone()
    }

    /// URL lists of successful calls, in completion order.
    #[must_use]
    pub fn completion_order(&self) -> Vec<Vec<String>> {
        self.completions.lock().clone()
    }

    /// Highest number of calls that were in flight at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn respond(&self, urls: &[String]) -> ExtractResponse {
        let mut response = ExtractResponse {
            usage: Usage::new().with("extract_urls", u64::try_from(urls.len()).unwrap_or(u64::MAX)),
            ..Default::default()
        };
        for url in urls {
            match self.scripts.get(url) {
                Some(UrlScript::Page(page)) => response.results.push(page.clone()),
                Some(UrlScript::Failure(failure)) => response.errors.push(failure.clone()),
                Some(UrlScript::Omit) => {}
                None => response.results.push(ExtractedPage::with_excerpts(
                    url.clone(),
                    vec![format!("content of {url}")],
                )),
            }
        }
        response
    }
}

/// Counts a call as in flight until dropped, so cancelled calls are released.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
    count: usize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Self { counter, count }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExtractService for ScriptedExtractService {
    async fn extract(&self, request: ExtractRequest) -> Result<ExtractResponse> {
        let urls = request.urls.clone();
        self.requests.lock().push(request);

        let guard = InFlight::enter(&self.in_flight);
        self.max_in_flight.fetch_max(guard.count, Ordering::SeqCst);

        let delay = urls
            .iter()
            .filter_map(|url| self.delays.get(url))
            .max()
            .copied()
            .unwrap_or(Duration::ZERO);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        drop(guard);

        let failure = self.call_failures.lock().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }
        self.completions.lock().push(urls.clone());
        Ok(self.respond(&urls))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract_request(urls: &[&str]) -> ExtractRequest {
        ExtractRequest {
            urls: urls.iter().map(|u| (*u).to_string()).collect(),
            objective: None,
            queries: Vec::new(),
            excerpts: true,
            full_content: false,
            fetch_policy: None,
        }
    }

    #[tokio::test]
    async fn test_scripted_search_fails_then_succeeds() {
        let service = ScriptedSearchService::new(vec![SearchHit::new("https://a.com", "A")])
            .failing_with(ResearchError::service(503, "busy"));

        let request = SearchRequest {
            objective: "o".into(),
            queries: vec!["q".into()],
            max_results: 5,
            source_policy: None,
            fetch_policy: None,
        };
        assert!(service.search(request.clone()).await.is_err());
        assert_eq!(service.search(request).await.unwrap().results.len(), 1);
        assert_eq!(service.call_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_extract_scripts() {
        let service = ScriptedExtractService::new()
            .with_url_failure("https://b.com", "unreadable", Some(404))
            .omitting("https://c.com");

        let response = service
            .extract(extract_request(&["https://a.com", "https://b.com", "https://c.com"]))
            .await
            .unwrap();

        assert_eq!(response.results.len(), 1);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].status, Some(404));
        assert_eq!(response.usage.get("extract_urls"), 3);
        assert_eq!(service.completion_order().len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_extract_call_failure() {
        let service = ScriptedExtractService::new()
            .failing_calls(&ResearchError::transport("reset"), 1);

        assert!(service.extract(extract_request(&["https://a.com"])).await.is_err());
        assert!(service.extract(extract_request(&["https://a.com"])).await.is_ok());
        assert_eq!(service.call_count(), 2);
        assert_eq!(service.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_dropped_call_releases_in_flight_slot() {
        let service = ScriptedExtractService::new()
            .with_delay_for("https://slow.com", Duration::from_secs(5));

        let timed_out = tokio::time::timeout(
            Duration::from_millis(10),
            service.extract(extract_request(&["https://slow.com"])),
        )
        .await;
        assert!(timed_out.is_err());

        service.extract(extract_request(&["https://a.com"])).await.unwrap();
        assert_eq!(service.max_in_flight(), 1);
        assert_eq!(service.in_flight.load(Ordering::SeqCst), 0);
    }
}
