//! HTTP adapters for JSON search and extract endpoints.
//!
//! Both services POST a snake_case JSON body to `{base_url}/search` or
//! `{base_url}/extract` and authenticate with an `x-api-key` header. The
//! timeout of each call comes from the request's fetch policy.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::budget::truncate_chars;
use crate::config::FetchPolicy;
use crate::errors::{ResearchError, Result};
use crate::models::{
    ExtractFailure, ExtractRequest, ExtractResponse, ExtractedPage, SearchHit, SearchRequest,
    SearchResponse, Usage, Warning, WarningSource,
};
use crate::services::{ExtractService, SearchService};

const API_KEY_HEADER: &str = "x-api-key";
const MAX_ERROR_BODY_CHARS: usize = 2_000;

#[derive(Debug, Deserialize)]
struct WireWarning {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    name: String,
    count: u64,
}

#[derive(Debug, Deserialize)]
struct WireSearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
    #[serde(default)]
    warnings: Vec<WireWarning>,
    #[serde(default)]
    usage: Vec<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireExtractResponse {
    #[serde(default)]
    results: Vec<ExtractedPage>,
    #[serde(default)]
    errors: Vec<ExtractFailure>,
    #[serde(default)]
    warnings: Vec<WireWarning>,
    #[serde(default)]
    usage: Vec<WireUsage>,
}

fn convert_warnings(source: WarningSource, warnings: Vec<WireWarning>) -> Vec<Warning> {
    warnings
        .into_iter()
        .map(|w| match w.kind {
            Some(kind) => Warning::new(source, format!("{kind}: {}", w.message)),
            None => Warning::new(source, w.message),
        })
        .collect()
}

fn convert_usage(entries: Vec<WireUsage>) -> Usage {
    let mut usage = Usage::new();
    for entry in entries {
        usage.add(entry.name, entry.count);
    }
    usage
}

fn decode_search_response(body: &str) -> Result<SearchResponse> {
    let wire: WireSearchResponse = serde_json::from_str(body)?;
    Ok(SearchResponse {
        results: wire.results,
        warnings: convert_warnings(WarningSource::Search, wire.warnings),
        usage: convert_usage(wire.usage),
    })
}

fn decode_extract_response(body: &str) -> Result<ExtractResponse> {
    let wire: WireExtractResponse = serde_json::from_str(body)?;
    Ok(ExtractResponse {
        results: wire.results,
        errors: wire.errors,
        warnings: convert_warnings(WarningSource::Extract, wire.warnings),
        usage: convert_usage(wire.usage),
    })
}

fn classify_transport(error: &reqwest::Error) -> ResearchError {
    if error.is_timeout() {
        ResearchError::transport(format!("request timed out: {error}"))
    } else if error.is_connect() {
        ResearchError::transport(format!("connection failed: {error}"))
    } else {
        ResearchError::transport(error.to_string())
    }
}

fn service_error(status: u16, body: &str) -> ResearchError {
    ResearchError::service(status, truncate_chars(body.trim(), MAX_ERROR_BODY_CHARS))
}

/// Shared client state for both endpoints.
#[derive(Debug, Clone)]
struct JsonEndpoint {
    client: Client,
    base_url: String,
}

impl JsonEndpoint {
    fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(api_key)
            .map_err(|e| ResearchError::invalid_request(format!("invalid api key: {e}")))?;
        key.set_sensitive(true);
        headers.insert(API_KEY_HEADER, key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ResearchError::Internal(format!("http client build failed: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B, T>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
        decode: fn(&str) -> Result<T>,
    ) -> Result<T>
    where
        B: Serialize + Sync,
    {
        let url = format!("{}/{path}", self.base_url);
        tracing::debug!(url = %url, timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX), "POST");

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| classify_transport(&e))?;
        if !status.is_success() {
            tracing::warn!(url = %url, status = status.as_u16(), "Service returned an error status");
            return Err(service_error(status.as_u16(), &text));
        }
        decode(&text)
    }
}

fn timeout_of(policy: Option<&FetchPolicy>) -> Duration {
    policy.map_or_else(|| FetchPolicy::default().timeout(), FetchPolicy::timeout)
}

/// [`SearchService`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSearchService {
    endpoint: JsonEndpoint,
}

impl HttpSearchService {
    /// Creates a client for `{base_url}/search`.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        Ok(Self {
            endpoint: JsonEndpoint::new(base_url, api_key)?,
        })
    }
}

#[async_trait]
impl SearchService for HttpSearchService {
    async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let timeout = timeout_of(request.fetch_policy.as_ref());
        self.endpoint
            .post("search", &request, timeout, decode_search_response)
            .await
    }
}

/// [`ExtractService`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpExtractService {
    endpoint: JsonEndpoint,
}

impl HttpExtractService {
    /// Creates a client for `{base_url}/extract`.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        Ok(Self {
            endpoint: JsonEndpoint::new(base_url, api_key)?,
        })
    }
}

#[async_trait]
impl ExtractService for HttpExtractService {
    async fn extract(&self, request: ExtractRequest) -> Result<ExtractResponse> {
        let timeout = timeout_of(request.fetch_policy.as_ref());
        self.endpoint
            .post("extract", &request, timeout, decode_extract_response)
            .await
    }
}
