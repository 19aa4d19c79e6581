//! Service traits for the remote search and extract endpoints.
//!
//! The orchestrator only talks to these traits, so the HTTP adapter, the
//! scripted fakes in [`crate::testing`] and the generated mocks are
//! interchangeable.

use async_trait::async_trait;

use crate::errors::Result;
use crate::models::{ExtractRequest, ExtractResponse, SearchRequest, SearchResponse};

/// Protocol for the web search service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchService: Send + Sync {
    /// Runs one search call.
    ///
    /// Fails with `Transport` on network errors or timeouts and with
    /// `Service` when the endpoint answers with a non-success status.
    async fn search(&self, request: SearchRequest) -> Result<SearchResponse>;
}

/// Protocol for the page extraction service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExtractService: Send + Sync {
    /// Extracts one batch of URLs.
    ///
    /// Per-URL failures are reported in the response; an `Err` means the
    /// call itself failed.
    async fn extract(&self, request: ExtractRequest) -> Result<ExtractResponse>;
}
