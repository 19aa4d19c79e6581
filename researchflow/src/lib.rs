//! # Researchflow
//!
//! A batched, budget-aware search and extraction pipeline.
//!
//! A run takes a research objective and a few keyword queries, searches once,
//! selects the top results and extracts their content in parallel batches.
//! Researchflow provides:
//!
//! - **Domain normalization**: Clean include/exclude lists before they reach a service
//! - **Character budgets**: Fair allocation of excerpt and content budgets across results
//! - **Batched extraction**: Bounded batches run concurrently with retries and timeouts
//! - **Deterministic aggregation**: Results in selection order, one outcome per URL
//! - **Cancellation**: Cooperative cancellation that keeps completed work
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use researchflow::prelude::*;
//! use std::sync::Arc;
//!
//! let search = Arc::new(HttpSearchService::new("https://api.example.com", &key)?);
//! let extract = Arc::new(HttpExtractService::new("https://api.example.com", &key)?);
//! let orchestrator = Orchestrator::new(PipelineConfig::default(), search, extract)?;
//!
//! let request = RunRequest::new("How do async runtimes schedule tasks?", ["tokio scheduler"])
//!     .with_top_n(5);
//! let run = orchestrator.run(request).await?;
//! println!("{}", run.to_json()?);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod aggregator;
pub mod budget;
pub mod cancellation;
pub mod config;
pub mod domain;
pub mod errors;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod rate_limit;
pub mod retry;
pub mod run;
pub mod services;
pub mod stages;
pub mod testing;

#[cfg(feature = "http")]
pub mod http;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::budget::Budget;
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{FetchPolicy, Limits, PipelineConfig, RateLimitConfig};
    pub use crate::domain::{normalize_domain, SourcePolicy};
    pub use crate::errors::{ErrorKind, ExitStatus, ResearchError, Result};
    pub use crate::models::{
        ExtractOptions, ExtractRequest, ExtractResponse, SearchHit, SearchRequest,
        SearchResponse, SearchResult, UrlError, Usage, Warning, WarningSource,
    };
    pub use crate::observability::{
        init_tracing, LogFormat, LoggingRunObserver, NoOpRunObserver, RunObserver,
    };
    pub use crate::orchestrator::Orchestrator;
    pub use crate::rate_limit::RateLimiter;
    pub use crate::retry::{BackoffStrategy, JitterStrategy, RetryConfig};
    pub use crate::run::{PipelineRun, ResearchItem, RunRequest, RunState, RunStatus};
    pub use crate::services::{ExtractService, SearchService};

    #[cfg(feature = "http")]
    pub use crate::http::{HttpExtractService, HttpSearchService};
}
