//! Testing utilities for research pipelines.
//!
//! This module provides:
//! - Scripted search and extract services with call recording
//! - Fixtures for hits, requests and fast-retry configuration

mod fixtures;
mod mocks;

pub use fixtures::{fast_config, fast_retry, hit_url, request, search_hits};
pub use mocks::{ScriptedExtractService, ScriptedSearchService};
