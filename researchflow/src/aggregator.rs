//! Merges search metadata with extracted content.
//!
//! Output order is the selection order: each selected position owns one
//! slot, and batch outcomes are written into slots regardless of the order
//! in which batches finished.

use std::collections::HashMap;

use crate::budget::{apply_to_excerpts, excerpt_chars, truncate_chars, Budget};
use crate::errors::ErrorKind;
use crate::models::{ExtractResult, SearchResult, UrlError, Warning, WarningSource};
use crate::run::{ExtractedContent, ResearchItem};
use crate::stages::{BatchOutcome, BatchPlan};

/// The three disjoint partitions of a finished run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    /// One item per selected position.
    pub results: Vec<ResearchItem>,
    /// One entry per failed unique URL.
    pub errors: Vec<UrlError>,
    /// Warnings from every batch, in batch order.
    pub warnings: Vec<Warning>,
    /// Unique URLs that have neither content nor an error.
    pub unresolved: usize,
}

/// Builds the final partitions.
///
/// `selected` is the prefix of the search results chosen for extraction,
/// `plan` the batch plan built from it and `outcomes` whatever batches ran.
/// The extract budget is shared across the extracted unique URLs in
/// selection order: excerpts are budgeted first, then full content gets what
/// is left of each share. A repeated URL reuses its single share. A URL whose
/// share leaves no content is recorded as `EmptyContent`.
pub fn aggregate(
    selected: &[SearchResult],
    plan: &BatchPlan,
    outcomes: Vec<BatchOutcome>,
    budget: Budget,
) -> Aggregation {
    let mut outcomes = outcomes;
    outcomes.sort_by_key(|o| o.index);

    let mut extracted: HashMap<String, ExtractResult> = HashMap::new();
    let mut failed: HashMap<String, UrlError> = HashMap::new();
    let mut warnings = Vec::new();
    for outcome in outcomes {
        for result in outcome.results {
            extracted.entry(result.url.clone()).or_insert(result);
        }
        for error in outcome.errors {
            failed.entry(error.url.clone()).or_insert(error);
        }
        warnings.extend(outcome.warnings);
    }

    let ok_urls: Vec<&String> = plan
        .unique_urls()
        .iter()
        .filter(|url| extracted.contains_key(url.as_str()))
        .collect();
    let allocations = budget.allocate(ok_urls.len());

    let mut contents: HashMap<&str, (ExtractedContent, &ExtractResult)> = HashMap::new();
    for (url, limit) in ok_urls.into_iter().zip(allocations) {
        let Some(result) = extracted.get(url.as_str()) else {
            continue;
        };

        let excerpts = apply_to_excerpts(&result.excerpts, limit);
        let remaining = limit.saturating_sub(excerpt_chars(&excerpts));
        let full_content = result
            .full_content
            .as_deref()
            .map(|content| truncate_chars(content, remaining).to_string())
            .filter(|content| !content.is_empty());

        if excerpts.is_empty() && full_content.is_none() {
            tracing::warn!(url = %url, limit, "Extract budget left no room for content");
            warnings.push(
                Warning::new(WarningSource::Pipeline, "extract budget left no room for content")
                    .with_url(url.clone()),
            );
            failed.insert(
                url.clone(),
                UrlError::new(
                    url.clone(),
                    ErrorKind::EmptyContent,
                    format!("extract budget of {limit} chars left no content"),
                ),
            );
            continue;
        }
        contents.insert(
            url.as_str(),
            (
                ExtractedContent {
                    excerpts,
                    full_content,
                },
                result,
            ),
        );
    }

    let results: Vec<ResearchItem> = selected
        .iter()
        .enumerate()
        .map(|(position, search)| {
            let mut item = ResearchItem::from_search(position, search);
            if let Some((content, result)) = contents.get(item.url.as_str()) {
                if item.title.is_empty() {
                    item.title.clone_from(&result.title);
                }
                if item.publish_date.is_none() {
                    item.publish_date.clone_from(&result.publish_date);
                }
                item.extraction = Some(content.clone());
            }
            item
        })
        .collect();

    let mut errors = Vec::new();
    let mut unresolved = 0;
    for url in plan.unique_urls() {
        if contents.contains_key(url.as_str()) {
            continue;
        }
        match failed.remove(url) {
            Some(mut error) => {
                error.positions = plan.positions_of(url).to_vec();
                errors.push(error);
            }
            None => unresolved += 1,
        }
    }

    Aggregation {
        results,
        errors,
        warnings,
        unresolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractedPage, SearchHit};
    use crate::stages::plan_batches;
    use pretty_assertions::assert_eq;

    fn selected(names: &[&str]) -> Vec<SearchResult> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| {
                SearchResult::from_hit(
                    SearchHit::new(format!("https://{n}.com"), format!("Title {n}")),
                    i + 1,
                )
            })
            .collect()
    }

    fn ok(name: &str, excerpt: &str) -> ExtractResult {
        ExtractResult::ok(ExtractedPage::with_excerpts(
            format!("https://{name}.com"),
            vec![excerpt.to_string()],
        ))
    }

    fn plan_for(selected: &[SearchResult], cap: usize) -> BatchPlan {
        let urls: Vec<String> = selected.iter().map(|r| r.url.clone()).collect();
        plan_batches(&urls, cap).unwrap()
    }

    #[test]
    fn test_slots_follow_selection_not_completion() {
        let selected = selected(&["a", "b", "c"]);
        let plan = plan_for(&selected, 2);
        let outcomes = vec![
            BatchOutcome {
                index: 1,
                results: vec![ok("c", "cc")],
                ..Default::default()
            },
            BatchOutcome {
                index: 0,
                results: vec![ok("b", "bb"), ok("a", "aa")],
                ..Default::default()
            },
        ];

        let agg = aggregate(&selected, &plan, outcomes, Budget::extract_default());

        let urls: Vec<&str> = agg.results.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.com", "https://b.com", "https://c.com"]);
        let ranks: Vec<usize> = agg.results.iter().map(|i| i.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        assert!(agg.results.iter().all(ResearchItem::is_extracted));
        assert!(agg.errors.is_empty());
        assert_eq!(agg.unresolved, 0);
    }

    #[test]
    fn test_failed_url_keeps_search_entry_only() {
        let selected = selected(&["a"]);
        let plan = plan_for(&selected, 10);
        let outcomes = vec![BatchOutcome {
            index: 0,
            errors: vec![UrlError::new("https://a.com", ErrorKind::TransportError, "timed out")],
            ..Default::default()
        }];

        let agg = aggregate(&selected, &plan, outcomes, Budget::extract_default());

        assert_eq!(agg.results.len(), 1);
        assert_eq!(agg.results[0].title, "Title a");
        assert!(agg.results[0].extraction.is_none());
        assert_eq!(agg.errors.len(), 1);
        assert_eq!(agg.errors[0].kind, ErrorKind::TransportError);
        assert_eq!(agg.errors[0].positions, vec![0]);
    }

    #[test]
    fn test_duplicate_url_fans_out() {
        let mut selected = selected(&["a", "b"]);
        let mut dup = selected[0].clone();
        dup.rank = 3;
        selected.push(dup);
        let plan = plan_for(&selected, 10);
        let outcomes = vec![BatchOutcome {
            index: 0,
            results: vec![ok("a", "aa")],
            errors: vec![UrlError::new("https://b.com", ErrorKind::MissingResult, "gone")],
            ..Default::default()
        }];

        let agg = aggregate(&selected, &plan, outcomes, Budget::extract_default());

        assert!(agg.results[0].is_extracted());
        assert!(!agg.results[1].is_extracted());
        assert!(agg.results[2].is_extracted());
        assert_eq!(agg.errors.len(), 1);
        assert_eq!(agg.errors[0].positions, vec![1]);
    }

    #[test]
    fn test_budget_excerpts_then_full_content() {
        let selected = selected(&["a", "b"]);
        let plan = plan_for(&selected, 10);
        let mut with_full = ok("a", "12345");
        with_full.full_content = Some("abcdefghij".into());
        let outcomes = vec![BatchOutcome {
            index: 0,
            results: vec![with_full, ok("b", &"x".repeat(20))],
            ..Default::default()
        }];

        let agg = aggregate(&selected, &plan, outcomes, Budget::new(8, 16));

        let a = agg.results[0].extraction.as_ref().unwrap();
        assert_eq!(a.excerpts, vec!["12345".to_string()]);
        assert_eq!(a.full_content.as_deref(), Some("abc"));
        let b = agg.results[1].extraction.as_ref().unwrap();
        assert_eq!(b.excerpts, vec!["x".repeat(8)]);
        assert!(b.full_content.is_none());
    }

    #[test]
    fn test_starved_budget_becomes_empty_content() {
        let selected = selected(&["a", "b", "a"]);
        let plan = plan_for(&selected, 10);
        let outcomes = vec![BatchOutcome {
            index: 0,
            results: vec![ok("a", "aaaa"), ok("b", "bbbb")],
            ..Default::default()
        }];

        let agg = aggregate(&selected, &plan, outcomes, Budget::new(10, 1));

        let a = agg.results[0].extraction.as_ref().unwrap();
        assert_eq!(a.excerpts, vec!["a".to_string()]);
        assert_eq!(agg.results[2].extraction, agg.results[0].extraction);
        assert!(agg.results[1].extraction.is_none());
        assert_eq!(agg.errors.len(), 1);
        assert_eq!(agg.errors[0].url, "https://b.com");
        assert_eq!(agg.errors[0].kind, ErrorKind::EmptyContent);
        assert_eq!(agg.errors[0].positions, vec![1]);
        assert!(agg
            .results
            .iter()
            .filter_map(|i| i.extraction.as_ref())
            .all(|e| !e.excerpts.is_empty() || e.full_content.is_some()));
        assert!(agg.warnings.iter().any(|w| w.source == WarningSource::Pipeline));
    }

    #[test]
    fn test_unresolved_urls_counted() {
        let selected = selected(&["a", "b", "c"]);
        let plan = plan_for(&selected, 1);
        let outcomes = vec![BatchOutcome {
            index: 0,
            results: vec![ok("a", "aa")],
            ..Default::default()
        }];

        let agg = aggregate(&selected, &plan, outcomes, Budget::extract_default());
        assert_eq!(agg.unresolved, 2);
        assert_eq!(agg.results.iter().filter(|i| i.is_extracted()).count(), 1);
    }

    #[test]
    fn test_empty_selection() {
        let agg = aggregate(&[], &BatchPlan::default(), Vec::new(), Budget::extract_default());
        assert!(agg.results.is_empty());
        assert!(agg.errors.is_empty());
    }
}
