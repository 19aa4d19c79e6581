//! Splits the URL selection into bounded extract batches.

use std::collections::HashMap;

use crate::errors::{ResearchError, Result};

/// A bounded group of URLs sent in one extract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Zero-based batch index.
    pub index: usize,
    /// URLs in selection order.
    pub urls: Vec<String>,
}

impl Batch {
    /// Number of URLs in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Ordered batches plus the map back to selection positions.
#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    /// Batches in selection order.
    pub batches: Vec<Batch>,
    unique_urls: Vec<String>,
    positions: HashMap<String, Vec<usize>>,
}

impl BatchPlan {
    /// Distinct URLs in first-seen order.
    #[must_use]
    pub fn unique_urls(&self) -> &[String] {
        &self.unique_urls
    }

    /// Every selection position that references `url`.
    #[must_use]
    pub fn positions_of(&self, url: &str) -> &[usize] {
        self.positions.get(url).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether there is nothing to extract.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Plans extract batches for a URL selection.
///
/// Repeated URLs are extracted once. Batches preserve first-seen order and
/// hold at most `cap` URLs each; only the last one may be smaller.
pub fn plan_batches(selection: &[String], cap: usize) -> Result<BatchPlan> {
    if cap == 0 {
        return Err(ResearchError::invalid_request("batch cap must be at least 1"));
    }

    let mut unique_urls: Vec<String> = Vec::new();
    let mut positions: HashMap<String, Vec<usize>> = HashMap::new();
    for (position, url) in selection.iter().enumerate() {
        let entry = positions.entry(url.clone()).or_default();
        if entry.is_empty() {
            unique_urls.push(url.clone());
        }
        entry.push(position);
    }

    if !selection.is_empty() && unique_urls.is_empty() {
        return Err(ResearchError::EmptyInput(format!(
            "{} selected URLs produced no batches",
            selection.len()
        )));
    }

    let batches = unique_urls
        .chunks(cap)
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            urls: chunk.to_vec(),
        })
        .collect();

    Ok(BatchPlan {
        batches,
        unique_urls,
        positions,
    })
}
