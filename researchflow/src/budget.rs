//! Character budgets and their fair allocation across results.

use serde::{Deserialize, Serialize};

use crate::errors::{ResearchError, Result};

/// Character budget for one stage's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    /// Per-item cap.
    pub max_chars_per_item: usize,
    /// Cap across all items.
    pub max_chars_total: usize,
}

impl Budget {
    /// Creates a new budget.
    #[must_use]
    pub const fn new(max_chars_per_item: usize, max_chars_total: usize) -> Self {
        Self {
            max_chars_per_item,
            max_chars_total,
        }
    }

    /// Default budget for search excerpts.
    #[must_use]
    pub const fn search_default() -> Self {
        Self::new(2_000, 20_000)
    }

    /// Default budget for extracted content.
    #[must_use]
    pub const fn extract_default() -> Self {
        Self::new(10_000, 60_000)
    }

    /// Allocates this budget across `n` items.
    #[must_use]
    pub fn allocate(&self, n: usize) -> Vec<usize> {
        allocate(self.max_chars_total, n, Some(self.max_chars_per_item))
    }

    /// Validates the budget.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.max_chars_per_item == 0 || self.max_chars_total == 0 {
            return Err(ResearchError::invalid_request(format!(
                "{name}: budget values must be positive"
            )));
        }
        Ok(())
    }
}

/// Distributes `total` characters across `n` items.
///
/// Every item first receives `min(cap, total / n)`. The remainder is then
/// handed out one character at a time, round-robin from the first item,
/// to items still below the cap.
#[must_use]
pub fn allocate(total: usize, n: usize, cap: Option<usize>) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }

    let cap = cap.unwrap_or(usize::MAX);
    let share = (total / n).min(cap);
    let mut allocations = vec![share; n];
    let mut leftover = total - share * n;

    while leftover > 0 {
        let mut progressed = false;
        for slot in &mut allocations {
            if leftover == 0 {
                break;
            }
            if *slot < cap {
                *slot += 1;
                leftover -= 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    allocations
}

/// Truncates `text` to at most `limit` characters.
#[must_use]
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Keeps excerpts in order until `limit` characters are used.
///
/// The excerpt that crosses the limit is truncated, later ones are dropped,
/// and empty leftovers are never emitted.
#[must_use]
pub fn apply_to_excerpts(excerpts: &[String], limit: usize) -> Vec<String> {
    let mut remaining = limit;
    let mut kept = Vec::new();

    for excerpt in excerpts {
        if remaining == 0 {
            break;
        }
        let cut = truncate_chars(excerpt, remaining);
        if cut.is_empty() {
            continue;
        }
        remaining -= cut.chars().count();
        kept.push(cut.to_string());
    }

    kept
}

/// Number of characters in a list of excerpts.
#[must_use]
pub fn excerpt_chars(excerpts: &[String]) -> usize {
    excerpts.iter().map(|e| e.chars().count()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_empty() {
        assert!(allocate(100, 0, Some(10)).is_empty());
        assert!(Budget::new(5, 50).allocate(0).is_empty());
    }

    #[test]
    fn test_allocate_all_capped_when_budget_suffices() {
        let alloc = allocate(100, 4, Some(20));
        assert_eq!(alloc, vec![20, 20, 20, 20]);

        let alloc = allocate(80, 4, Some(20));
        assert_eq!(alloc, vec![20, 20, 20, 20]);
    }

    #[test]
    fn test_allocate_leftover_round_robin() {
        // 10 / 3 = 3, leftover 1 goes to the first item.
        assert_eq!(allocate(10, 3, None), vec![4, 3, 3]);
        assert_eq!(allocate(11, 3, None), vec![4, 4, 3]);
    }

    #[test]
    fn test_allocate_respects_cap_with_leftover() {
        let alloc = allocate(14, 3, Some(5));
        assert_eq!(alloc, vec![5, 5, 4]);
        assert!(alloc.iter().all(|&a| a <= 5));
    }

    #[test]
    fn test_allocate_sum_never_exceeds_total() {
        for total in [0usize, 1, 7, 99, 1000] {
            for n in 1..12 {
                for cap in [None, Some(0), Some(3), Some(50)] {
                    let alloc = allocate(total, n, cap);
                    assert_eq!(alloc.len(), n);
                    assert!(alloc.iter().sum::<usize>() <= total);
                    if let Some(c) = cap {
                        assert!(alloc.iter().all(|&a| a <= c));
                        if n * c <= total {
                            assert!(alloc.iter().all(|&a| a == c));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_allocate_deterministic() {
        assert_eq!(allocate(1234, 7, Some(300)), allocate(1234, 7, Some(300)));
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn test_apply_to_excerpts() {
        let excerpts = vec!["abcd".to_string(), "efgh".to_string(), "ij".to_string()];
        assert_eq!(apply_to_excerpts(&excerpts, 6), vec!["abcd", "ef"]);
        assert_eq!(apply_to_excerpts(&excerpts, 100), excerpts);
        assert!(apply_to_excerpts(&excerpts, 0).is_empty());
    }

    #[test]
    fn test_apply_to_excerpts_skips_empty() {
        let excerpts = vec![String::new(), "abc".to_string()];
        assert_eq!(apply_to_excerpts(&excerpts, 2), vec!["ab"]);
    }

    #[test]
    fn test_budget_validate() {
        assert!(Budget::search_default().validate("search").is_ok());
        assert!(Budget::new(0, 10).validate("search").is_err());
    }
}
