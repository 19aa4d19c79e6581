//! Domain normalization and source policies.
//!
//! Include/exclude lists accept whatever the caller has at hand (bare
//! domains, full URLs, mixed case) and are reduced to canonical host names
//! before being sent to the search service.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::errors::{PolicyLimitError, ResearchError, Result};
use crate::models::{Warning, WarningSource};

const MAX_HOST_LEN: usize = 253;

fn label_pattern() -> &'static Regex {
    static LABEL: OnceLock<Regex> = OnceLock::new();
    LABEL.get_or_init(|| {
        Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$").unwrap_or_else(|e| {
            unreachable!("label pattern is a valid regex: {e}")
        })
    })
}

/// Reduces a raw domain or URL to its canonical host name.
///
/// Strips the scheme, userinfo, port, path, query, fragment, trailing dot
/// and any leading `www.` labels, lowercases the result and checks every
/// label against the host-name grammar.
pub fn normalize_domain(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ResearchError::invalid_domain(raw, "empty input"));
    }

    let lowered = trimmed.to_lowercase();
    let without_scheme = match lowered.find("://") {
        Some(idx) => &lowered[idx + 3..],
        None => lowered.strip_prefix("//").unwrap_or(&lowered),
    };

    let authority_end = without_scheme
        .find(|c: char| matches!(c, '/' | '?' | '#'))
        .unwrap_or(without_scheme.len());
    let authority = &without_scheme[..authority_end];
    let host_port = authority.rsplit('@').next().unwrap_or(authority);

    let host = match host_port.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        Some(_) => return Err(ResearchError::invalid_domain(raw, "malformed port")),
        None => host_port,
    };

    let mut host = host.trim_end_matches('.');
    while let Some(rest) = host.strip_prefix("www.") {
        host = rest;
    }

    if host.is_empty() {
        return Err(ResearchError::invalid_domain(raw, "no host name"));
    }
    if host.len() > MAX_HOST_LEN {
        return Err(ResearchError::invalid_domain(raw, "host name too long"));
    }
    if let Some(bad) = host.split('.').find(|label| !label_pattern().is_match(label)) {
        let reason = if bad.is_empty() {
            "empty label".to_string()
        } else {
            format!("invalid label '{bad}'")
        };
        return Err(ResearchError::invalid_domain(raw, reason));
    }

    Ok(host.to_string())
}

/// Normalizes and deduplicates a domain list, keeping first-seen order.
///
/// Each collision produces a normalization warning. The limit applies to
/// the deduplicated list.
pub fn normalize_domain_list(
    field: &str,
    raw: &[String],
    max_domains: usize,
) -> Result<(Vec<String>, Vec<Warning>)> {
    let mut seen = HashSet::new();
    let mut domains = Vec::new();
    let mut warnings = Vec::new();

    for entry in raw {
        let domain = normalize_domain(entry)?;
        if seen.insert(domain.clone()) {
            domains.push(domain);
        } else {
            warnings.push(Warning::new(
                WarningSource::Normalization,
                format!("{field}: '{entry}' duplicates '{domain}' after normalization"),
            ));
        }
    }

    if domains.len() > max_domains {
        return Err(PolicyLimitError::new(field, max_domains, domains.len()).into());
    }

    Ok((domains, warnings))
}

/// Domain allow/deny rules and freshness constraints for a search call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePolicy {
    /// Only return results from these domains.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_domains: Vec<String>,
    /// Never return results from these domains.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_domains: Vec<String>,
    /// Only return content published on or after this date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_date: Option<NaiveDate>,
}

impl SourcePolicy {
    /// Creates an empty policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an include entry (raw, normalized later).
    #[must_use]
    pub fn include(mut self, domain: impl Into<String>) -> Self {
        self.include_domains.push(domain.into());
        self
    }

    /// Adds an exclude entry (raw, normalized later).
    #[must_use]
    pub fn exclude(mut self, domain: impl Into<String>) -> Self {
        self.exclude_domains.push(domain.into());
        self
    }

    /// Sets the freshness cutoff.
    #[must_use]
    pub fn after(mut self, date: NaiveDate) -> Self {
        self.after_date = Some(date);
        self
    }

    /// Returns true when the policy constrains nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.include_domains.is_empty() && self.exclude_domains.is_empty() && self.after_date.is_none()
    }

    /// Returns a canonical copy of this policy.
    ///
    /// Fails when an entry is malformed, when a list is too long after
    /// deduplication, or when a domain is both included and excluded.
    pub fn normalized(&self, max_domains: usize) -> Result<(Self, Vec<Warning>)> {
        let (include_domains, mut warnings) =
            normalize_domain_list("include_domains", &self.include_domains, max_domains)?;
        let (exclude_domains, exclude_warnings) =
            normalize_domain_list("exclude_domains", &self.exclude_domains, max_domains)?;
        warnings.extend(exclude_warnings);

        if let Some(both) = include_domains.iter().find(|d| exclude_domains.contains(d)) {
            return Err(ResearchError::invalid_request(format!(
                "domain '{both}' is both included and excluded"
            )));
        }

        let policy = Self {
            include_domains,
            exclude_domains,
            after_date: self.after_date,
        };
        Ok((policy, warnings))
    }
}
