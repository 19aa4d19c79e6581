//! Error types for the research pipeline.
//!
//! Errors are split by when they can happen: contract violations are raised
//! before any network call, stage failures come back from the remote
//! services, and per-URL failures never surface as an error value at all
//! (they are recorded in the run's `errors` partition).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T, E = ResearchError> = std::result::Result<T, E>;

/// The main error type for pipeline operations.
#[derive(Debug, Clone, Error)]
pub enum ResearchError {
    /// Caller arguments violate the request contract.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A domain or URL could not be normalized.
    #[error("Invalid domain '{input}': {reason}")]
    InvalidDomain {
        /// The raw input as given by the caller.
        input: String,
        /// Why the input was rejected.
        reason: String,
    },

    /// A list or similar cardinality limit was exceeded.
    #[error("{0}")]
    PolicyLimitExceeded(#[from] PolicyLimitError),

    /// Network failure or timeout talking to a remote service.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote service answered with a non-success status.
    #[error("Service error (status {status}): {body}")]
    Service {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// A non-empty URL selection produced no batches.
    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// The run was cancelled.
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An internal invariant was violated.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResearchError {
    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Creates an invalid domain error.
    pub fn invalid_domain(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDomain {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a service error.
    pub fn service(status: u16, body: impl Into<String>) -> Self {
        Self::Service {
            status,
            body: body.into(),
        }
    }

    /// Returns the kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::InvalidDomain { .. } => ErrorKind::InvalidDomain,
            Self::PolicyLimitExceeded(_) => ErrorKind::PolicyLimitExceeded,
            Self::Transport(_) => ErrorKind::TransportError,
            Self::Service { .. } => ErrorKind::ServiceError,
            Self::EmptyInput(_) => ErrorKind::EmptyInput,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true for errors raised before any I/O is attempted.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_) | Self::InvalidDomain { .. } | Self::PolicyLimitExceeded(_)
        )
    }

    /// HTTP status attached to the error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Service { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Maps the error to the process-style exit status.
    #[must_use]
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Self::InvalidRequest(_) | Self::InvalidDomain { .. } | Self::PolicyLimitExceeded(_) => {
                ExitStatus::InvalidArguments
            }
            Self::Transport(_) | Self::Service { .. } => ExitStatus::ServiceError,
            Self::EmptyInput(_)
            | Self::Cancelled(_)
            | Self::Serialization(_)
            | Self::Internal(_) => ExitStatus::UnexpectedError,
        }
    }
}

impl From<serde_json::Error> for ResearchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Raised when a policy list exceeds its allowed size.
#[derive(Debug, Clone, Error)]
#[error("Policy limit exceeded: '{field}' has {actual} entries, at most {limit} allowed")]
pub struct PolicyLimitError {
    /// Name of the offending field.
    pub field: String,
    /// Allowed maximum.
    pub limit: usize,
    /// Actual size after normalization.
    pub actual: usize,
}

impl PolicyLimitError {
    /// Creates a new policy limit error.
    #[must_use]
    pub fn new(field: impl Into<String>, limit: usize, actual: usize) -> Self {
        Self {
            field: field.into(),
            limit,
            actual,
        }
    }
}

/// Serializable classification of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Caller arguments violate the contract.
    InvalidRequest,
    /// A domain could not be normalized.
    InvalidDomain,
    /// A cardinality limit was exceeded.
    PolicyLimitExceeded,
    /// Network failure or timeout.
    TransportError,
    /// Non-success status from a remote service.
    ServiceError,
    /// The service omitted a requested URL from its response.
    MissingResult,
    /// The service reported success but returned no content.
    EmptyContent,
    /// The service reported the URL as unreadable.
    Unreadable,
    /// A selection yielded no batches.
    EmptyInput,
    /// The run was cancelled.
    Cancelled,
    /// A payload could not be encoded or decoded.
    Serialization,
    /// Internal invariant violation.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidRequest => "InvalidRequest",
            Self::InvalidDomain => "InvalidDomain",
            Self::PolicyLimitExceeded => "PolicyLimitExceeded",
            Self::TransportError => "TransportError",
            Self::ServiceError => "ServiceError",
            Self::MissingResult => "MissingResult",
            Self::EmptyContent => "EmptyContent",
            Self::Unreadable => "Unreadable",
            Self::EmptyInput => "EmptyInput",
            Self::Cancelled => "Cancelled",
            Self::Serialization => "Serialization",
            Self::Internal => "Internal",
        };
        f.write_str(name)
    }
}

/// Process-style status for thin wrapper callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitStatus {
    /// The pipeline ran (possibly with per-URL failures).
    Ok,
    /// Something unexpected went wrong.
    UnexpectedError,
    /// The caller's arguments were rejected.
    InvalidArguments,
    /// A remote service failed the run.
    ServiceError,
}

impl ExitStatus {
    /// Numeric process exit code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::UnexpectedError => 1,
            Self::InvalidArguments => 2,
            Self::ServiceError => 3,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::UnexpectedError => write!(f, "unexpected_error"),
            Self::InvalidArguments => write!(f, "invalid_arguments"),
            Self::ServiceError => write!(f, "service_error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ResearchError::service(503, "unavailable");
        assert_eq!(err.to_string(), "Service error (status 503): unavailable");

        let err = ResearchError::invalid_domain("bad..com", "empty label");
        assert_eq!(err.to_string(), "Invalid domain 'bad..com': empty label");
    }

    #[test]
    fn test_policy_limit_from() {
        let err: ResearchError = PolicyLimitError::new("include_domains", 10, 11).into();
        assert_eq!(err.kind(), ErrorKind::PolicyLimitExceeded);
        assert!(err.is_contract_violation());
        assert!(err.to_string().contains("include_domains"));
    }

    #[test]
    fn test_exit_status_mapping() {
        assert_eq!(
            ResearchError::invalid_request("x").exit_status(),
            ExitStatus::InvalidArguments
        );
        assert_eq!(
            ResearchError::transport("timeout").exit_status(),
            ExitStatus::ServiceError
        );
        assert_eq!(
            ResearchError::service(500, "").exit_status(),
            ExitStatus::ServiceError
        );
        assert_eq!(
            ResearchError::Internal("x".into()).exit_status(),
            ExitStatus::UnexpectedError
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitStatus::Ok.code(), 0);
        assert_eq!(ExitStatus::UnexpectedError.code(), 1);
        assert_eq!(ExitStatus::InvalidArguments.code(), 2);
        assert_eq!(ExitStatus::ServiceError.code(), 3);
    }

    #[test]
    fn test_status_accessor() {
        assert_eq!(ResearchError::service(429, "slow down").status(), Some(429));
        assert_eq!(ResearchError::transport("reset").status(), None);
    }

    #[test]
    fn test_error_kind_serialize() {
        let json = serde_json::to_string(&ErrorKind::TransportError).unwrap();
        assert_eq!(json, r#""TransportError""#);
    }
}
