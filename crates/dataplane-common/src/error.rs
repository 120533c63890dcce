//! Error types for dataplane configuration sync.
//!
//! All fallible operations in the workspace return [`DataplaneResult`].
//! The remote API reports failures as `{code, message}` bodies; the only way
//! to tell a recoverable transaction conflict from a real failure is the code
//! plus a message substring, which is what [`ApiError::classify`] does.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for dataplane operations.
pub type DataplaneResult<T> = Result<T, DataplaneError>;

/// Transaction-protocol conflicts the coordinator is allowed to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    /// The transaction expired or was invalidated between creation and use.
    TransactionNotFound,
    /// The request carried neither a version nor a transaction id.
    VersionOrTransactionNotSpecified,
    /// Another actor committed first; the version no longer matches.
    VersionMismatch,
    /// The transaction was opened against a version that has moved on.
    TransactionOutdated,
}

impl ConflictKind {
    /// Returns a stable name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::TransactionNotFound => "transaction-not-found",
            ConflictKind::VersionOrTransactionNotSpecified => "version-or-transaction-not-specified",
            ConflictKind::VersionMismatch => "version-mismatch",
            ConflictKind::TransactionOutdated => "transaction-outdated",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error body returned by the remote configuration API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code (mirrors the HTTP status in practice).
    pub code: u16,
    /// Human readable message.
    pub message: String,
}

impl ApiError {
    /// Creates a new API error body.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Parses an error body, falling back to the raw text when the body is
    /// not the documented JSON shape.
    pub fn from_body(status: u16, body: &str) -> Self {
        serde_json::from_str::<ApiError>(body)
            .unwrap_or_else(|_| ApiError::new(status, body.trim()))
    }

    /// Matches this error against the recoverable conflict signatures.
    pub fn classify(&self) -> Option<ConflictKind> {
        let message = self.message.to_ascii_lowercase();
        match self.code {
            404 if message.contains("transaction") && message.contains("not found") => {
                Some(ConflictKind::TransactionNotFound)
            }
            400 if message.contains("version or transaction not specified") => {
                Some(ConflictKind::VersionOrTransactionNotSpecified)
            }
            409 if message.contains("version mismatch") => Some(ConflictKind::VersionMismatch),
            406 if message.contains("outdated and cannot be committed") => {
                Some(ConflictKind::TransactionOutdated)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Errors that can occur while syncing configuration.
#[derive(Debug, Clone, Error)]
pub enum DataplaneError {
    /// Recoverable transaction conflict; the coordinator retries the cycle.
    #[error("Transaction conflict ({kind}): {message}")]
    Conflict {
        /// Which conflict signature matched.
        kind: ConflictKind,
        /// Message reported by the remote.
        message: String,
    },

    /// The addressed item or parent does not exist.
    #[error("Not found: {message}")]
    NotFound {
        /// Message reported by the remote.
        message: String,
    },

    /// The remote rejected the payload, or local configuration is invalid.
    #[error("Validation failed: {message}")]
    Validation {
        /// Message, surfaced verbatim.
        message: String,
    },

    /// Network failure, timeout or any other HTTP-level error.
    #[error("Transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// HTTP status, when a response was received.
        status: Option<u16>,
    },

    /// A reconciliation invariant was violated by the caller's input.
    #[error("Plan conflict: {message}")]
    PlanConflict {
        /// Error message.
        message: String,
    },

    /// Recoverable conflicts persisted past the attempt limit.
    #[error("Gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Number of full cycles performed.
        attempts: u32,
        /// The last conflict seen.
        #[source]
        last: Box<DataplaneError>,
    },

    /// The caller cancelled the run; nothing was committed.
    #[error("Cancelled before commit")]
    Cancelled,
}

impl DataplaneError {
    /// Creates a conflict error.
    pub fn conflict(kind: ConflictKind, message: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a transport error without an HTTP status.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
        }
    }

    /// Creates a transport error for a call that did not finish in time.
    pub fn timeout(operation: &str, limit: Duration) -> Self {
        Self::transport(format!("{} timed out after {:?}", operation, limit))
    }

    /// Creates a plan conflict error.
    pub fn plan_conflict(message: impl Into<String>) -> Self {
        Self::PlanConflict {
            message: message.into(),
        }
    }

    /// Maps an API error body to the matching variant.
    pub fn from_api(err: ApiError) -> Self {
        if let Some(kind) = err.classify() {
            return Self::conflict(kind, err.message);
        }
        match err.code {
            404 => Self::not_found(err.message),
            400 | 422 => Self::validation(err.message),
            code => Self::Transport {
                message: err.to_string(),
                status: Some(code),
            },
        }
    }

    /// Returns true if the coordinator may retry the whole cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DataplaneError::Conflict { .. })
    }

    /// Returns true if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DataplaneError::NotFound { .. })
    }

    /// Returns the conflict signature, if any.
    pub fn conflict_kind(&self) -> Option<ConflictKind> {
        match self {
            DataplaneError::Conflict { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<ApiError> for DataplaneError {
    fn from(err: ApiError) -> Self {
        DataplaneError::from_api(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify_conflict_signatures() {
        let cases = [
            (404, "transaction 1f2e not found", ConflictKind::TransactionNotFound),
            (
                400,
                "version or transaction not specified",
                ConflictKind::VersionOrTransactionNotSpecified,
            ),
            (409, "Version mismatch: 7 != 8", ConflictKind::VersionMismatch),
            (
                406,
                "transaction 1f2e is outdated and cannot be committed",
                ConflictKind::TransactionOutdated,
            ),
        ];

        for (code, message, expected) in cases {
            assert_eq!(ApiError::new(code, message).classify(), Some(expected));
        }
    }

    #[test]
    fn test_classify_requires_code_and_message() {
        // right message, wrong code
        assert_eq!(ApiError::new(500, "version mismatch").classify(), None);
        // right code, unrelated message
        assert_eq!(ApiError::new(404, "backend web not found").classify(), None);
        assert_eq!(ApiError::new(409, "object already exists").classify(), None);
    }

    #[test]
    fn test_from_api_mapping() {
        let err = DataplaneError::from_api(ApiError::new(
            406,
            "transaction abc is outdated and cannot be committed",
        ));
        assert!(err.is_recoverable());
        assert_eq!(err.conflict_kind(), Some(ConflictKind::TransactionOutdated));

        assert!(DataplaneError::from_api(ApiError::new(404, "acl 3 not found")).is_not_found());
        assert!(matches!(
            DataplaneError::from_api(ApiError::new(422, "invalid criterion")),
            DataplaneError::Validation { .. }
        ));
        assert!(matches!(
            DataplaneError::from_api(ApiError::new(503, "unavailable")),
            DataplaneError::Transport {
                status: Some(503),
                ..
            }
        ));
    }

    #[test]
    fn test_api_error_from_body() {
        let parsed = ApiError::from_body(409, r#"{"code":409,"message":"version mismatch"}"#);
        assert_eq!(parsed, ApiError::new(409, "version mismatch"));

        let raw = ApiError::from_body(502, "Bad Gateway\n");
        assert_eq!(raw, ApiError::new(502, "Bad Gateway"));
    }

    #[test]
    fn test_error_display() {
        let err = DataplaneError::RetryExhausted {
            attempts: 3,
            last: Box::new(DataplaneError::conflict(
                ConflictKind::VersionMismatch,
                "version mismatch",
            )),
        };
        assert_eq!(
            err.to_string(),
            "Gave up after 3 attempts: Transaction conflict (version-mismatch): version mismatch"
        );
        assert!(!err.is_recoverable());
    }
}
