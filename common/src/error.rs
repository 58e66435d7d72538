//! Error types shared across the workspace
//!
//! Two layers: `ServiceError` is what an external call (data fetch, inference)
//! fails with, and `ErrorInfo` is the serializable payload that replaces a
//! result when the failure is absorbed into pipeline data.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure of an external collaborator call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("no {what} available for {symbol}")]
    NotFound { symbol: String, what: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        last: Box<ServiceError>,
    },
}

impl ServiceError {
    /// Status code used for retry classification
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ServiceError::Status { status, .. } => Some(*status),
            ServiceError::RetryExhausted { last, .. } => last.status_code(),
            _ => None,
        }
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, ServiceError::RetryExhausted { .. })
    }
}

/// Error taxonomy for payloads stored as data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Source fetch returned empty, missing or failed
    DataUnavailable,
    /// Zero denominator, insufficient observations, missing line item
    Computation,
    /// An upstream stage's output was itself an error
    Upstream,
    /// External inference collaborator failed
    External,
    /// A stage failed or panicked and was isolated by the controller
    StageFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DataUnavailable => "data_unavailable",
            ErrorKind::Computation => "computation",
            ErrorKind::Upstream => "upstream",
            ErrorKind::External => "external",
            ErrorKind::StageFailure => "stage_failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload that stands in for a result
///
/// Serializes with a designated `error` field so consumers can detect it
/// without knowing the shape of the successful payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    #[serde(rename = "error")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn data_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DataUnavailable, message)
    }

    pub fn computation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Computation, message)
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::External, message)
    }

    pub fn stage_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StageFailure, message)
    }

    /// Error that references a failed upstream payload
    pub fn upstream(key: &str, cause: &ErrorInfo) -> Self {
        Self {
            kind: ErrorKind::Upstream,
            message: format!("upstream '{}' failed: {}", key, cause.message),
            details: serde_json::to_value(cause).ok(),
        }
    }

    /// Absorb a failed fetch into a data-unavailable payload
    pub fn from_service(context: impl fmt::Display, err: &ServiceError) -> Self {
        let mut info = Self::data_unavailable(format!("{}: {}", context, err));
        if let ServiceError::RetryExhausted { attempts, .. } = err {
            info.details = Some(serde_json::json!({ "retry_exhausted": true, "attempts": attempts }));
        }
        info
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Serialize a `Result<T, ErrorInfo>` as either the bare value or the error payload
///
/// Use with `#[serde(serialize_with = "common::outcome::serialize")]`.
pub mod outcome {
    use super::ErrorInfo;
    use serde::{Serialize, Serializer};

    pub fn serialize<T, S>(
        value: &std::result::Result<T, ErrorInfo>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Ok(v) => v.serialize(serializer),
            Err(e) => e.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_info_has_error_field() {
        let info = ErrorInfo::computation("Equity is zero, cannot compute D/E");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["error"], "Equity is zero, cannot compute D/E");
        assert_eq!(json["kind"], "computation");
        assert!(json.get("details").is_none());
    }

    #[test]
    fn test_status_code_through_exhaustion() {
        let err = ServiceError::RetryExhausted {
            attempts: 5,
            last: Box::new(ServiceError::Status {
                status: 503,
                message: "unavailable".to_string(),
            }),
        };
        assert_eq!(err.status_code(), Some(503));
        assert!(err.is_retry_exhausted());

        let info = ErrorInfo::from_service("prices for CAT", &err);
        assert_eq!(info.kind, ErrorKind::DataUnavailable);
        assert_eq!(info.details.unwrap()["attempts"], 5);
    }

    #[test]
    fn test_upstream_keeps_cause() {
        let cause = ErrorInfo::data_unavailable("no symbols");
        let err = ErrorInfo::upstream("universe_definition", &cause);
        assert_eq!(err.kind, ErrorKind::Upstream);
        assert!(err.message.contains("universe_definition"));
        assert_eq!(err.details.unwrap()["error"], "no symbols");
    }
}
