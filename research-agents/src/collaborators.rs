//! External collaborators consumed by stages
//!
//! Sentiment scoring and synthesis are opaque to the pipeline: it hands them
//! tickers or the session state and stores whatever document comes back.

use crate::session::SessionState;
use async_trait::async_trait;
use common::{ErrorInfo, ServiceError};

/// Produces a market sentiment document for a set of tickers
#[async_trait]
pub trait SentimentProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, tickers: &[String]) -> Result<serde_json::Value, ServiceError>;
}

/// Consumes the session state and produces the allocation document
#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(&self, state: &SessionState) -> Result<serde_json::Value, ServiceError>;
}

/// Error payload for a failed collaborator call
pub fn external_error(collaborator: &str, err: &ServiceError) -> ErrorInfo {
    let info = ErrorInfo::external(format!("{} call failed: {}", collaborator, err));
    match err {
        ServiceError::RetryExhausted { attempts, .. } => info.with_details(serde_json::json!({
            "collaborator": collaborator,
            "retry_exhausted": true,
            "attempts": attempts,
        })),
        _ => info.with_details(serde_json::json!({ "collaborator": collaborator })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ErrorKind;

    #[test]
    fn test_external_error_marks_exhausted_retries() {
        let err = ServiceError::Status {
            status: 503,
            message: "busy".to_string(),
        };
        let exhausted = ServiceError::RetryExhausted {
            attempts: 5,
            last: Box::new(err.clone()),
        };

        let info = external_error("sentiment", &exhausted);
        assert_eq!(info.kind, ErrorKind::External);
        assert!(info.message.starts_with("sentiment call failed"));
        let details = info.details.unwrap();
        assert_eq!(details["retry_exhausted"], true);
        assert_eq!(details["attempts"], 5);

        let info = external_error("sentiment", &err);
        assert!(info.details.unwrap().get("retry_exhausted").is_none());
    }
}
