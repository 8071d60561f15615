//! Error Classifier
//!
//! Maps transport and engine errors onto the typed failure taxonomy the
//! orchestrator reasons about.

use crate::error::{ExecutionFailure, GenerationFailure};
use reqwest::StatusCode;
use std::time::Duration;

/// Error classifier
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a non-success HTTP status from the model endpoint.
    pub fn classify_status(&self, status: StatusCode, body: &str, budget: Duration) -> GenerationFailure {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return GenerationFailure::RateLimited;
        }
        if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
            return GenerationFailure::Timeout(budget.as_millis() as u64);
        }
        let snippet: String = body.chars().take(200).collect();
        GenerationFailure::Unavailable(format!("HTTP {}: {}", status.as_u16(), snippet))
    }

    /// Classify a transport error raised before a status was available.
    pub fn classify_transport(&self, error: &reqwest::Error, budget: Duration) -> GenerationFailure {
        if error.is_timeout() {
            return GenerationFailure::Timeout(budget.as_millis() as u64);
        }
        if let Some(status) = error.status() {
            return self.classify_status(status, "", budget);
        }
        if error.is_decode() {
            return GenerationFailure::Unparseable(error.to_string());
        }
        GenerationFailure::Unavailable(error.to_string())
    }

    /// Classify a SQLite error raised while running a validated query.
    pub fn classify_execution(&self, error: &rusqlite::Error, budget: Duration) -> ExecutionFailure {
        match error {
            rusqlite::Error::SqliteFailure(inner, _)
                if inner.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                ExecutionFailure::Timeout {
                    budget_ms: budget.as_millis() as u64,
                }
            }
            other => ExecutionFailure::RuntimeError {
                message: other.to_string(),
            },
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit() {
        let classifier = ErrorClassifier::new();
        assert_eq!(
            classifier.classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down", Duration::from_secs(1)),
            GenerationFailure::RateLimited
        );
    }

    #[test]
    fn test_classify_server_error() {
        let classifier = ErrorClassifier::new();
        let failure = classifier.classify_status(StatusCode::INTERNAL_SERVER_ERROR, "boom", Duration::from_secs(1));
        assert_eq!(failure.code(), "unavailable");
        assert!(failure.to_string().contains("500"));
    }

    #[test]
    fn test_classify_upstream_timeout() {
        let classifier = ErrorClassifier::new();
        for status in [StatusCode::REQUEST_TIMEOUT, StatusCode::GATEWAY_TIMEOUT] {
            assert_eq!(
                classifier.classify_status(status, "", Duration::from_millis(8000)),
                GenerationFailure::Timeout(8000)
            );
        }
    }

    #[test]
    fn test_classify_sqlite_interrupt() {
        let classifier = ErrorClassifier::new();
        let interrupted = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_INTERRUPT),
            None,
        );
        assert_eq!(
            classifier.classify_execution(&interrupted, Duration::from_millis(250)),
            ExecutionFailure::Timeout { budget_ms: 250 }
        );

        let other = rusqlite::Error::InvalidQuery;
        assert!(matches!(
            classifier.classify_execution(&other, Duration::from_millis(250)),
            ExecutionFailure::RuntimeError { .. }
        ));
    }
}
