// src/error.rs
// Classified failures for remote calls and session operations.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// HTTP 429 / 5xx or a transport-level fault. Eligible for retry.
    #[error("retryable service error{}: {message}", status_suffix(.status))]
    Retryable {
        status: Option<u16>,
        message: String,
    },
    /// Any other non-2xx status. Never retried.
    #[error("service error (status {status})")]
    Fatal { status: u16 },
    /// Response body did not match the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// Wall-clock budget exceeded.
    #[error("request timed out")]
    Timeout,
    /// Rejected before any network call was made.
    #[error("validation error: {0}")]
    Validation(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (status {})", code),
        None => String::new(),
    }
}

impl ServiceError {
    /// Classify an HTTP status per the retry contract: 429 and 5xx are
    /// retryable, every other non-2xx is fatal.
    pub fn from_status(status: u16) -> Self {
        if status == 429 || status >= 500 {
            ServiceError::Retryable {
                status: Some(status),
                message: format!("HTTP {}", status),
            }
        } else {
            ServiceError::Fatal { status }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Retryable { .. } | ServiceError::Timeout
        )
    }

    /// Status code carried by the error, when one exists.
    pub fn status(&self) -> Option<u16> {
        match self {
            ServiceError::Retryable { status, .. } => *status,
            ServiceError::Fatal { status } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::Timeout
        } else if let Some(status) = err.status() {
            ServiceError::from_status(status.as_u16())
        } else {
            // Connection refused, DNS failure, reset mid-body: transport fault.
            ServiceError::Retryable {
                status: None,
                message: err.to_string(),
            }
        }
    }
}
