use std::time::Duration;

use thiserror::Error;

/// Failure reported by a transit data source.
///
/// Every variant is classified as transient (worth retrying), a validation
/// failure (the payload itself is bad), or permanent.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - check the transit API key")]
    Unauthorized,

    #[error("Region feed not found: {0}")]
    NotFound(String),

    #[error("Invalid region id: {0}")]
    InvalidRegionId(String),

    #[error("Request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server did not answer in time")]
    RequestTimeout,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl FetchError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => FetchError::Unauthorized,
            403 => FetchError::AccessDenied(truncated),
            404 => FetchError::NotFound(truncated),
            408 => FetchError::RequestTimeout,
            429 => FetchError::RateLimited,
            400..=499 => FetchError::Rejected {
                status: status.as_u16(),
                body: truncated,
            },
            500..=599 => FetchError::ServerError(truncated),
            _ => FetchError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Network trouble, timeouts, throttling and 5xx answers.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::RateLimited
            | FetchError::RequestTimeout
            | FetchError::Timeout(_)
            | FetchError::ServerError(_) => true,
            FetchError::NetworkError(e) => !e.is_decode() && !e.is_builder(),
            _ => false,
        }
    }

    /// The payload arrived but could not be understood.
    pub fn is_validation(&self) -> bool {
        match self {
            FetchError::InvalidResponse(_) => true,
            FetchError::NetworkError(e) => e.is_decode(),
            _ => false,
        }
    }
}
