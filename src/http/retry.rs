//! Which download failures are worth another attempt.

use reqwest::StatusCode;
use thiserror::Error;

/// Attempts per mirror URL.
pub const MAX_RETRIES: usize = 3;

/// Delay between attempts in milliseconds.
pub const RETRY_DELAY_MS: u64 = 1000;

/// Failures that will not go away by asking the same URL again.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NonRetryableError {
    #[error("Rate limit exceeded (HTTP {0}). Try again later or use another mirror.")]
    RateLimitExceeded(u16),
    #[error("Authentication failed: the download host requires credentials")]
    AuthenticationFailed,
    #[error("Not found: the archive is not available at this URL")]
    NotFound,
    #[error("Access forbidden: the download host refused the request")]
    Forbidden,
    #[error("Request error: HTTP {0}")]
    ClientError(u16),
}

/// `None` for statuses that may succeed on retry (5xx), otherwise the reason not to.
pub fn classify_status(status: StatusCode) -> Option<NonRetryableError> {
    match status {
        StatusCode::UNAUTHORIZED => Some(NonRetryableError::AuthenticationFailed),
        StatusCode::FORBIDDEN => Some(NonRetryableError::Forbidden),
        StatusCode::TOO_MANY_REQUESTS => Some(NonRetryableError::RateLimitExceeded(status.as_u16())),
        StatusCode::NOT_FOUND | StatusCode::GONE => Some(NonRetryableError::NotFound),
        s if s.is_client_error() => Some(NonRetryableError::ClientError(s.as_u16())),
        _ => None,
    }
}

/// Converts an `error_for_status()` failure, marking it non-retryable when
/// the status says so. Connection errors and timeouts stay retryable.
pub fn check_retryable(error: reqwest::Error) -> anyhow::Error {
    match error.status().and_then(classify_status) {
        Some(non_retryable) => anyhow::Error::from(non_retryable),
        None => anyhow::Error::from(error),
    }
}
