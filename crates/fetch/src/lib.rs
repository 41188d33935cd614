pub mod api;
pub mod catalog;
pub mod detail;
pub mod maccms;
pub mod pager;
pub mod retry;

use thiserror::Error;
use vodsync_core::types::ResponseFormat;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("source returned HTTP {0}")]
    Status(u16),
    #[error("malformed payload: {0}")]
    Parse(String),
    #[error("response format {0} is not supported")]
    Unsupported(ResponseFormat),
}

impl FetchError {
    /// Transport failures, server errors and rate limiting are retried. A
    /// client error or an unreadable payload would only come back the same.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout => true,
            FetchError::Status(code) => *code >= 500 || *code == 429,
            FetchError::Parse(_) | FetchError::Unsupported(_) => false,
        }
    }
}
