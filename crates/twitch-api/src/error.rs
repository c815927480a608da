use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TwitchApiError>;

#[derive(Debug, Error)]
pub enum TwitchApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("token request failed: {0}")]
    Token(String),
    #[error("live set did not fit in {pages} stream pages")]
    PageLimit { pages: usize },
}

impl TwitchApiError {
    /// Whether retrying the same request later may succeed.
    ///
    /// Network failures, timeouts, 5xx responses and upstream rate limiting
    /// are transient. Decoding errors, auth failures and other 4xx responses
    /// are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_decode() && !e.is_builder() && !e.is_redirect(),
            Self::RateLimited { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Json(_) | Self::Unauthorized(_) | Self::Token(_) | Self::PageLimit { .. } => {
                false
            }
        }
    }

    /// Server-provided delay hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
