use std::time::Duration;

use thiserror::Error;

/// Fetch failures, split so the retry layer can tell transient network
/// trouble apart from terminal client errors.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("rate limited by {url} (retry-after: {retry_after:?})")]
    RateLimited {
        url: String,
        retry_after: Option<Duration>,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("CSV decode error: {0}")]
    Csv(#[from] arrow_schema::ArrowError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Transient failures are retried with backoff; everything else
    /// surfaces immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Http(_) => true,
            FetchError::RateLimited { .. } => true,
            FetchError::Status { status, .. } => *status >= 500,
            FetchError::InvalidRequest(_)
            | FetchError::Decode { .. }
            | FetchError::Csv(_)
            | FetchError::Io(_) => false,
        }
    }
}
