use std::time::Duration;

use thiserror::Error;
use utils::retry::Retryable;

pub type AdapterResult<T> = Result<T, AdapterError>;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed for {adapter}: {message}")]
    Authentication { adapter: String, message: String },

    #[error("{adapter} API error: {status} - {message}")]
    Api {
        adapter: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited: retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Invalid adapter configuration: {message}")]
    Configuration { message: String },

    #[error("Invalid channel pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl AdapterError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }
}

impl Retryable for AdapterError {
    fn is_retryable(&self) -> bool {
        AdapterError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        AdapterError::retry_after(self).map(Duration::from_secs)
    }

    fn cancelled() -> Self {
        Self::Cancelled
    }
}
