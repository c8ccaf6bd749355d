use std::time::Duration;
use thiserror::Error;

use crate::core::retry::Retryable;

/// Errors from the inference provider.
///
/// Only `Overloaded` and `RateLimited` are retry-safe; `InvalidInput`
/// means the request itself is malformed and must fail immediately.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transient provider failure (timeout, temporary overload, 5xx)
    #[error("provider temporarily unavailable: {0}")]
    Overloaded(String),

    /// Provider asked us to back off
    #[error("provider rate limited, retry in {retry_in:?}")]
    RateLimited { retry_in: Duration },

    /// The provider rejected the request as malformed; never retried
    #[error("provider rejected input: {0}")]
    InvalidInput(String),

    /// Transport-level failure reaching the provider
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a body we could not interpret
    #[error("unexpected provider response: {0}")]
    UnexpectedResponse(String),
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Overloaded(_) | ProviderError::RateLimited { .. } => true,
            // Connect errors and timeouts are transient; anything else at
            // the transport level (e.g. body decode) is not
            ProviderError::Http(e) => e.is_timeout() || e.is_connect(),
            ProviderError::InvalidInput(_) | ProviderError::UnexpectedResponse(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        if let ProviderError::RateLimited { retry_in } = self {
            Some(*retry_in)
        } else {
            None
        }
    }
}

/// Errors while downloading produced artifacts.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transport-level failure for one URL
    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    /// Non-success HTTP status for one URL
    #[error("download of {url} returned status {status}")]
    Status { url: String, status: u16 },

    /// The artifact body was empty
    #[error("download of {url} returned an empty body")]
    Empty { url: String },
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Download { .. } | FetchError::Empty { .. } => true,
            // 5xx from the file host is worth another attempt, 4xx is not
            FetchError::Status { status, .. } => *status >= 500,
        }
    }
}

/// A post-debit job failure. Any of these triggers the compensating
/// credit before the user is notified.
#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl JobError {
    /// Failure stage label used in metrics.
    pub fn stage(&self) -> &'static str {
        match self {
            JobError::Provider(_) => "provider",
            JobError::Fetch(_) => "fetch",
        }
    }
}
