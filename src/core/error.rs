use std::time::Duration;
use thiserror::Error;

use crate::generation::error::{FetchError, ProviderError};

/// Centralized error types for the application
///
/// All errors in the application are converted to this enum for consistent
/// error handling. Uses `thiserror` for automatic conversion and display
/// formatting.
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Database connection pool errors
    #[error("Database pool error: {0}")]
    DatabasePool(#[from] r2d2::Error),

    /// Telegram API errors
    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    /// Pre-debit rejection of a generation request
    #[error("Admission error: {0}")]
    Admission(#[from] AdmissionError),

    /// Inference provider failure after exhausting retries
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Artifact download failure after exhausting retries
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing errors
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// Anyhow errors (for general error handling)
    #[error("Application error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

/// Cheap, pre-debit rejections surfaced to the requester immediately.
/// None of these ever touch the resource ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// The job queue is at capacity
    #[error("generation queue is full")]
    QueueFull,

    /// The user submitted again before the cooldown expired
    #[error("cooldown active, retry in {retry_in:?}")]
    CooldownActive { retry_in: Duration },

    /// An avatar-based job was requested without a ready trained model
    #[error("no active model is ready for this user")]
    NoActiveModel,

    /// The user's balance cannot cover the job's cost
    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance { required: u32, available: u32 },

    /// The request parameters failed validation
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
}
