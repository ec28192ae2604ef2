use thiserror::Error;

use crate::model::Platform;

/// Default retry hint when a rate-limited response carries no `Retry-After`.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 900;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid parameters: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("rate limited by {platform}: {message} (retry after {retry_after_secs}s)")]
    RateLimited {
        platform: Platform,
        message: String,
        retry_after_secs: u64,
    },

    #[error("transient failure from {platform}: {message}")]
    Transient { platform: Platform, message: String },

    #[error("{platform} adapter failed: {message}")]
    FatalAdapter { platform: Platform, message: String },

    #[error("failed to save listing {key}: {message}")]
    PerItemSave { key: String, message: String },

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Retry hint to hand back to the caller, only for rate-limited failures.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            PipelineError::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Store(anyhow::Error::new(err))
    }
}
