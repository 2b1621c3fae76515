use std::time::Duration;
use thiserror::Error;

/// Local detector failures. Both variants are recoverable at page level:
/// the page continues with semantic-only geometry.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("detection model is not loaded")]
    ModelUnavailable,

    #[error("detection failed: {0}")]
    DetectionFailed(String),
}

/// Remote semantic/translation source failures.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote service overloaded ({status}): {message}")]
    Transient {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("remote service error ({status}): {message}")]
    Terminal { status: u16, message: String },

    #[error("invalid remote response: {0}")]
    InvalidResponse(String),

    #[error("failed to encode page image: {0}")]
    Encode(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl RemoteError {
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Only server-side overload signals are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Transient { .. } => true,
            RemoteError::Request(err) => err.is_timeout(),
            _ => false,
        }
    }
}

/// Page-level failure surfaced to the caller.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("remote semantic source failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("page was superseded before its results were committed")]
    Cancelled,

    #[error("refinement task failed: {0}")]
    Task(String),
}

pub type DetectResult<T> = Result<T, DetectError>;
pub type RemoteResult<T> = Result<T, RemoteError>;
pub type PageResult<T> = Result<T, PageError>;
