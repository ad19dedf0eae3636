use std::path::PathBuf;

use thiserror::Error;

use crate::queue::Retryable;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("chat unavailable: {0}")]
    Unavailable(String),

    #[error("message rejected: {0}")]
    Rejected(String),
}

/// Failure of one call to a transfer backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(reqwest::Error),

    #[error("request timed out")]
    Timeout,

    /// Malformed or unexpected response body.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unexpected HTTP status {status}")]
    Http { status: u16 },

    /// The backend understood the request and refused it.
    #[error("rejected by backend ({code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("operation not supported by this backend")]
    Unsupported,
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_decode() {
            BackendError::Protocol(err.to_string())
        } else {
            BackendError::Transport(err)
        }
    }
}

impl Retryable for BackendError {
    fn is_transient(&self) -> bool {
        match self {
            BackendError::Transport(err) => !err.is_builder(),
            BackendError::Timeout | BackendError::Protocol(_) => true,
            BackendError::Http { status } => *status >= 500,
            BackendError::Rejected { .. } | BackendError::Unsupported => false,
        }
    }
}
