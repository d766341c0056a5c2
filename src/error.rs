//! Error taxonomy for the sync core
//!
//! Library code returns [`TapError`]. The command layer wraps these in
//! `eyre::Report` with extra context before they reach the user.

use crate::transform::SchemaViolation;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = TapError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TapError {
    /// The API rejected our credentials. Fatal for the whole run.
    #[error("authentication rejected for {url}: {message}")]
    Auth { url: String, message: String },

    /// 5xx or a transport failure (including timeouts).
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    /// HTTP 429, with the server's `Retry-After` if it sent one.
    #[error("rate limited by {url}")]
    RateLimited {
        url: String,
        retry_after: Option<Duration>,
    },

    /// A non-retryable HTTP status other than 401/404.
    #[error("unexpected HTTP {status} from {url}: {body}")]
    UnexpectedStatus { status: u16, url: String, body: String },

    #[error(transparent)]
    SchemaViolation(#[from] SchemaViolation),

    #[error("stream '{stream}' failed: {reason}")]
    StreamFatal { stream: String, reason: String },

    /// The page-count ceiling was hit, most likely a cursor that never ends.
    #[error("stream '{stream}' exceeded the ceiling of {max_pages} pages")]
    PaginationLoop { stream: String, max_pages: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TapError {
    pub fn stream_fatal(stream: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StreamFatal {
            stream: stream.into(),
            reason: reason.into(),
        }
    }

    /// Whether a retry of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::RateLimited { .. })
    }

    /// Server-directed wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether the error must abort every stream, not just the current one.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}
