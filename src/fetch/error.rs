//! Per-fetch failures.

use std::error::Error as _;
use std::time::Duration;

use thiserror::Error;

/// Why a single fetch did not produce a body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to read body (HTTP {status}): {reason}")]
    Body { status: u16, reason: String },

    #[error("Anonymity session is closed")]
    SessionClosed,
}

/// Coarse classification for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Connection,
    Status,
    Body,
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Connect(_)
            | FetchError::Timeout(_)
            | FetchError::Transport(_)
            | FetchError::SessionClosed => FetchErrorKind::Connection,
            FetchError::Status(_) => FetchErrorKind::Status,
            FetchError::Body { .. } => FetchErrorKind::Body,
        }
    }

    /// HTTP status, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status(status) | FetchError::Body { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify a reqwest error raised while sending a request.
    pub(crate) fn from_send(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(timeout)
        } else if err.is_connect() {
            FetchError::Connect(error_chain(&err))
        } else {
            FetchError::Transport(error_chain(&err))
        }
    }
}

/// Render an error with all of its sources; reqwest's top-level message
/// alone hides TLS and proxy failures.
pub(crate) fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
