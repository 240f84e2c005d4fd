//! Errors raised while setting up the anonymous session.
//!
//! Everything here is fatal for a run. Per-fetch failures live in
//! [`crate::fetch::FetchError`] and never abort the sequence.

use std::time::Duration;

use thiserror::Error;

use crate::privacy::SessionState;

/// Setup-phase error.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to write transport configuration: {0}")]
    ConfigWrite(#[source] std::io::Error),

    #[error("Failed to start anonymity client: {0}")]
    Startup(String),

    #[error("Anonymity client did not bootstrap within {0:?}")]
    DialTimeout(Duration),

    #[error("Failed to set up dialer: {0}")]
    DialSetup(String),

    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Failed to parse pinned certificate bundle: {0}")]
    CertParse(String),

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Dial to {target} failed: {reason}")]
    Dial { target: String, reason: String },
}

impl BootstrapError {
    /// Short name of the setup phase that failed, for diagnostics.
    pub fn phase(&self) -> &'static str {
        match self {
            BootstrapError::Config(_) | BootstrapError::CertParse(_) => "configuration",
            BootstrapError::ConfigWrite(_) => "transport configuration",
            BootstrapError::Startup(_) => "session start",
            BootstrapError::DialTimeout(_) | BootstrapError::DialSetup(_) => "dialer",
            BootstrapError::InvalidState { .. } => "session state",
            BootstrapError::ClientBuild(_) => "client construction",
            BootstrapError::Dial { .. } => "dial",
        }
    }
}

pub type Result<T> = std::result::Result<T, BootstrapError>;
