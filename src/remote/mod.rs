//! # Remote Agent Client
//!
//! Signed transport to the peer site's agent endpoints plus the wire types
//! both sides exchange. Any transport problem (network error, timeout,
//! non-2xx status, malformed JSON, `success:false`) is a [`TransportError`]
//! whose message is recorded on the job verbatim.

pub mod client;
pub mod models;

use std::path::Path;

use thiserror::Error;

pub use client::RemoteClient;
pub use models::*;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {path} failed: {message}")]
    Request { path: String, message: String },
    #[error("request to {path} timed out")]
    Timeout { path: String },
    #[error("remote returned HTTP {status} for {path}: {message}")]
    Status {
        path: String,
        status: u16,
        message: String,
    },
    #[error("malformed response from {path}: {message}")]
    Malformed { path: String, message: String },
    #[error("{message}")]
    Rejected { path: String, message: String },
    #[error("invalid remote URL: {0}")]
    Url(String),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("failed to write {path}: {message}")]
    Io { path: String, message: String },
}

impl TransportError {
    pub(crate) fn from_reqwest(path: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TransportError::Timeout {
                path: path.to_string(),
            }
        } else {
            TransportError::Request {
                path: path.to_string(),
                message: error.to_string(),
            }
        }
    }

    pub(crate) fn io(path: &Path, error: std::io::Error) -> Self {
        TransportError::Io {
            path: path.display().to_string(),
            message: error.to_string(),
        }
    }

    /// HTTP status returned by the remote, if the request got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
