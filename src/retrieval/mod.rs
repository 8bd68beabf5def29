//! Retrieval of raw greeks history for one task.
//!
//! The worker only sees the [`Retrieval`] trait. [`ThetaClient`] is the HTTP
//! implementation against a locally running ThetaData terminal; it also
//! implements [`Discovery`] for building task lists.

mod discovery;
mod theta;

pub use discovery::Discovery;
pub use theta::{DEFAULT_BASE_URL, DEFAULT_INTERVAL, ThetaClient};

use async_trait::async_trait;
use thiserror::Error;

use crate::catalog::TaskKey;

/// Fetches the payload for a task.
#[async_trait]
pub trait Retrieval: Send + Sync {
    /// Returns the raw response body for `key`.
    async fn fetch(&self, key: &TaskKey) -> Result<Vec<u8>, RetrievalError>;
}

/// Errors that can occur while fetching a payload.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The request URL.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The request URL.
        url: String,
    },

    /// Non-success HTTP response.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The request URL.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The response arrived but is not usable data.
    #[error("malformed response from {url}: {reason}")]
    MalformedResponse {
        /// The request URL.
        url: String,
        /// What was wrong with the body.
        reason: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// The configured base URL cannot be used.
    #[error("invalid base URL '{url}'\n  Suggestion: use an absolute http(s) URL such as {DEFAULT_BASE_URL}")]
    InvalidBaseUrl {
        /// The rejected value.
        url: String,
    },
}

impl RetrievalError {
    /// Creates a network error, promoting reqwest timeouts to [`RetrievalError::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates a malformed-response error.
    pub fn malformed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for failures in the transport or upstream service.
    ///
    /// Malformed payloads are the only non-transient class.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Timeout { .. } | Self::HttpStatus { .. }
        )
    }
}
