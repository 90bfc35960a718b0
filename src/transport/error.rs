//! Error types for the transport layer.
//!
//! The taxonomy matters more than usual here: the resumable transport
//! must be able to tell a transient read failure (worth resuming) apart
//! from evidence that the resource changed underneath it (never worth
//! resuming). Ineligibility for parallelization is deliberately *not*
//! represented — that path is a silent fallback, not an error.

use std::io;

use thiserror::Error;

/// Errors that can occur while round-tripping a request.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Local I/O error while staging or reading chunk data.
    #[error("IO error during {context}: {source}")]
    Io {
        /// What the transport was doing when the error occurred.
        context: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// A sub-request returned a status the range protocol does not allow.
    #[error("unexpected HTTP {status} fetching {url}")]
    UnexpectedStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The resource appears to have changed between requests.
    ///
    /// Raised when a range or resume request is answered with `200 OK`
    /// instead of `206`, or when the `Content-Range` of a `206` does not
    /// match what was asked for. Never retryable: stitching bytes from
    /// two versions of a blob would corrupt it silently.
    #[error("resource changed while fetching {url}: {detail}")]
    ResourceChanged {
        /// The URL whose resource changed.
        url: String,
        /// What mismatched.
        detail: String,
    },

    /// A chunk body delivered a different number of bytes than its range promised.
    #[error("integrity check failed for {url}: expected {expected_bytes} bytes, got {actual_bytes}")]
    Integrity {
        /// The URL of the sub-request.
        url: String,
        /// Bytes the requested range covers.
        expected_bytes: u64,
        /// Bytes actually delivered.
        actual_bytes: u64,
    },

    /// A header value constructed for a sub-request was not valid HTTP.
    #[error("invalid {name} header value: {source}")]
    InvalidHeader {
        /// The header being constructed.
        name: &'static str,
        /// The underlying validation error.
        #[source]
        source: reqwest::header::InvalidHeaderValue,
    },

    /// A per-host semaphore was closed unexpectedly.
    #[error("host semaphore closed unexpectedly")]
    SemaphoreClosed,
}

impl TransportError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an IO error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates an unexpected-status error.
    pub fn unexpected_status(url: impl Into<String>, status: u16) -> Self {
        Self::UnexpectedStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a resource-changed error.
    pub fn resource_changed(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ResourceChanged {
            url: url.into(),
            detail: detail.into(),
        }
    }

    /// Creates an integrity mismatch error.
    pub fn integrity(url: impl Into<String>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            url: url.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates an invalid-header error.
    pub fn invalid_header(
        name: &'static str,
        source: reqwest::header::InvalidHeaderValue,
    ) -> Self {
        Self::InvalidHeader { name, source }
    }

    /// Returns true if this error means the resource changed between
    /// requests and must never be retried or resumed.
    #[must_use]
    pub fn is_resource_changed(&self) -> bool {
        matches!(self, Self::ResourceChanged { .. })
    }

    /// Wraps this error into an `io::Error` for surfacing through an
    /// `AsyncRead` body. The original error stays downcastable, so
    /// [`is_resource_changed_io`] can still classify it.
    #[must_use]
    pub fn into_io(self) -> io::Error {
        io::Error::other(self)
    }
}

/// Returns true if an `io::Error` carries a non-retryable
/// [`TransportError::ResourceChanged`] produced by this crate.
#[must_use]
pub fn is_resource_changed_io(error: &io::Error) -> bool {
    error
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<TransportError>())
        .is_some_and(TransportError::is_resource_changed)
}

// Note on From trait implementations:
// We intentionally do NOT implement `From<reqwest::Error>` or
// `From<std::io::Error>` because the variants require context (url,
// what was being done) that the source errors don't provide. The helper
// constructors are the pattern here.
