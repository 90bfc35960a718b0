//! Blobfetch Core Library
//!
//! Resilient range-based HTTP transport for distributing large
//! AI-model blobs (multi-gigabyte GGUF files) through OCI-style
//! registries. The distribution client installs these transports into
//! its HTTP stack; callers then just see an ordinary streaming
//! response body, while underneath a single large GET is fanned out
//! into concurrent byte-range sub-requests and interrupted transfers
//! are resumed from the last delivered byte.
//!
//! # Architecture
//!
//! Everything lives in the [`transport`] module:
//! - header utilities (Content-Range parsing, validator classification)
//! - a HEAD capability probe
//! - the parallel chunking transport
//! - the resumable retry transport
//!
//! Manifest/layer modeling, the local content store, tarball packaging
//! and the CLI are external collaborators: they consume an HTTP client
//! configured with these transports and have no bearing on this crate.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod transport;

// Re-export commonly used types
pub use transport::{
    Body, DEFAULT_MAX_CHUNKS_PER_REQUEST, DEFAULT_MAX_RETRIES, DEFAULT_MIN_CHUNK_SIZE,
    HostLimiter, HttpTransport, ParallelOptions, ParallelTransport, Request, ResourceInfo,
    Response, ResumeTransport, Transport, TransportError, Validator,
};
