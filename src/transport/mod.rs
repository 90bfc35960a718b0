//! Resilient range-based HTTP transport layer.
//!
//! Two composable [`Transport`] implementations for moving very large
//! blobs (multi-gigabyte model files) out of OCI-style registries:
//!
//! - [`ParallelTransport`] splits one large GET into concurrent
//!   byte-range sub-requests and stitches the results back into a
//!   single ordered stream.
//! - [`ResumeTransport`] detects mid-stream read failures and resumes
//!   the GET from the last delivered byte, guarded by `If-Range`
//!   validators against the resource changing underneath it.
//!
//! Both wrap any base transport and can be composed; the usual stack is
//! the resumable layer around the parallel one around [`HttpTransport`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use blobfetch::transport::{
//!     HttpTransport, ParallelOptions, ParallelTransport, ResumeTransport,
//! };
//!
//! let base = Arc::new(HttpTransport::new());
//! let parallel = Arc::new(ParallelTransport::new(base, ParallelOptions::default()));
//! let transport = ResumeTransport::new(parallel, 3);
//! ```
//!
//! The caller of the composed stack sees either a complete,
//! byte-correct stream or a terminal error — never a silent partial
//! success.

mod base;
mod error;
pub mod headers;
mod host_limit;
mod parallel;
mod probe;
mod resume;

pub use base::{Body, HttpTransport, Request, Response, Transport};
pub use error::{TransportError, is_resource_changed_io};
pub use headers::{
    ContentRange, content_is_encoded, format_range, is_weak_etag, parse_content_range,
    parse_range_header, scrub_conditional_headers, supports_byte_ranges,
};
pub use host_limit::{HostLimiter, canonical_host};
pub use parallel::{
    DEFAULT_MAX_CHUNKS_PER_REQUEST, DEFAULT_MIN_CHUNK_SIZE, ParallelOptions, ParallelTransport,
};
pub use probe::{ResourceInfo, Validator, select_validator};
pub use resume::{DEFAULT_MAX_RETRIES, ResumeTransport};
