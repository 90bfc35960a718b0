//! Parallel chunking transport: fans one large GET out into concurrent
//! byte-range sub-requests and stitches the results back into a single
//! ordered stream.
//!
//! # Overview
//!
//! Eligible requests (plain GETs against a range-capable resource of
//! known, large-enough size) are split into disjoint byte ranges whose
//! union covers the whole resource. Each range is fetched by its own
//! task into an anonymous temp file, bounded by a per-host concurrency
//! ceiling; on success a synthetic `200 OK` is returned whose body
//! reads the chunks in offset order. Everything else passes through to
//! the base transport unmodified — ineligibility is a silent fallback,
//! never an error.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use blobfetch::transport::{HttpTransport, ParallelOptions, ParallelTransport, Request, Transport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let base = Arc::new(HttpTransport::new());
//! let transport = ParallelTransport::new(base, ParallelOptions::default());
//! let url = url::Url::parse("https://registry.example.com/v2/blobs/sha256:abc")?;
//! let response = transport.round_trip(Request::get(url)).await?;
//! let mut body = response.body;
//! // body is one continuous AsyncRead over the stitched chunks
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, HeaderValue, RANGE};
use reqwest::{Method, StatusCode};
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWriteExt, ReadBuf};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::base::{Request, Response, Transport};
use super::error::TransportError;
use super::headers::parse_content_range;
use super::host_limit::HostLimiter;
use super::probe::{Validator, probe};

/// Default maximum number of range sub-requests per GET.
pub const DEFAULT_MAX_CHUNKS_PER_REQUEST: usize = 8;

/// Default minimum chunk size (32 MiB). Blobs smaller than
/// `min_chunk_size * max_chunks_per_request` are fetched directly.
pub const DEFAULT_MIN_CHUNK_SIZE: u64 = 32 * 1024 * 1024;

/// Construction-time options for [`ParallelTransport`].
#[derive(Debug, Clone)]
pub struct ParallelOptions {
    /// In-flight sub-request ceiling per canonical hostname. The `""`
    /// key sets the default for unlisted hosts; 0 means unlimited.
    pub max_concurrent_per_host: HashMap<String, usize>,
    /// Maximum number of chunks one GET is split into.
    pub max_chunks_per_request: usize,
    /// Smallest worthwhile chunk, in bytes.
    pub min_chunk_size: u64,
    /// Directory for chunk staging files; `None` uses the system temp dir.
    pub temp_dir: Option<PathBuf>,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            max_concurrent_per_host: HashMap::new(),
            max_chunks_per_request: DEFAULT_MAX_CHUNKS_PER_REQUEST,
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
            temp_dir: None,
        }
    }
}

/// One contiguous byte range, inclusive on both ends (as on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes the range covers.
    pub fn len(self) -> u64 {
        self.end - self.start + 1
    }
}

/// Splits `[0, total)` into at most `max_chunks` contiguous ranges of
/// at least `min_chunk_size` bytes each (except that a single chunk may
/// be smaller when the resource is). The last chunk absorbs the
/// integer-division remainder, so the union is exactly `[0, total)`
/// with no gap or overlap.
pub(crate) fn plan_chunks(total: u64, max_chunks: usize, min_chunk_size: u64) -> Vec<ByteRange> {
    if total == 0 {
        return Vec::new();
    }
    let by_size = total / min_chunk_size.max(1);
    let num_chunks = (max_chunks as u64).clamp(1, by_size.max(1));
    let chunk_size = total / num_chunks;

    let mut ranges = Vec::with_capacity(usize::try_from(num_chunks).unwrap_or(1));
    for i in 0..num_chunks {
        let start = i * chunk_size;
        let end = if i == num_chunks - 1 {
            total - 1
        } else {
            start + chunk_size - 1
        };
        ranges.push(ByteRange { start, end });
    }
    ranges
}

/// Transport that splits large GETs into concurrent range sub-requests.
///
/// Wraps any base [`Transport`]; composition with the resumable layer
/// (and installation into an HTTP client) is done by the distribution
/// client, not here.
pub struct ParallelTransport {
    base: Arc<dyn Transport>,
    limiter: Arc<HostLimiter>,
    max_chunks_per_request: usize,
    min_chunk_size: u64,
    temp_dir: PathBuf,
}

impl ParallelTransport {
    /// Creates a parallel chunking transport over `base`.
    ///
    /// `max_chunks_per_request` and `min_chunk_size` are clamped to at
    /// least 1.
    #[must_use]
    pub fn new(base: Arc<dyn Transport>, options: ParallelOptions) -> Self {
        Self {
            limiter: Arc::new(HostLimiter::new(options.max_concurrent_per_host)),
            max_chunks_per_request: options.max_chunks_per_request.max(1),
            min_chunk_size: options.min_chunk_size.max(1),
            temp_dir: options.temp_dir.unwrap_or_else(std::env::temp_dir),
            base,
        }
    }

    /// Smallest resource size that gets split rather than passed through.
    fn parallel_threshold(&self) -> u64 {
        self.min_chunk_size
            .saturating_mul(self.max_chunks_per_request as u64)
    }

    /// Runs the fan-out/fan-in for an eligible request.
    #[instrument(skip(self, request, validator), fields(url = %request.url, total))]
    async fn fetch_parallel(
        &self,
        request: &Request,
        total: u64,
        validator: Option<&Validator>,
    ) -> Result<Response, TransportError> {
        let chunks = plan_chunks(total, self.max_chunks_per_request, self.min_chunk_size);
        info!(
            total,
            chunk_count = chunks.len(),
            has_validator = validator.is_some(),
            "splitting GET into ranged sub-requests"
        );

        // Build every sub-request and allocate every staging file before
        // launching anything, so a failure here fails closed with no
        // partially-launched fan-out. The files are anonymous (unlinked
        // at creation): dropping them is the cleanup.
        let mut launches = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let sub_request = request.ranged(chunk.start, Some(chunk.end), validator)?;
            let file = tempfile::tempfile_in(&self.temp_dir)
                .map_err(|e| TransportError::io("allocating chunk staging file", e))?;
            launches.push((*chunk, sub_request, tokio::fs::File::from_std(file)));
        }

        // One task per chunk, held in a JoinSet: dropping this future
        // (caller cancellation) aborts every in-flight sub-request and
        // any pending host-permit acquisition. First error wins; the
        // early return drops the set and aborts the surviving siblings.
        let mut tasks = JoinSet::new();
        for (index, (chunk, sub_request, file)) in launches.into_iter().enumerate() {
            let base = Arc::clone(&self.base);
            let limiter = Arc::clone(&self.limiter);
            tasks.spawn(async move {
                fetch_chunk(base, limiter, sub_request, chunk, file)
                    .await
                    .map(|file| (index, file))
            });
        }

        // Tasks finish in completion order; slot them back into offset
        // order for stitching.
        let mut slots: Vec<Option<tokio::fs::File>> = (0..chunks.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((index, file))) => slots[index] = Some(file),
                Ok(Err(error)) => return Err(error),
                Err(error) => {
                    warn!(error = %error, "chunk task panicked");
                    return Err(TransportError::io(
                        "joining chunk tasks",
                        std::io::Error::other(error),
                    ));
                }
            }
        }
        let chunk_files: Vec<tokio::fs::File> = slots.into_iter().flatten().collect();
        if chunk_files.len() != chunks.len() {
            return Err(TransportError::io(
                "joining chunk tasks",
                std::io::Error::other("chunk result missing"),
            ));
        }

        // One tiny range request to pick up representative live headers
        // (content-type and friends) for the synthetic response. The
        // validator still guards it, so a late resource swap surfaces
        // as resource-changed rather than mixed headers.
        let header_request = request.ranged(0, Some(0), validator)?;
        let header_response = self.base.round_trip(header_request).await?;
        let url = request.url.as_str();
        if header_response.status == StatusCode::OK {
            return Err(TransportError::resource_changed(
                url,
                "header request answered with a full 200 response",
            ));
        }
        if header_response.status != StatusCode::PARTIAL_CONTENT {
            return Err(TransportError::unexpected_status(
                url,
                header_response.status.as_u16(),
            ));
        }

        let mut headers = header_response.headers.clone();
        headers.remove(CONTENT_RANGE);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(total));

        Ok(Response {
            status: StatusCode::OK,
            headers,
            body: Box::new(StitchedBody::new(chunk_files)),
        })
    }
}

#[async_trait::async_trait]
impl Transport for ParallelTransport {
    async fn round_trip(&self, request: Request) -> Result<Response, TransportError> {
        // Only plain GETs are splittable. A caller-supplied Range must
        // pass through untouched: when a resumable layer wraps this
        // one, its resume requests arrive here already ranged.
        if request.method != Method::GET || request.headers.contains_key(RANGE) {
            return self.base.round_trip(request).await;
        }

        let Some(info) = probe(self.base.as_ref(), &request).await else {
            return self.base.round_trip(request).await;
        };
        if !info.parallelizable() {
            debug!(url = %request.url, "resource not parallelizable, passing through");
            return self.base.round_trip(request).await;
        }
        let Some(total) = info.total_size else {
            return self.base.round_trip(request).await;
        };
        if total < self.parallel_threshold() {
            debug!(url = %request.url, total, threshold = self.parallel_threshold(), "resource too small to split");
            return self.base.round_trip(request).await;
        }

        self.fetch_parallel(&request, total, info.validator.as_ref())
            .await
    }
}

/// Fetches one chunk into its staging file and rewinds the file for
/// stitching. Holds a host permit for the full transfer.
async fn fetch_chunk(
    base: Arc<dyn Transport>,
    limiter: Arc<HostLimiter>,
    request: Request,
    chunk: ByteRange,
    mut file: tokio::fs::File,
) -> Result<tokio::fs::File, TransportError> {
    let url = request.url.to_string();
    let _permit = limiter.acquire(&request.url).await?;
    debug!(url = %url, start = chunk.start, end = chunk.end, "fetching chunk");

    let response = base.round_trip(request).await?;
    if response.status == StatusCode::OK {
        return Err(TransportError::resource_changed(
            &url,
            "range sub-request answered with a full 200 response",
        ));
    }
    if response.status != StatusCode::PARTIAL_CONTENT {
        return Err(TransportError::unexpected_status(
            &url,
            response.status.as_u16(),
        ));
    }

    match response
        .header_str(CONTENT_RANGE)
        .and_then(parse_content_range)
    {
        Some(range) if range.start == chunk.start && range.end == chunk.end => {}
        Some(range) => {
            return Err(TransportError::resource_changed(
                &url,
                format!(
                    "requested bytes {}-{}, server answered {}-{}",
                    chunk.start, chunk.end, range.start, range.end
                ),
            ));
        }
        None => {
            return Err(TransportError::resource_changed(
                &url,
                "206 response without a parseable Content-Range",
            ));
        }
    }

    let mut body = response.body;
    let copied = tokio::io::copy(&mut body, &mut file)
        .await
        .map_err(|e| {
            TransportError::io(format!("copying chunk {}-{}", chunk.start, chunk.end), e)
        })?;
    if copied != chunk.len() {
        return Err(TransportError::integrity(&url, chunk.len(), copied));
    }

    file.flush()
        .await
        .map_err(|e| TransportError::io("flushing chunk staging file", e))?;
    file.seek(SeekFrom::Start(0))
        .await
        .map_err(|e| TransportError::io("rewinding chunk staging file", e))?;
    Ok(file)
}

/// Ordered concatenation of chunk staging files behind one `AsyncRead`.
///
/// The read cursor advances file by file; offsets, not sub-request
/// completion order, determined the ordering at stitch time. The files
/// are anonymous, so dropping this body releases every chunk's backing
/// storage unconditionally.
pub(crate) struct StitchedBody {
    chunks: Vec<tokio::fs::File>,
    index: usize,
}

impl StitchedBody {
    pub(crate) fn new(chunks: Vec<tokio::fs::File>) -> Self {
        Self { chunks, index: 0 }
    }
}

impl AsyncRead for StitchedBody {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        loop {
            if buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }
            let Some(file) = this.chunks.get_mut(this.index) else {
                return Poll::Ready(Ok(())); // past the last chunk: EOF
            };
            let before = buf.filled().len();
            std::task::ready!(Pin::new(file).poll_read(cx, buf))?;
            if buf.filled().len() == before {
                // Current chunk exhausted; move to the next one.
                this.index += 1;
                continue;
            }
            return Poll::Ready(Ok(()));
        }
    }
}
