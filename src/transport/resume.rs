//! Resumable retry transport: re-issues a validated `Range` request
//! from the last delivered byte when a GET fails mid-stream.
//!
//! # Overview
//!
//! [`ResumeTransport`] wraps any base [`Transport`] (including the
//! parallel chunking one) and decorates successful GET bodies with a
//! stateful reader. A non-EOF read error triggers, synchronously inside
//! the blocked `read`, a new request for `bytes=<resume point>-`; the
//! resumed response is accepted only if it is a `206` whose
//! `Content-Range` starts exactly at the resume point. Anything else —
//! a `200`, a shifted start — means the resource may have changed and
//! surfaces as a fatal, non-retryable error. The caller never sees the
//! retries: `read` either returns more bytes or a terminal error once
//! the retry budget is spent.
//!
//! No background tasks are involved; resumption is fully sequential.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use reqwest::header::{CONTENT_RANGE, HeaderMap, RANGE};
use reqwest::{Method, StatusCode};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, warn};

use super::base::{Body, Request, Response, Transport};
use super::error::TransportError;
use super::headers::{content_is_encoded, parse_content_range, parse_range_header};
use super::probe::{Validator, select_validator};

/// Default resume budget per logical GET.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Transport that transparently resumes interrupted GET bodies.
pub struct ResumeTransport {
    base: Arc<dyn Transport>,
    max_retries: u32,
}

impl ResumeTransport {
    /// Creates a resumable transport over `base` allowing up to
    /// `max_retries` resume attempts per logical GET.
    #[must_use]
    pub fn new(base: Arc<dyn Transport>, max_retries: u32) -> Self {
        Self { base, max_retries }
    }
}

#[async_trait::async_trait]
impl Transport for ResumeTransport {
    async fn round_trip(&self, request: Request) -> Result<Response, TransportError> {
        let method = request.method.clone();
        let response = self.base.round_trip(request.clone()).await?;

        // Only successful GET bodies are worth decorating; everything
        // else (HEADs, error responses) passes through untouched.
        if method != Method::GET || !response.status.is_success() {
            return Ok(response);
        }

        let offsets = initial_offsets(&request.headers);
        let content_encoded = content_is_encoded(&response.headers);
        let validator = select_validator(&response.headers);

        debug!(
            url = %request.url,
            start = offsets.map(|(s, _)| s),
            resumable = offsets.is_some() && !content_encoded,
            has_validator = validator.is_some(),
            "decorating GET body for resumption"
        );

        let Response {
            status,
            headers,
            body,
        } = response;

        let body = ResumingBody {
            transport: Arc::clone(&self.base),
            request,
            state: BodyState::Reading(body),
            start_offset: offsets.map_or(0, |(start, _)| start),
            end_offset: offsets.and_then(|(_, end)| end),
            resume_disabled: offsets.is_none() || content_encoded,
            validator,
            delivered: 0,
            attempts_used: 0,
            max_retries: self.max_retries,
        };

        Ok(Response {
            status,
            headers,
            body: Box::new(body),
        })
    }
}

/// Derives the starting offset (and optional inclusive end) implied by
/// a caller-supplied `Range` header: `(0, None)` when absent, `None`
/// (resumption disabled) when present but not a single absolute range —
/// suffix and multi-range forms give no offset to continue from.
fn initial_offsets(headers: &HeaderMap) -> Option<(u64, Option<u64>)> {
    match headers.get(RANGE) {
        None => Some((0, None)),
        Some(value) => value.to_str().ok().and_then(parse_range_header),
    }
}

type ResumeFuture = Pin<Box<dyn Future<Output = io::Result<Body>> + Send>>;

enum BodyState {
    /// Streaming from the current underlying body.
    Reading(Body),
    /// A resume round-trip is in flight; reads block on it.
    Resuming(ResumeFuture),
    /// A terminal error was surfaced; the stream is truncated.
    Failed,
}

/// Body decorator tracking delivered bytes and resuming on failure.
///
/// `delivered` counts only bytes actually handed to the caller, so the
/// resume point never runs ahead of what the caller has seen.
struct ResumingBody {
    transport: Arc<dyn Transport>,
    request: Request,
    state: BodyState,
    start_offset: u64,
    end_offset: Option<u64>,
    resume_disabled: bool,
    validator: Option<Validator>,
    delivered: u64,
    attempts_used: u32,
    max_retries: u32,
}

impl ResumingBody {
    fn begin_resume(&mut self) {
        let transport = Arc::clone(&self.transport);
        let request = self.request.clone();
        let offset = self.start_offset + self.delivered;
        let end = self.end_offset;
        let validator = self.validator.clone();
        self.state = BodyState::Resuming(Box::pin(async move {
            resume_round_trip(transport, request, offset, end, validator).await
        }));
    }

    /// Decides what to do with a failure: surface it (terminal) or arm
    /// another resume attempt. Resource-changed failures and an
    /// exhausted budget are terminal.
    fn handle_failure(&mut self, error: io::Error, fatal: bool) -> Option<io::Error> {
        if fatal || self.resume_disabled || self.attempts_used >= self.max_retries {
            self.state = BodyState::Failed;
            return Some(error);
        }
        self.attempts_used += 1;
        warn!(
            url = %self.request.url,
            attempt = self.attempts_used,
            max_retries = self.max_retries,
            resume_offset = self.start_offset + self.delivered,
            error = %error,
            "transfer interrupted, resuming from last delivered byte"
        );
        self.begin_resume();
        None
    }
}

impl AsyncRead for ResumingBody {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                BodyState::Reading(body) => {
                    let before = buf.filled().len();
                    match Pin::new(body).poll_read(cx, buf) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Ok(())) => {
                            this.delivered += (buf.filled().len() - before) as u64;
                            return Poll::Ready(Ok(()));
                        }
                        Poll::Ready(Err(error)) => {
                            if let Some(error) = this.handle_failure(error, false) {
                                return Poll::Ready(Err(error));
                            }
                        }
                    }
                }
                BodyState::Resuming(future) => match future.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Ok(body)) => {
                        debug!(url = %this.request.url, "resume accepted, continuing stream");
                        this.state = BodyState::Reading(body);
                    }
                    Poll::Ready(Err(error)) => {
                        let fatal = super::error::is_resource_changed_io(&error);
                        if let Some(error) = this.handle_failure(error, fatal) {
                            return Poll::Ready(Err(error));
                        }
                    }
                },
                BodyState::Failed => {
                    return Poll::Ready(Err(io::Error::other(
                        "read after terminal transfer error",
                    )));
                }
            }
        }
    }
}

/// Issues one resume request and validates the continuation.
///
/// Acceptance is strict: status must be `206` and the `Content-Range`
/// start must equal the resume point exactly. A `200` (server ignored
/// the range — or `If-Range` detected a change) and a shifted start are
/// resource-changed errors, carried through `io::Error` so the state
/// machine can classify them as non-retryable.
async fn resume_round_trip(
    transport: Arc<dyn Transport>,
    request: Request,
    offset: u64,
    end: Option<u64>,
    validator: Option<Validator>,
) -> io::Result<Body> {
    let url = request.url.to_string();
    let ranged = request
        .ranged(offset, end, validator.as_ref())
        .map_err(TransportError::into_io)?;
    let response = transport
        .round_trip(ranged)
        .await
        .map_err(TransportError::into_io)?;

    if response.status == StatusCode::OK {
        return Err(TransportError::resource_changed(
            &url,
            "resume request answered with a full 200 response",
        )
        .into_io());
    }
    if response.status != StatusCode::PARTIAL_CONTENT {
        return Err(
            TransportError::unexpected_status(&url, response.status.as_u16()).into_io(),
        );
    }

    match response
        .header_str(CONTENT_RANGE)
        .and_then(parse_content_range)
    {
        Some(range) if range.start == offset => Ok(response.body),
        Some(range) => Err(TransportError::resource_changed(
            &url,
            format!(
                "resume requested offset {offset}, server answered {}",
                range.start
            ),
        )
        .into_io()),
        None => Err(TransportError::resource_changed(
            &url,
            "206 resume response without a parseable Content-Range",
        )
        .into_io()),
    }
}
