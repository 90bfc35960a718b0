//! Shared test doubles: a range-aware wiremock responder, scripted
//! in-process transports for failure injection, and body builders.

#![allow(dead_code)]

use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;

use blobfetch::transport::{
    parse_range_header, Body, Request, Response, Transport, TransportError,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RANGE};
use reqwest::{Method, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use wiremock::{Respond, ResponseTemplate};

/// Installs the env-filtered fmt subscriber; repeat calls are no-ops.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Deterministic pseudo-content of a given size.
pub fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Reads a response body to completion.
pub async fn read_body(mut body: Body) -> std::io::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    body.read_to_end(&mut bytes).await?;
    Ok(bytes)
}

// ==================== wiremock responder ====================

/// Serves a fixed payload the way a range-capable origin would: `206`
/// slices for single-range requests, a full `200` otherwise. `HEAD`
/// requests get the full-body template so the advertised
/// `Content-Length` matches the real size.
pub struct RangeResponder {
    data: Vec<u8>,
    advertise_ranges: bool,
    extra_headers: Vec<(String, String)>,
    delay: Option<Duration>,
}

impl RangeResponder {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            advertise_ranges: true,
            extra_headers: Vec::new(),
            delay: None,
        }
    }

    /// Stops advertising `Accept-Ranges: bytes`.
    pub fn without_range_support(mut self) -> Self {
        self.advertise_ranges = false;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.extra_headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Delays range (`206`) responses only; probes and plain GETs stay
    /// fast so tests can overlap sub-request transfers deterministically.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        let total = self.data.len() as u64;
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range_header);

        let mut template = match range {
            Some((start, end)) if request.method.as_str() == "GET" && start < total => {
                let end = end.unwrap_or(total - 1).min(total - 1);
                let slice = self.data[start as usize..=end as usize].to_vec();
                let mut template = ResponseTemplate::new(206)
                    .insert_header(
                        "Content-Range",
                        format!("bytes {start}-{end}/{total}").as_str(),
                    )
                    .set_body_bytes(slice);
                if let Some(delay) = self.delay {
                    template = template.set_delay(delay);
                }
                template
            }
            _ => ResponseTemplate::new(200).set_body_bytes(self.data.clone()),
        };

        if self.advertise_ranges {
            template = template.insert_header("Accept-Ranges", "bytes");
        }
        for (name, value) in &self.extra_headers {
            template = template.insert_header(name.as_str(), value.as_str());
        }
        template
    }
}

// ==================== in-process transports ====================

/// Builds a header map from string pairs, panicking on invalid input.
pub fn header_map(pairs: &[(&str, &str)]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        headers.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    headers
}

/// Builds a response with an in-memory body.
pub fn scripted_response(status: u16, pairs: &[(&str, &str)], body: Body) -> Response {
    Response {
        status: StatusCode::from_u16(status).unwrap(),
        headers: header_map(pairs),
        body,
    }
}

pub fn body_from(bytes: Vec<u8>) -> Body {
    Box::new(Cursor::new(bytes))
}

/// A body delivering `data[..good]` and then a `ConnectionReset` error.
pub fn failing_body(data: Vec<u8>, good: usize) -> Body {
    Box::new(FailingBody {
        data,
        pos: 0,
        good,
    })
}

struct FailingBody {
    data: Vec<u8>,
    pos: usize,
    good: usize,
}

impl AsyncRead for FailingBody {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.pos >= this.good {
            return Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "injected mid-stream failure",
            )));
        }
        let n = buf.remaining().min(this.good - this.pos);
        buf.put_slice(&this.data[this.pos..this.pos + n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

/// A transport scripted by a closure over (request, call index), with
/// every request recorded for later assertions.
pub struct ScriptedTransport {
    #[allow(clippy::type_complexity)]
    handler: Box<dyn Fn(&Request, usize) -> Result<Response, TransportError> + Send + Sync>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
    pub fn new(
        handler: impl Fn(&Request, usize) -> Result<Response, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn round_trip(&self, request: Request) -> Result<Response, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        (self.handler)(&request, call)
    }
}

/// Wraps a transport and tracks ranged GETs: the peak number
/// concurrently in flight, and how many ran to completion. The body is
/// buffered inside `round_trip` so both counts cover the whole
/// transfer, not just the headers.
pub struct CountingTransport<T> {
    inner: T,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completed: AtomicUsize,
}

impl<T> CountingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn completed_range_gets(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl<T: Transport> Transport for CountingTransport<T> {
    async fn round_trip(&self, request: Request) -> Result<Response, TransportError> {
        if request.method != Method::GET || !request.headers.contains_key(RANGE) {
            return self.inner.round_trip(request).await;
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = async {
            let response = self.inner.round_trip(request).await?;
            let bytes = read_body(response.body)
                .await
                .map_err(|e| TransportError::io("buffering counted response", e))?;
            Ok(Response {
                status: response.status,
                headers: response.headers,
                body: body_from(bytes),
            })
        }
        .await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if result.is_ok() {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        result
    }
}
