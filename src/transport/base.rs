//! The transport seam: [`Transport`], [`Request`], [`Response`], and the
//! reqwest-backed base implementation.
//!
//! A `Transport` is the drop-in unit of composition for this crate: the
//! parallel chunking layer and the resumable layer each wrap an
//! `Arc<dyn Transport>` and present themselves as one. Status codes are
//! not mapped to errors here — a `Response` carries whatever the server
//! said, and policy belongs to the wrapping layer or the caller.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::header::{ACCEPT_ENCODING, HeaderMap, HeaderValue, IF_RANGE, RANGE};
use reqwest::{Client, Method, StatusCode};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use url::Url;

use super::error::TransportError;
use super::headers::{format_range, scrub_conditional_headers};
use super::probe::Validator;

/// A streaming response body.
///
/// Everything above this layer sees one continuous byte stream,
/// whatever splitting or resuming happened underneath.
pub type Body = Box<dyn AsyncRead + Send + Unpin>;

/// An outgoing request: method, URL, and headers.
///
/// This layer only issues bodyless requests (`GET` and `HEAD`), so no
/// body is modeled.
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method.
    pub method: Method,
    /// Target URL.
    pub url: Url,
    /// Request headers, carried verbatim to the base transport.
    pub headers: HeaderMap,
}

impl Request {
    /// Creates a `GET` request with no extra headers.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Creates a request with an explicit method.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Derives a byte-range sub-request from this request.
    ///
    /// The clone keeps the caller's headers (auth, accept, ...) but:
    /// conditional headers are scrubbed, `Accept-Encoding: identity` is
    /// forced (compressed byte offsets are not addressable), the
    /// `Range` covers `[start, end]` (open-ended when `end` is `None`),
    /// and `If-Range` carries the validator when one exists.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidHeader`] if the validator value
    /// cannot be encoded as a header (it originally arrived in one, so
    /// this indicates a corrupted validator).
    pub fn ranged(
        &self,
        start: u64,
        end: Option<u64>,
        validator: Option<&Validator>,
    ) -> Result<Request, TransportError> {
        let mut request = self.clone();
        request.method = Method::GET;
        scrub_conditional_headers(&mut request.headers);
        request
            .headers
            .insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

        let range = HeaderValue::from_str(&format_range(start, end))
            .map_err(|e| TransportError::invalid_header("Range", e))?;
        request.headers.insert(RANGE, range);

        if let Some(validator) = validator {
            let value = HeaderValue::from_str(validator.header_value())
                .map_err(|e| TransportError::invalid_header("If-Range", e))?;
            request.headers.insert(IF_RANGE, value);
        } else {
            request.headers.remove(IF_RANGE);
        }

        Ok(request)
    }
}

/// An incoming response: status, headers, and a streaming body.
pub struct Response {
    /// HTTP status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Streaming body.
    pub body: Body,
}

impl Response {
    /// Returns a response header as a string slice, if present and valid UTF-8.
    #[must_use]
    pub fn header_str(&self, name: reqwest::header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// One hop of the HTTP stack.
///
/// Implementations must be cheap to share (`Arc<dyn Transport>`); both
/// wrapping transports in this crate hold their base that way, and
/// composition (resumable wrapping parallel, or either alone) is done
/// by the distribution client that configures the stack.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request and returns the raw response.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] only for transport-level failures;
    /// non-2xx statuses are returned as responses, not errors.
    async fn round_trip(&self, request: Request) -> Result<Response, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn round_trip(&self, request: Request) -> Result<Response, TransportError> {
        (**self).round_trip(request).await
    }
}

/// Base transport backed by a [`reqwest::Client`].
///
/// The client is built without automatic decompression: range offsets
/// must address the raw representation, and transparent gzip would
/// silently break chunk-boundary arithmetic.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    /// Creates a base transport with a default client.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let client = Client::builder()
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Creates a base transport over a caller-configured client.
    ///
    /// The caller is responsible for keeping automatic decompression
    /// off if the transport will serve ranged fetches.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn round_trip(&self, request: Request) -> Result<Response, TransportError> {
        let url = request.url.to_string();
        let response = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .send()
            .await
            .map_err(|e| TransportError::network(&url, e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let stream = response.bytes_stream().map_err(std::io::Error::other);

        Ok(Response {
            status,
            headers,
            body: Box::new(StreamReader::new(stream)),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH};

    use super::*;

    fn request_with_conditionals() -> Request {
        let mut request = Request::get(Url::parse("https://example.com/blob").unwrap());
        request
            .headers
            .insert(IF_NONE_MATCH, HeaderValue::from_static("\"stale\""));
        request.headers.insert(
            IF_MODIFIED_SINCE,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        request
            .headers
            .insert(ETAG, HeaderValue::from_static("\"not-a-request-header\""));
        request
    }

    #[test]
    fn test_ranged_scrubs_conditionals_and_forces_identity() {
        let request = request_with_conditionals();
        let sub = request.ranged(0, Some(99), None).unwrap();

        assert!(!sub.headers.contains_key(IF_NONE_MATCH));
        assert!(!sub.headers.contains_key(IF_MODIFIED_SINCE));
        assert_eq!(sub.headers.get(ACCEPT_ENCODING).unwrap(), "identity");
        assert_eq!(sub.headers.get(RANGE).unwrap(), "bytes=0-99");
        assert!(!sub.headers.contains_key(IF_RANGE));
        // Unrelated headers ride along
        assert!(sub.headers.contains_key(ETAG));
    }

    #[test]
    fn test_ranged_sets_if_range_from_validator() {
        let request = Request::get(Url::parse("https://example.com/blob").unwrap());
        let validator = Validator::Etag("\"v1\"".to_string());
        let sub = request.ranged(2500, None, Some(&validator)).unwrap();

        assert_eq!(sub.headers.get(RANGE).unwrap(), "bytes=2500-");
        assert_eq!(sub.headers.get(IF_RANGE).unwrap(), "\"v1\"");
    }

    #[test]
    fn test_ranged_is_always_get() {
        let request = Request::new(Method::HEAD, Url::parse("https://example.com/b").unwrap());
        let sub = request.ranged(0, Some(0), None).unwrap();
        assert_eq!(sub.method, Method::GET);
    }

    #[test]
    fn test_http_transport_rejects_unsupported_scheme() {
        let transport = HttpTransport::new();
        let request = Request::get(Url::parse("ftp://example.com/blob").unwrap());
        let result = tokio_test::block_on(transport.round_trip(request));
        assert!(matches!(result, Err(TransportError::Network { .. })));
    }
}
