//! Capability probe: one `HEAD` to learn whether a resource can be
//! fetched in parallel byte ranges, and which validator can guard the
//! sub-requests.

use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, ETAG, HeaderMap, LAST_MODIFIED};
use reqwest::{Method, StatusCode};
use tracing::{debug, warn};

use super::base::{Request, Transport};
use super::headers::{content_is_encoded, is_weak_etag, parse_content_range, supports_byte_ranges};

/// A consistency validator usable in an `If-Range` header.
///
/// Only strong ETags qualify; weak ETags (`W/...`) promise semantic
/// equivalence, not byte identity, and are skipped in favor of
/// `Last-Modified`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validator {
    /// A strong entity tag, stored with its quotes as received.
    Etag(String),
    /// An HTTP-date `Last-Modified` value.
    LastModified(String),
}

impl Validator {
    /// Returns the value to send in an `If-Range` header.
    #[must_use]
    pub fn header_value(&self) -> &str {
        match self {
            Self::Etag(value) | Self::LastModified(value) => value,
        }
    }
}

/// Selects the strongest usable validator from response headers.
///
/// Preference order: strong `ETag`, then `Last-Modified` (only if it
/// parses as an HTTP-date), then none. A missing validator does not
/// block ranged fetching — it just leaves the fetch unguarded.
#[must_use]
pub fn select_validator(headers: &HeaderMap) -> Option<Validator> {
    if let Some(etag) = headers.get(ETAG).and_then(|v| v.to_str().ok()) {
        if !etag.is_empty() && !is_weak_etag(etag) {
            return Some(Validator::Etag(etag.to_string()));
        }
    }

    headers
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .filter(|date| httpdate::parse_http_date(date).is_ok())
        .map(|date| Validator::LastModified(date.to_string()))
}

/// What one capability probe learned about a resource.
///
/// Produced once per request and consumed immutably by the parallel
/// transport; the resumable transport derives the same facts from its
/// initial response instead of probing.
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    /// Total representation size, when the server disclosed one.
    pub total_size: Option<u64>,
    /// Whether the server advertises `Accept-Ranges: bytes`.
    pub supports_range: bool,
    /// Validator to guard sub-requests with, if any.
    pub validator: Option<Validator>,
    /// Whether the representation is content-encoded. Compressed byte
    /// offsets are not addressable, so this precludes ranging.
    pub content_encoded: bool,
}

impl ResourceInfo {
    /// Derives capability info from a probe response's status and headers.
    ///
    /// Total size comes from `Content-Length`, or from the
    /// `Content-Range` total when the probe itself was answered `206`.
    #[must_use]
    pub fn from_response(status: StatusCode, headers: &HeaderMap) -> Self {
        let content_encoded = content_is_encoded(headers);

        let mut total_size = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        if total_size.is_none() && status == StatusCode::PARTIAL_CONTENT {
            total_size = headers
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range)
                .map(|range| range.total);
        }

        Self {
            total_size,
            supports_range: supports_byte_ranges(headers),
            validator: select_validator(headers),
            content_encoded,
        }
    }

    /// Returns true when the resource can be split into byte-range
    /// sub-requests: range support advertised, size known, and no
    /// content encoding in the way.
    #[must_use]
    pub fn parallelizable(&self) -> bool {
        self.supports_range && !self.content_encoded && self.total_size.is_some()
    }
}

/// Probes a resource by cloning the caller's request as a `HEAD`.
///
/// Returns `Ok(None)` when the probe itself failed (transport error or
/// non-success status): the policy here is to degrade gracefully to a
/// direct sequential fetch, the same way every other ineligibility
/// does, rather than abort the whole GET over a probe hiccup.
pub(crate) async fn probe<T: Transport + ?Sized>(
    transport: &T,
    request: &Request,
) -> Option<ResourceInfo> {
    let mut head = request.clone();
    head.method = Method::HEAD;

    let response = match transport.round_trip(head).await {
        Ok(response) => response,
        Err(error) => {
            warn!(url = %request.url, error = %error, "capability probe failed, falling back to direct fetch");
            return None;
        }
    };

    if !(response.status.is_success()) {
        warn!(
            url = %request.url,
            status = response.status.as_u16(),
            "capability probe rejected, falling back to direct fetch"
        );
        return None;
    }

    let info = ResourceInfo::from_response(response.status, &response.headers);
    debug!(
        url = %request.url,
        total_size = ?info.total_size,
        supports_range = info.supports_range,
        content_encoded = info.content_encoded,
        has_validator = info.validator.is_some(),
        "capability probe complete"
    );
    Some(info)
}
