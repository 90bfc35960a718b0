//! Range and validator header utilities.
//!
//! Pure helpers shared by the capability probe, the parallel chunking
//! transport, and the resumable transport. Malformed headers are an
//! expected condition when talking to uncooperative registries, so
//! parse failures are reported as `None`/`false` rather than errors.

use reqwest::header::{
    ACCEPT_RANGES, CONTENT_ENCODING, HeaderMap, IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    IF_UNMODIFIED_SINCE,
};

/// A parsed `Content-Range: bytes <start>-<end>/<total>` header.
///
/// `start` and `end` are inclusive byte offsets, as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// First byte offset covered by the response.
    pub start: u64,
    /// Last byte offset covered by the response (inclusive).
    pub end: u64,
    /// Total size of the full representation.
    pub total: u64,
}

/// Parses a `Content-Range` header value.
///
/// Returns `None` for anything other than a well-formed
/// `bytes <start>-<end>/<total>` with `start <= end < total`. Unknown
/// totals (`bytes <start>-<end>/*`) and unsatisfied ranges
/// (`bytes */<total>`) are reported as `None` too: neither gives the
/// caller a byte range it can stitch.
///
/// # Examples
///
/// ```
/// use blobfetch::transport::parse_content_range;
///
/// let range = parse_content_range("bytes 0-499/1000").unwrap();
/// assert_eq!((range.start, range.end, range.total), (0, 499, 1000));
///
/// assert!(parse_content_range("bytes 0-499/*").is_none());
/// assert!(parse_content_range("items 0-499/1000").is_none());
/// ```
#[must_use]
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.split_once('-')?;

    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    let total: u64 = total.trim().parse().ok()?;

    if start > end || end >= total {
        return None;
    }

    Some(ContentRange { start, end, total })
}

/// Returns true iff the `Accept-Ranges` header advertises byte ranges.
///
/// Tolerates a comma-separated unit list and mixed case; `none` (or an
/// absent header) means the server did not offer ranging.
#[must_use]
pub fn supports_byte_ranges(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            v.split(',')
                .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"))
        })
}

/// Returns true iff the response is content-encoded (a non-empty
/// `Content-Encoding` other than `identity`).
///
/// Byte offsets into an encoded representation are not addressable, so
/// this precludes both ranged fan-out and mid-stream resumption.
#[must_use]
pub fn content_is_encoded(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.is_empty() && !v.eq_ignore_ascii_case("identity"))
}

/// Returns true iff the ETag value is weak (`W/` prefix).
///
/// Weak ETags promise only semantic equivalence, so they must never be
/// used as `If-Range` validators for byte-exact stitching.
#[must_use]
pub fn is_weak_etag(value: &str) -> bool {
    value.trim_start().starts_with("W/")
}

/// Removes conditional request headers that must not accompany a range
/// sub-request.
///
/// `If-Match`, `If-None-Match`, `If-Modified-Since` and
/// `If-Unmodified-Since` can turn a range fetch into a `304` or `412`
/// mid-download; only `If-Range` is allowed to influence the sub-request.
pub fn scrub_conditional_headers(headers: &mut HeaderMap) {
    headers.remove(IF_MATCH);
    headers.remove(IF_NONE_MATCH);
    headers.remove(IF_MODIFIED_SINCE);
    headers.remove(IF_UNMODIFIED_SINCE);
}

/// Parses a caller-supplied single-range `Range: bytes=<start>-[<end>]`
/// header value into `(start, Option<end>)` with an inclusive end.
///
/// Multi-range and suffix-range (`bytes=-500`) forms return `None`;
/// the resumable transport treats those requests as unresumable rather
/// than guessing at offsets.
#[must_use]
pub fn parse_range_header(value: &str) -> Option<(u64, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes=")?;
    if rest.contains(',') {
        return None;
    }
    let (start, end) = rest.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end = end.trim();
    if end.is_empty() {
        return Some((start, None));
    }
    let end: u64 = end.parse().ok()?;
    if end < start {
        return None;
    }
    Some((start, Some(end)))
}

/// Formats a `Range` header value for `[start, end]` (inclusive end) or
/// an open-ended `bytes=<start>-` when `end` is `None`.
#[must_use]
pub fn format_range(start: u64, end: Option<u64>) -> String {
    match end {
        Some(end) => format!("bytes={start}-{end}"),
        None => format!("bytes={start}-"),
    }
}
