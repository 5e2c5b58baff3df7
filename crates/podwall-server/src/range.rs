//! `Range` request header parsing.
//!
//! Only the first `bytes=start-end` range is honoured. Anything malformed or
//! unsatisfiable is ignored so the caller serves the full content instead.

/// Inclusive byte range within a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered (`end - start + 1`).
    pub(crate) fn len(&self) -> u64 {
        self.end.saturating_sub(self.start).saturating_add(1)
    }

    /// `Content-Range` header value for a resource of `total` bytes.
    pub(crate) fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Parse a single `bytes=start-end` range against a resource of `total_len` bytes.
///
/// `end` is optional and defaults to the last byte; an `end` past the resource
/// is clamped. Suffix ranges (`bytes=-N`), non-byte units, reversed ranges and
/// ranges starting at or past the end return `None`.
pub(crate) fn parse_single_range(header: &str, total_len: u64) -> Option<ByteRange> {
    let header = header.trim();
    let range = header.strip_prefix("bytes=")?;
    let first = range.split(',').next()?.trim();
    let (start_s, end_s) = first.split_once('-')?;
    if start_s.is_empty() {
        return None;
    }
    let start = start_s.trim().parse::<u64>().ok()?;
    let last = total_len.checked_sub(1)?;
    let end = if end_s.trim().is_empty() {
        last
    } else {
        end_s.trim().parse::<u64>().ok()?
    };
    if start > last || end < start {
        return None;
    }
    Some(ByteRange {
        start,
        end: end.min(last),
    })
}

/// Resolve an optional `Range` header, logging when a malformed one is ignored.
pub(crate) fn requested_range(header: Option<&str>, total_len: u64) -> Option<ByteRange> {
    let header = header?;
    let range = parse_single_range(header, total_len);
    if range.is_none() {
        tracing::debug!(range = header, total_len, "ignoring unusable range header");
    }
    range
}
