//! Byte-range grammar and conditional-request evaluation.

use std::time::SystemTime;

/// A parsed `Range: bytes=...` header (single range only; multipart
/// ranges are served as the full file).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ByteRange {
    /// `bytes=a-b` (inclusive).
    FromTo(u64, u64),
    /// `bytes=a-`.
    From(u64),
    /// `bytes=-b`: the last `b` bytes.
    Last(u64),
}

pub(crate) fn parse_range(header: &str) -> Option<ByteRange> {
    let spec = header.strip_prefix("bytes=")?.trim();
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    match (start.is_empty(), end.is_empty()) {
        (true, false) => end.parse().ok().map(ByteRange::Last),
        (false, true) => start.parse().ok().map(ByteRange::From),
        (false, false) => {
            let (start, end) = (start.parse().ok()?, end.parse().ok()?);
            (start <= end).then_some(ByteRange::FromTo(start, end))
        }
        (true, true) => None,
    }
}

/// Resolve against the total size into inclusive bounds, `None` when
/// unsatisfiable.
pub(crate) fn resolve_range(range: ByteRange, size: u64) -> Option<(u64, u64)> {
    if size == 0 {
        return None;
    }
    match range {
        ByteRange::FromTo(start, end) => {
            (start < size).then_some((start, end.min(size - 1)))
        }
        ByteRange::From(start) => (start < size).then_some((start, size - 1)),
        ByteRange::Last(count) => {
            if count == 0 {
                return None;
            }
            Some((size.saturating_sub(count), size - 1))
        }
    }
}

/// Weak validator derived from file size and modification date.
pub(crate) fn etag(size: u64, modified: SystemTime) -> String {
    let since_epoch = modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    format!(
        "\"{:x}-{:x}-{:x}\"",
        since_epoch.as_secs(),
        since_epoch.subsec_nanos(),
        size
    )
}

/// `If-None-Match` evaluation: any listed tag matching (or `*`)
/// short-circuits to 304.
pub(crate) fn none_match(header: &str, current: &str) -> bool {
    header
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate == current)
}

/// `If-Range` matches by ETag or by the exact `Last-Modified` text; a
/// non-match drops the range and returns the full file.
pub(crate) fn if_range_matches(header: &str, current_etag: &str, last_modified: &str) -> bool {
    let header = header.trim();
    header == current_etag || header == last_modified
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn range_grammar() {
        assert_eq!(parse_range("bytes=100-3999"), Some(ByteRange::FromTo(100, 3999)));
        assert_eq!(parse_range("bytes=100-"), Some(ByteRange::From(100)));
        assert_eq!(parse_range("bytes=-500"), Some(ByteRange::Last(500)));
        assert_eq!(parse_range("bytes=-"), None);
        assert_eq!(parse_range("bytes=5-2"), None);
        assert_eq!(parse_range("bytes=0-10,20-30"), None);
        assert_eq!(parse_range("items=0-10"), None);
    }

    #[test]
    fn range_resolution() {
        assert_eq!(
            resolve_range(ByteRange::FromTo(100, 3999), 326000),
            Some((100, 3999))
        );
        // End clamps to the file size.
        assert_eq!(
            resolve_range(ByteRange::FromTo(0, 999_999), 1000),
            Some((0, 999))
        );
        assert_eq!(resolve_range(ByteRange::From(990), 1000), Some((990, 999)));
        assert_eq!(resolve_range(ByteRange::Last(10), 1000), Some((990, 999)));
        assert_eq!(resolve_range(ByteRange::Last(5000), 1000), Some((0, 999)));
        assert_eq!(resolve_range(ByteRange::From(1000), 1000), None);
        assert_eq!(resolve_range(ByteRange::FromTo(0, 10), 0), None);
    }

    #[test]
    fn etag_changes_with_inputs() {
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let a = etag(100, base);
        assert_eq!(a, etag(100, base));
        assert_ne!(a, etag(101, base));
        assert_ne!(a, etag(100, base + Duration::from_secs(1)));
    }

    #[test]
    fn none_match_lists() {
        let tag = "\"abc\"";
        assert!(none_match("\"abc\"", tag));
        assert!(none_match("\"x\", \"abc\"", tag));
        assert!(none_match("*", tag));
        assert!(!none_match("\"x\"", tag));
    }
}
