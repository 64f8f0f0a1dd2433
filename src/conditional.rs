//! Conditional-request evaluation (`If-None-Match`, `If-Modified-Since`).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http::header::{IF_MODIFIED_SINCE, IF_NONE_MATCH};
use http::HeaderMap;

/// `true` when the client's copy is current and a 304 should be sent.
///
/// Either validator is sufficient on its own. `etag` is `None` when ETags are
/// disabled, in which case `If-None-Match` is ignored entirely.
pub fn is_not_modified(headers: &HeaderMap, etag: Option<&str>, modified: SystemTime) -> bool {
    if let Some(etag) = etag {
        let matched = headers
            .get(IF_NONE_MATCH)
            .and_then(|value| value.to_str().ok())
            .map_or(false, |value| etag_matches(value, etag));
        if matched {
            return true;
        }
    }

    headers
        .get(IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .map_or(false, |value| not_modified_since(value, modified))
}

/// Opaque comparison against each listed tag; `*` matches anything.
pub fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate == etag)
}

/// Compares at whole-second resolution, since that is all an HTTP date
/// carries. Unparseable dates never match.
pub fn not_modified_since(if_modified_since: &str, modified: SystemTime) -> bool {
    match httpdate::parse_http_date(if_modified_since.trim()) {
        Ok(since) => unix_secs(modified) <= unix_secs(since),
        Err(_) => false,
    }
}

pub fn format_http_date(time: SystemTime) -> String {
    httpdate::fmt_http_date(time)
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    const ETAG: &str = "\"00000000deadbeef\"";

    fn at(secs: u64, nanos: u32) -> SystemTime {
        UNIX_EPOCH + Duration::new(secs, nanos)
    }

    #[test]
    fn etag_list_and_wildcard() {
        assert!(etag_matches(ETAG, ETAG));
        assert!(etag_matches(&format!("\"other\", {}", ETAG), ETAG));
        assert!(etag_matches("*", ETAG));
        assert!(!etag_matches("\"00000000deadbeee\"", ETAG));
        assert!(!etag_matches("00000000deadbeef", ETAG));
    }

    #[test]
    fn modified_since_ignores_subsecond_precision() {
        let modified = at(1_700_000_000, 999_999_999);
        let header = format_http_date(at(1_700_000_000, 0));
        assert!(not_modified_since(&header, modified));
        assert!(!not_modified_since(&format_http_date(at(1_699_999_999, 0)), modified));
        assert!(not_modified_since(&format_http_date(at(1_800_000_000, 0)), modified));
        assert!(!not_modified_since("yesterday", modified));
    }

    #[test]
    fn disabled_etag_ignores_if_none_match() {
        let mut headers = HeaderMap::new();
        headers.insert(IF_NONE_MATCH, HeaderValue::from_static(ETAG));
        assert!(is_not_modified(&headers, Some(ETAG), at(10, 0)));
        assert!(!is_not_modified(&headers, None, at(10, 0)));
    }

    #[test]
    fn either_validator_suffices() {
        let mut headers = HeaderMap::new();
        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("\"stale\""));
        headers.insert(
            IF_MODIFIED_SINCE,
            HeaderValue::from_str(&format_http_date(at(100, 0))).unwrap(),
        );
        assert!(is_not_modified(&headers, Some(ETAG), at(100, 0)));
        assert!(!is_not_modified(&headers, Some(ETAG), at(101, 0)));
    }
}
