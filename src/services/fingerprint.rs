//! Entry fingerprints used to recognise the same stream across sources

use lazy_static::lazy_static;
use regex::Regex;
use sha1::{Digest, Sha1};
use url::{form_urlencoded, Url};

use crate::models::ChannelEntry;

/// Query parameters that vary between fetches of the same stream
const VOLATILE_PARAMS: &[&str] = &["token", "auth", "session", "time", "timestamp"];

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Generate SHA1 hex digest (40 chars)
pub fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Canonical form of a stream URL
///
/// Lowercased, fragment and default port dropped, volatile parameters
/// removed, remaining parameters sorted, trailing slashes and an empty
/// query removed.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let parsed = match Url::parse(trimmed) {
        Ok(parsed) => parsed,
        Err(_) => return trimmed.trim_end_matches('/').to_lowercase(),
    };

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !VOLATILE_PARAMS.contains(&key.to_lowercase().as_str()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    pairs.sort();

    let mut normalized = format!("{}://", parsed.scheme());
    if !parsed.username().is_empty() {
        normalized.push_str(parsed.username());
        if let Some(password) = parsed.password() {
            normalized.push(':');
            normalized.push_str(password);
        }
        normalized.push('@');
    }
    normalized.push_str(parsed.host_str().unwrap_or_default());
    if let Some(port) = parsed.port() {
        normalized.push_str(&format!(":{}", port));
    }
    normalized.push_str(parsed.path().trim_end_matches('/'));

    if !pairs.is_empty() {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        normalized.push('?');
        normalized.push_str(&query);
    }

    normalized.to_lowercase()
}

/// Lowercase, trimmed, whitespace-collapsed display name
pub fn normalize_name(name: &str) -> String {
    WHITESPACE.replace_all(name.trim(), " ").to_lowercase()
}

/// Computes fingerprints; pure and stable across runs
#[derive(Debug, Clone, Copy, Default)]
pub struct Fingerprinter {
    include_name: bool,
}

impl Fingerprinter {
    pub fn new(include_name: bool) -> Self {
        Self { include_name }
    }

    pub fn fingerprint(&self, entry: &ChannelEntry) -> String {
        let url = normalize_url(&entry.url);
        if self.include_name {
            sha1_hex(&format!("{}|{}", url, normalize_name(&entry.name)))
        } else {
            sha1_hex(&url)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_hex() {
        let hash = sha1_hex("http://example.com/playlist.m3u");
        assert_eq!(hash.len(), 40);
    }

    #[test]
    fn test_normalize_collapses_trivial_differences() {
        let expected = "http://a/1";
        assert_eq!(normalize_url("http://a/1"), expected);
        assert_eq!(normalize_url("http://a/1?"), expected);
        assert_eq!(normalize_url("http://a/1/"), expected);
        assert_eq!(normalize_url("HTTP://A/1"), expected);
        assert_eq!(normalize_url("http://a:80/1#frag"), expected);
        assert_eq!(normalize_url("  http://a/1  "), expected);
    }

    #[test]
    fn test_normalize_sorts_and_filters_query() {
        assert_eq!(
            normalize_url("http://a/live.m3u8?b=2&a=1"),
            normalize_url("http://a/live.m3u8?a=1&b=2")
        );
        assert_eq!(
            normalize_url("http://a/live.m3u8?id=7&token=abc&Timestamp=1"),
            "http://a/live.m3u8?id=7"
        );
    }

    #[test]
    fn test_distinct_streams_stay_distinct() {
        assert_ne!(normalize_url("http://a/1"), normalize_url("http://a/2"));
        assert_ne!(normalize_url("http://a/1?id=1"), normalize_url("http://a/1?id=2"));
    }

    #[test]
    fn test_fingerprint_with_name() {
        let url_only = Fingerprinter::default();
        let with_name = Fingerprinter::new(true);
        let a = ChannelEntry::new("ESPN  HD", "http://a/1");
        let b = ChannelEntry::new("espn hd", "http://a/1/");
        let c = ChannelEntry::new("ESPN 2", "http://a/1");

        assert_eq!(url_only.fingerprint(&a), url_only.fingerprint(&c));
        assert_eq!(with_name.fingerprint(&a), with_name.fingerprint(&b));
        assert_ne!(with_name.fingerprint(&a), with_name.fingerprint(&c));
    }
}
