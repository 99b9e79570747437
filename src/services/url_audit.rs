//! Stream URL audit and repair
//!
//! Hard issues reject a record at ingestion; soft issues are only reported.

use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

/// Schemes a playlist entry may legitimately carry
const VALID_SCHEMES: &[&str] = &[
    "http", "https", "rtmp", "rtmps", "rtsp", "udp", "rtp", "mms", "mmsh",
];

/// Players start truncating beyond this
const MAX_RECOMMENDED_URL_LEN: usize = 2048;

lazy_static! {
    static ref REPEATED_SLASHES: Regex = Regex::new(r"/{2,}").unwrap();
    static ref HOST_LIKE: Regex = Regex::new(r"^[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)+(:\d+)?(/|$)").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlIssue {
    Empty,
    MissingScheme,
    MissingHost,
    ControlCharacters,
    Unparsable(String),
    UnsupportedScheme(String),
    UnencodedSpaces,
    DoubleSlashInPath,
    PathTraversal,
    NonStandardPort(u16),
    TooLong(usize),
}

impl UrlIssue {
    /// Hard issues make the URL unusable
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            UrlIssue::Empty
                | UrlIssue::MissingScheme
                | UrlIssue::MissingHost
                | UrlIssue::ControlCharacters
                | UrlIssue::Unparsable(_)
        )
    }
}

impl std::fmt::Display for UrlIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UrlIssue::Empty => write!(f, "empty URL"),
            UrlIssue::MissingScheme => write!(f, "missing protocol scheme"),
            UrlIssue::MissingHost => write!(f, "missing host"),
            UrlIssue::ControlCharacters => write!(f, "contains newline or tab characters"),
            UrlIssue::Unparsable(e) => write!(f, "URL parsing failed: {}", e),
            UrlIssue::UnsupportedScheme(s) => write!(f, "unsupported protocol: {}", s),
            UrlIssue::UnencodedSpaces => write!(f, "contains unencoded spaces"),
            UrlIssue::DoubleSlashInPath => write!(f, "double slashes in URL path"),
            UrlIssue::PathTraversal => write!(f, "path traversal detected (..)"),
            UrlIssue::NonStandardPort(p) => write!(f, "non-standard port: {}", p),
            UrlIssue::TooLong(len) => write!(f, "URL too long ({} chars)", len),
        }
    }
}

/// Audit a URL and list every issue found
pub fn audit(raw: &str) -> Vec<UrlIssue> {
    let url = raw.trim();
    if url.is_empty() {
        return vec![UrlIssue::Empty];
    }
    if url.chars().any(|c| c == '\n' || c == '\r' || c == '\t') {
        return vec![UrlIssue::ControlCharacters];
    }
    if url.starts_with("://") || !url.contains("://") {
        return vec![UrlIssue::MissingScheme];
    }

    let mut issues = Vec::new();
    if url.contains(' ') {
        issues.push(UrlIssue::UnencodedSpaces);
    }

    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(url::ParseError::EmptyHost) => {
            issues.push(UrlIssue::MissingHost);
            return issues;
        }
        Err(e) => {
            issues.push(UrlIssue::Unparsable(e.to_string()));
            return issues;
        }
    };

    let scheme = parsed.scheme();
    if !VALID_SCHEMES.contains(&scheme) {
        issues.push(UrlIssue::UnsupportedScheme(scheme.to_string()));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        issues.push(UrlIssue::MissingHost);
    }

    let path = parsed.path();
    if path.len() > 1 && path[1..].contains("//") {
        issues.push(UrlIssue::DoubleSlashInPath);
    }
    // Url normalizes dot segments away, so look at the raw text
    if url.contains("/../") || url.ends_with("/..") {
        issues.push(UrlIssue::PathTraversal);
    }

    if let Some(port) = parsed.port() {
        let standard = match scheme {
            "http" => matches!(port, 80 | 8080 | 8000 | 8888),
            "https" => matches!(port, 443 | 8443),
            _ => true,
        };
        if !standard {
            issues.push(UrlIssue::NonStandardPort(port));
        }
    }

    if url.len() > MAX_RECOMMENDED_URL_LEN {
        issues.push(UrlIssue::TooLong(url.len()));
    }

    issues
}

/// Attempt to repair common URL mistakes
pub fn fix(raw: &str) -> String {
    let mut url: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '\n' | '\r' | '\t'))
        .collect();
    url = url.replace(' ', "%20");

    if !url.contains("://") && HOST_LIKE.is_match(&url) {
        url = format!("http://{}", url);
    }

    // Collapse repeated slashes in the path only, leaving the query untouched
    if let Some((scheme, rest)) = url.split_once("://") {
        let (path_part, query_part) = match rest.find(['?', '#']) {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        let path_part = REPEATED_SLASHES.replace_all(path_part, "/");
        url = format!("{}://{}{}", scheme, path_part, query_part);
    }

    url
}

/// Outcome of running a URL through audit and, if needed, repair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checked {
    /// Usable as given; soft issues may still be present
    Valid { url: String, issues: Vec<UrlIssue> },
    /// Usable after repair
    Fixed { original: String, url: String },
    /// Unusable even after repair
    Rejected { issues: Vec<UrlIssue> },
}

pub fn check(raw: &str) -> Checked {
    let issues = audit(raw);
    if !issues.iter().any(UrlIssue::is_hard) && !issues.contains(&UrlIssue::UnencodedSpaces) {
        return Checked::Valid {
            url: raw.trim().to_string(),
            issues,
        };
    }

    let fixed = fix(raw);
    let after = audit(&fixed);
    if after.iter().any(UrlIssue::is_hard) {
        Checked::Rejected { issues: after }
    } else {
        Checked::Fixed {
            original: raw.trim().to_string(),
            url: fixed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_clean_url() {
        assert!(audit("http://example.com/live/1.m3u8").is_empty());
        assert!(audit("https://cdn.example.com:8443/a.ts?x=1").is_empty());
    }

    #[test]
    fn test_audit_hard_issues() {
        assert_eq!(audit("   "), vec![UrlIssue::Empty]);
        assert_eq!(audit("example.com/live"), vec![UrlIssue::MissingScheme]);
        assert_eq!(audit("://example.com"), vec![UrlIssue::MissingScheme]);
        assert_eq!(audit("http://exa\tmple.com"), vec![UrlIssue::ControlCharacters]);
        assert_eq!(audit("http://"), vec![UrlIssue::MissingHost]);
    }

    #[test]
    fn test_audit_soft_issues() {
        let issues = audit("http://example.com:1935/live//a/../b.ts");
        assert!(issues.contains(&UrlIssue::NonStandardPort(1935)));
        assert!(issues.contains(&UrlIssue::DoubleSlashInPath));
        assert!(issues.contains(&UrlIssue::PathTraversal));
        assert!(!issues.iter().any(UrlIssue::is_hard));
    }

    #[test]
    fn test_fix_common_mistakes() {
        assert_eq!(fix(" example.com/live/a b.ts "), "http://example.com/live/a%20b.ts");
        assert_eq!(
            fix("http://example.com//live///a.ts?u=http://x"),
            "http://example.com/live/a.ts?u=http://x"
        );
    }

    #[test]
    fn test_check_outcomes() {
        assert!(matches!(check("http://example.com/a.ts"), Checked::Valid { .. }));
        match check("example.com/a.ts") {
            Checked::Fixed { url, .. } => assert_eq!(url, "http://example.com/a.ts"),
            other => panic!("expected fix, got {:?}", other),
        }
        assert!(matches!(check("not a url"), Checked::Rejected { .. }));
    }
}
