//! Stream reachability probes
//!
//! A probe never fails: every outcome is a `Verdict`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use m3u8_rs::{MediaSegment, Playlist};
use reqwest::{header, Client, Response};
use url::Url;

use crate::models::Verdict;

/// Upper bound on a downloaded HLS manifest
const MAX_MANIFEST_BYTES: usize = 2 * 1024 * 1024;
/// Bytes read to sniff a response with an uninformative content type
const SNIFF_BYTES: usize = 4096;
/// A non-HTML body longer than this counts as stream data
const MIN_MEDIA_BYTES: usize = 32;

const MEDIA_EXTENSIONS: &[&str] = &[".ts", ".mp4", ".mkv", ".flv", ".aac", ".mp3", ".m4s", ".m4a", ".avi"];
const MANIFEST_EXTENSIONS: &[&str] = &[".m3u8", ".m3u"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    pub verdict: Verdict,
    /// Whether any remote host answered at the transport level
    pub reached_host: bool,
}

impl ProbeReport {
    pub fn new(verdict: Verdict, reached_host: bool) -> Self {
        Self { verdict, reached_host }
    }

    fn answered(verdict: Verdict) -> Self {
        Self::new(verdict, true)
    }

    /// Map a request error to a verdict
    fn from_error(err: &reqwest::Error, reached_host: bool) -> Self {
        let verdict = if err.is_timeout() {
            Verdict::TimedOut
        } else {
            Verdict::Unreachable
        };
        Self::new(verdict, reached_host && !err.is_connect())
    }
}

/// Set once any host answers during a validation run
#[derive(Debug, Default)]
pub struct Reachability {
    answered: AtomicBool,
}

impl Reachability {
    pub fn mark(&self) {
        self.answered.store(true, Ordering::Relaxed);
    }

    pub fn any(&self) -> bool {
        self.answered.load(Ordering::Relaxed)
    }
}

/// Classifies a single stream URL
///
/// Implementations call `reach.mark()` as soon as a remote host answers, before
/// the probe finishes.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str, reach: &Reachability) -> ProbeReport;
}

fn content_type(response: &Response) -> String {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_lowercase()
}

fn is_media_type(content_type: &str) -> bool {
    content_type.starts_with("video/")
        || content_type.starts_with("audio/")
        || content_type.contains("octet-stream")
        || content_type.contains("mp2t")
}

fn has_extension(path: &str, extensions: &[&str]) -> bool {
    let path = path.to_lowercase();
    extensions.iter().any(|ext| path.ends_with(ext))
}

fn trimmed_prefix(body: &[u8]) -> &[u8] {
    let body = body.strip_prefix(b"\xef\xbb\xbf").unwrap_or(body);
    let start = body.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(body.len());
    &body[start..]
}

fn looks_like_html(body: &[u8]) -> bool {
    let head = trimmed_prefix(body);
    let head = &head[..head.len().min(64)];
    let lower = String::from_utf8_lossy(head).to_lowercase();
    lower.starts_with("<!doctype html") || lower.starts_with("<html")
}

fn looks_like_manifest(body: &[u8]) -> bool {
    trimmed_prefix(body).starts_with(b"#EXTM3U")
}

/// Append body chunks until `limit` bytes are buffered or the body ends
async fn read_prefix(response: &mut Response, buf: &mut Vec<u8>, limit: usize) -> reqwest::Result<()> {
    while buf.len() < limit {
        match response.chunk().await? {
            Some(chunk) => buf.extend_from_slice(&chunk),
            None => break,
        }
    }
    Ok(())
}

/// Probes over HTTP(S), following HLS master playlists and sampling segments
pub struct HttpProber {
    client: Client,
    segments_to_check: usize,
    max_depth: usize,
}

impl HttpProber {
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        segments_to_check: usize,
        max_depth: usize,
    ) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout)
            .timeout(timeout)
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            segments_to_check,
            max_depth,
        })
    }

    /// First N segments must all answer; the first bad one fails the playlist
    async fn check_segments(&self, base: &Url, segments: &[MediaSegment], reach: &Reachability) -> ProbeReport {
        for segment in segments.iter().take(self.segments_to_check.max(1)) {
            let segment_url = match base.join(&segment.uri) {
                Ok(url) => url,
                Err(_) => return ProbeReport::answered(Verdict::Malformed),
            };

            let response = match self
                .client
                .get(segment_url.clone())
                .header(header::RANGE, "bytes=0-1023")
                .send()
                .await
            {
                Ok(response) => {
                    reach.mark();
                    response
                }
                Err(e) => {
                    tracing::debug!(segment = %segment_url, error = %e, "Segment request failed");
                    return ProbeReport::from_error(&e, true);
                }
            };

            if !response.status().is_success() || content_type(&response).contains("text/html") {
                tracing::debug!(segment = %segment_url, status = %response.status(), "Bad segment");
                return ProbeReport::answered(Verdict::Unreachable);
            }
        }

        ProbeReport::answered(Verdict::Playable)
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str, reach: &Reachability) -> ProbeReport {
        let mut current = match Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => parsed,
            _ => return ProbeReport::new(Verdict::Malformed, false),
        };

        let mut depth = 0usize;
        loop {
            let mut response = match self.client.get(current.clone()).send().await {
                Ok(response) => {
                    reach.mark();
                    response
                }
                Err(e) => {
                    tracing::debug!(url = %current, error = %e, "Probe request failed");
                    return ProbeReport::from_error(&e, depth > 0);
                }
            };

            let status = response.status();
            if !status.is_success() {
                tracing::debug!(url = %current, status = %status, "Probe got error status");
                return ProbeReport::answered(Verdict::Unreachable);
            }

            let content_type = content_type(&response);
            if content_type.contains("text/html") {
                return ProbeReport::answered(Verdict::Unreachable);
            }

            let path = response.url().path().to_string();
            let manifest_hint =
                content_type.contains("mpegurl") || has_extension(&path, MANIFEST_EXTENSIONS);

            if !manifest_hint && (is_media_type(&content_type) || has_extension(&path, MEDIA_EXTENSIONS)) {
                return ProbeReport::answered(Verdict::Playable);
            }

            let limit = if manifest_hint { MAX_MANIFEST_BYTES } else { SNIFF_BYTES };
            let mut body = Vec::new();
            if let Err(e) = read_prefix(&mut response, &mut body, limit).await {
                return ProbeReport::from_error(&e, true);
            }

            if looks_like_html(&body) {
                return ProbeReport::answered(Verdict::Unreachable);
            }

            if !looks_like_manifest(&body) {
                let verdict = if manifest_hint && !body.is_empty() {
                    Verdict::Malformed
                } else if body.len() > MIN_MEDIA_BYTES {
                    Verdict::Playable
                } else {
                    Verdict::Unreachable
                };
                return ProbeReport::answered(verdict);
            }

            if !manifest_hint {
                if let Err(e) = read_prefix(&mut response, &mut body, MAX_MANIFEST_BYTES).await {
                    return ProbeReport::from_error(&e, true);
                }
            }

            // Redirects may have moved the manifest; resolve relative URIs against where it landed
            current = response.url().clone();

            match m3u8_rs::parse_playlist_res(&body) {
                Ok(Playlist::MasterPlaylist(master)) => {
                    let Some(variant) = master.variants.first() else {
                        return ProbeReport::answered(Verdict::Unreachable);
                    };
                    if depth >= self.max_depth {
                        tracing::debug!(url = %current, "Nested playlist too deep");
                        return ProbeReport::answered(Verdict::Unreachable);
                    }
                    current = match current.join(&variant.uri) {
                        Ok(next) => next,
                        Err(_) => return ProbeReport::answered(Verdict::Malformed),
                    };
                    depth += 1;
                }
                Ok(Playlist::MediaPlaylist(media)) => {
                    if media.segments.is_empty() {
                        return ProbeReport::answered(Verdict::Unreachable);
                    }
                    return self.check_segments(&current, &media.segments, reach).await;
                }
                Err(e) => {
                    tracing::debug!(url = %current, error = ?e, "Unparsable manifest");
                    return ProbeReport::answered(Verdict::Malformed);
                }
            }
        }
    }
}
