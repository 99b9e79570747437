//! Playlist sources: local files, remote URLs, and the catalog that lists them

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use tokio::time::sleep;

use crate::error::{PipelineError, Result};
use crate::models::{Collection, Trust};
use crate::services::fingerprint::normalize_url;
use crate::services::m3u_parser::{parse_playlist, ParseReport};

/// Nested playlist links are followed at most this deep
pub const MAX_NESTED_DEPTH: usize = 3;

const PLAYLIST_EXTENSIONS: &[&str] = &["m3u", "m3u8"];

/// Anything that can deliver a collection for one run
#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    fn trust(&self) -> Trust {
        Trust::Trusted
    }

    /// Fetch and parse; failures are per-source and never abort a run
    async fn produce(&self) -> Result<ParseReport>;
}

/// Playlist file on local disk
#[derive(Debug, Clone)]
pub struct FileSource {
    name: String,
    path: PathBuf,
    trust: Trust,
}

impl FileSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, trust: Trust) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            trust,
        }
    }
}

#[async_trait]
impl Source for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn trust(&self) -> Trust {
        self.trust
    }

    async fn produce(&self) -> Result<ParseReport> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| PipelineError::source_unavailable(&self.name, format!("{}: {}", self.path.display(), e)))?;
        parse_playlist(&String::from_utf8_lossy(&bytes))
    }
}

/// HTTP client with retry, backoff and a size limit
pub struct Fetcher {
    client: Client,
    max_retries: u32,
    max_bytes: u64,
}

impl Fetcher {
    pub fn new(user_agent: &str, timeout: Duration, max_retries: u32, max_m3u_size_mb: usize) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            max_retries,
            max_bytes: (max_m3u_size_mb as u64) * 1024 * 1024,
        })
    }

    /// Fetch URL with retry/backoff for transient errors (429/network)
    async fn fetch_with_retry(&self, url: &str) -> std::result::Result<Response, String> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    if resp.status().is_success() {
                        if let Some(len) = resp.content_length() {
                            if len > self.max_bytes {
                                return Err(format!(
                                    "playlist too large: {:.1}MB (limit {}MB)",
                                    len as f64 / 1024f64 / 1024f64,
                                    self.max_bytes / 1024 / 1024
                                ));
                            }
                        }

                        return Ok(resp);
                    }

                    let status = resp.status();
                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS && attempt < self.max_retries {
                        let backoff_ms = (1u64 << attempt).saturating_mul(500).min(10_000);
                        tracing::warn!("fetch_retry" = attempt + 1, "reason" = "429", "backoff_ms" = backoff_ms);
                        sleep(Duration::from_millis(backoff_ms)).await;
                        continue;
                    }

                    let reason = status.canonical_reason().unwrap_or("Error");
                    return Err(format!("HTTP {}: {}", status.as_u16(), reason));
                }
                Err(err) => {
                    if attempt < self.max_retries {
                        let backoff_ms = (1u64 << attempt).saturating_mul(500).min(10_000);
                        tracing::warn!("fetch_retry" = attempt + 1, "reason" = "network", "backoff_ms" = backoff_ms);
                        sleep(Duration::from_millis(backoff_ms)).await;
                    }
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.map_or_else(|| "unknown fetch error".to_string(), |e| e.to_string()))
    }

    /// Fetch a playlist body as text, enforcing the size limit while streaming
    pub async fn fetch_text(&self, source_name: &str, url: &str) -> Result<String> {
        let mut response = self
            .fetch_with_retry(url)
            .await
            .map_err(|reason| PipelineError::source_unavailable(source_name, reason))?;

        let mut body = Vec::new();
        loop {
            let chunk = response
                .chunk()
                .await
                .map_err(|e| PipelineError::source_unavailable(source_name, e))?;
            let Some(chunk) = chunk else { break };
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_bytes {
                return Err(PipelineError::source_unavailable(
                    source_name,
                    format!("playlist exceeds {}MB", self.max_bytes / 1024 / 1024),
                ));
            }
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// Links to further playlists rather than streams
fn is_nested_playlist(url: &str) -> bool {
    let lower = url.to_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or_default();
    path.ends_with(".m3u") || lower.contains("type=m3u")
}

/// Playlist served over HTTP; nested playlist links are expanded breadth-first
pub struct RemoteSource {
    name: String,
    url: String,
    trust: Trust,
    fetcher: Arc<Fetcher>,
    max_depth: usize,
}

impl RemoteSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, trust: Trust, fetcher: Arc<Fetcher>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            trust,
            fetcher,
            max_depth: MAX_NESTED_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

#[async_trait]
impl Source for RemoteSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn trust(&self) -> Trust {
        self.trust
    }

    async fn produce(&self) -> Result<ParseReport> {
        let text = self.fetcher.fetch_text(&self.name, &self.url).await?;
        let root = parse_playlist(&text)?;

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(normalize_url(&self.url));

        let mut report = ParseReport {
            collection: Collection::default(),
            ..root.clone()
        };
        let mut level = vec![root.collection];

        for depth in 0..=self.max_depth {
            let mut links = Vec::new();
            for collection in level.drain(..) {
                for entry in collection {
                    if is_nested_playlist(&entry.url) && depth < self.max_depth {
                        if visited.insert(normalize_url(&entry.url)) {
                            links.push(entry.url);
                        }
                    } else {
                        report.collection.entries.push(entry);
                    }
                }
            }

            for link in links {
                tracing::debug!(source = %self.name, url = %link, depth = depth + 1, "Expanding nested playlist");
                let nested = match self.fetcher.fetch_text(&self.name, &link).await {
                    Ok(text) => parse_playlist(&text),
                    Err(e) => Err(e),
                };
                match nested {
                    Ok(nested) => {
                        report.malformed += nested.malformed;
                        report.bare_urls += nested.bare_urls;
                        report.fixed_urls += nested.fixed_urls;
                        report.quarantined += nested.quarantined;
                        level.push(nested.collection);
                    }
                    Err(e) => tracing::warn!(source = %self.name, url = %link, error = %e, "Nested playlist skipped"),
                }
            }

            if level.is_empty() {
                break;
            }
        }

        Ok(report)
    }
}

/// URLs removed at ingestion, one per line in the blacklist file
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    urls: HashSet<String>,
}

impl Blacklist {
    pub fn from_lines(text: &str) -> Self {
        let urls = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(normalize_url)
            .collect();
        Self { urls }
    }

    /// Missing file means an empty blacklist
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                let blacklist = Self::from_lines(&text);
                tracing::info!(path = %path.display(), urls = blacklist.len(), "Blacklist loaded");
                Ok(blacklist)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Blacklist file not found");
                Ok(Self::default())
            }
            Err(e) => Err(PipelineError::storage(path, e)),
        }
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        !self.urls.is_empty() && self.urls.contains(&normalize_url(url))
    }

    /// Drop blacklisted entries; returns how many were removed
    pub fn apply(&self, collection: &mut Collection) -> usize {
        let before = collection.len();
        collection.entries.retain(|entry| !self.contains(&entry.url));
        before - collection.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    Url,
}

fn default_trusted() -> bool {
    true
}

/// One line of the sources manifest
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    pub kind: SourceKind,
    pub location: String,
    #[serde(default = "default_trusted")]
    pub trusted: bool,
}

/// Ordered source list; position is precedence
pub struct SourceCatalog {
    sources: Vec<Box<dyn Source>>,
}

impl SourceCatalog {
    pub fn new(sources: Vec<Box<dyn Source>>) -> Self {
        Self { sources }
    }

    pub fn sources(&self) -> &[Box<dyn Source>] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Build from a JSON manifest; relative file paths resolve against its directory
    pub async fn from_manifest(path: &Path, fetcher: Arc<Fetcher>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::storage(path, e))?;
        let specs: Vec<SourceSpec> = serde_json::from_str(&text)
            .map_err(|e| PipelineError::Fatal(format!("invalid sources manifest {}: {}", path.display(), e)))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let sources = specs
            .into_iter()
            .map(|spec| {
                let trust = if spec.trusted { Trust::Trusted } else { Trust::Untrusted };
                let source: Box<dyn Source> = match spec.kind {
                    SourceKind::File => Box::new(FileSource::new(spec.name, base.join(&spec.location), trust)),
                    SourceKind::Url => Box::new(RemoteSource::new(spec.name, spec.location, trust, fetcher.clone())),
                };
                source
            })
            .collect();

        Ok(Self::new(sources))
    }

    /// Every playlist file in a directory (sorted by name), or a single file
    pub async fn from_input_path(path: &Path) -> Result<Self> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| PipelineError::storage(path, e))?;

        if metadata.is_file() {
            return Ok(Self::new(vec![Box::new(FileSource::new(
                source_name(path),
                path,
                Trust::Trusted,
            ))]));
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(path)
            .await
            .map_err(|e| PipelineError::storage(path, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::storage(path, e))?
        {
            let file = entry.path();
            let is_playlist = file
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| PLAYLIST_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false);
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_playlist && is_file {
                files.push(file);
            }
        }
        files.sort();

        let sources = files
            .into_iter()
            .map(|file| Box::new(FileSource::new(source_name(&file), file, Trust::Trusted)) as Box<dyn Source>)
            .collect();
        Ok(Self::new(sources))
    }
}

fn source_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::get, Router};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fetcher(max_retries: u32) -> Arc<Fetcher> {
        Arc::new(Fetcher::new("VLC/3.0.20 LibVLC/3.0.20", Duration::from_secs(5), max_retries, 1).unwrap())
    }

    async fn spawn_playlist_server() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base = format!("http://{}", addr);

        let root = format!(
            "#EXTM3U\n#EXTINF:-1,Direct\nhttp://cdn/1.ts\n#EXTINF:-1,More\n{base}/nested.m3u\n#EXTINF:-1,Self\n{base}/root.m3u\n"
        );
        let nested = format!(
            "#EXTM3U\n#EXTINF:-1,Nested\nhttp://cdn/2.ts\n#EXTINF:-1,Deeper\n{base}/get.php?type=m3u\n"
        );
        let deeper = "#EXTM3U\n#EXTINF:-1,Deepest\nhttp://cdn/3.ts\n".to_string();

        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/root.m3u", get(move || async move { root }))
            .route("/nested.m3u", get(move || async move { nested }))
            .route("/get.php", get(move || async move { deeper }))
            .route(
                "/flaky.m3u",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        (StatusCode::TOO_MANY_REQUESTS, String::new())
                    } else {
                        (StatusCode::OK, "#EXTM3U\n#EXTINF:-1,Flaky\nhttp://cdn/4.ts\n".to_string())
                    }
                }),
            )
            .with_state(hits);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_file_source() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("local.m3u");
        tokio::fs::write(&path, "#EXTM3U\n#EXTINF:-1,A\nhttp://a/1\n").await.unwrap();

        let source = FileSource::new("local", &path, Trust::Untrusted);
        let report = source.produce().await.unwrap();
        assert_eq!(report.collection.len(), 1);
        assert_eq!(source.trust(), Trust::Untrusted);

        let missing = FileSource::new("missing", tmp.path().join("nope.m3u"), Trust::Trusted);
        assert!(matches!(
            missing.produce().await,
            Err(PipelineError::SourceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_remote_source_expands_nested_playlists() {
        let addr = spawn_playlist_server().await;
        let source = RemoteSource::new("remote", format!("http://{}/root.m3u", addr), Trust::Trusted, fetcher(0));

        let report = source.produce().await.unwrap();
        let names: Vec<&str> = report.collection.iter().map(|e| e.name.as_str()).collect();
        // Breadth-first; the self link is skipped by the visited set
        assert_eq!(names, vec!["Direct", "Nested", "Deepest"]);
    }

    #[tokio::test]
    async fn test_remote_source_depth_limit() {
        let addr = spawn_playlist_server().await;
        let source = RemoteSource::new("remote", format!("http://{}/root.m3u", addr), Trust::Trusted, fetcher(0))
            .with_max_depth(1);

        let report = source.produce().await.unwrap();
        let names: Vec<&str> = report.collection.iter().map(|e| e.name.as_str()).collect();
        // Links past the limit stay as plain entries
        assert_eq!(names, vec!["Direct", "Nested", "Deeper"]);
    }

    #[tokio::test]
    async fn test_remote_source_retries_rate_limit() {
        let addr = spawn_playlist_server().await;
        let source = RemoteSource::new("flaky", format!("http://{}/flaky.m3u", addr), Trust::Trusted, fetcher(2));
        let report = source.produce().await.unwrap();
        assert_eq!(report.collection.entries[0].name, "Flaky");
    }

    #[tokio::test]
    async fn test_remote_source_unavailable() {
        let addr = spawn_playlist_server().await;
        let source = RemoteSource::new("gone", format!("http://{}/missing.m3u", addr), Trust::Trusted, fetcher(0));
        match source.produce().await {
            Err(PipelineError::SourceUnavailable { source_name, reason }) => {
                assert_eq!(source_name, "gone");
                assert!(reason.contains("404"));
            }
            other => panic!("expected unavailable source, got {:?}", other.map(|r| r.collection.len())),
        }
    }

    #[test]
    fn test_nested_link_detection() {
        assert!(is_nested_playlist("http://x/list.m3u"));
        assert!(is_nested_playlist("http://x/get.php?username=a&type=m3u_plus"));
        assert!(!is_nested_playlist("http://x/live.m3u8"));
        assert!(!is_nested_playlist("http://x/live.ts"));
    }

    #[test]
    fn test_blacklist() {
        let blacklist = Blacklist::from_lines("# dead streams\nhttp://a/1/\n\nhttp://b/2?token=x\n");
        assert_eq!(blacklist.len(), 2);

        let mut collection = Collection::new(vec![
            crate::models::ChannelEntry::new("A", "http://a/1"),
            crate::models::ChannelEntry::new("B", "http://b/2"),
            crate::models::ChannelEntry::new("C", "http://c/3"),
        ]);
        assert_eq!(blacklist.apply(&mut collection), 2);
        assert_eq!(collection.entries[0].name, "C");
    }

    #[tokio::test]
    async fn test_catalog_from_directory() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["b.m3u", "a.M3U8", "notes.txt"] {
            tokio::fs::write(tmp.path().join(name), "#EXTM3U\n").await.unwrap();
        }

        let catalog = SourceCatalog::from_input_path(tmp.path()).await.unwrap();
        let names: Vec<&str> = catalog.sources().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let single = SourceCatalog::from_input_path(&tmp.path().join("b.m3u")).await.unwrap();
        assert_eq!(single.len(), 1);
    }

    #[tokio::test]
    async fn test_catalog_from_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        tokio::fs::write(tmp.path().join("local.m3u"), "#EXTM3U\n#EXTINF:-1,A\nhttp://a/1\n")
            .await
            .unwrap();
        let manifest = tmp.path().join("sources.json");
        tokio::fs::write(
            &manifest,
            r#"[
                {"name": "local", "kind": "file", "location": "local.m3u"},
                {"name": "community", "kind": "url", "location": "http://127.0.0.1:9/x.m3u", "trusted": false}
            ]"#,
        )
        .await
        .unwrap();

        let catalog = SourceCatalog::from_manifest(&manifest, fetcher(0)).await.unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.sources()[0].trust(), Trust::Trusted);
        assert_eq!(catalog.sources()[1].trust(), Trust::Untrusted);
        assert_eq!(catalog.sources()[0].produce().await.unwrap().collection.len(), 1);
    }
}
