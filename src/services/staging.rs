//! Per-run working storage
//!
//! Layout:
//! - `raw/NN-<source>.m3u`: each source's parsed collection
//! - `deduped.m3u`: the deduplicated collection
//! - `verdicts.json`: fingerprint to verdict map
//!
//! Wiped at the start of every run and removed after a successful one.

use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{PipelineError, Result};
use crate::models::{Collection, ValidationResults};
use crate::services::m3u_parser::write_playlist;

#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    pub fn raw_path(&self, index: usize, source: &str) -> PathBuf {
        self.raw_dir().join(format!("{:02}-{}.m3u", index, sanitize(source)))
    }

    pub fn deduped_path(&self) -> PathBuf {
        self.root.join("deduped.m3u")
    }

    pub fn verdicts_path(&self) -> PathBuf {
        self.root.join("verdicts.json")
    }

    /// Remove anything left from an earlier run and recreate the layout
    pub async fn reset(&self) -> Result<()> {
        self.clear().await?;
        fs::create_dir_all(self.raw_dir())
            .await
            .map_err(|e| PipelineError::storage(self.raw_dir(), e))
    }

    pub async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::storage(&self.root, e)),
        }
    }

    pub async fn write_raw(&self, index: usize, source: &str, collection: &Collection) -> Result<PathBuf> {
        let path = self.raw_path(index, source);
        write_file(&path, write_playlist(collection).as_bytes()).await?;
        Ok(path)
    }

    pub async fn write_deduped(&self, collection: &Collection) -> Result<PathBuf> {
        let path = self.deduped_path();
        write_file(&path, write_playlist(collection).as_bytes()).await?;
        Ok(path)
    }

    pub async fn write_verdicts(&self, results: &ValidationResults) -> Result<PathBuf> {
        let path = self.verdicts_path();
        let content = serde_json::to_vec_pretty(&results.snapshot())
            .map_err(|e| PipelineError::Fatal(format!("failed to encode verdicts: {}", e)))?;
        write_file(&path, &content).await?;
        Ok(path)
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes)
        .await
        .map_err(|e| PipelineError::storage(path, e))
}

/// Keep source names safe as file names
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "source".to_string()
    } else {
        cleaned
    }
}
