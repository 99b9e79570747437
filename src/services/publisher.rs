//! Atomic replacement of published files
//!
//! Every file is written to a hidden temp file next to its destination,
//! flushed and synced. Renames only start once all temps are durable. Each
//! existing file is kept as a hidden backup until every rename succeeded; a
//! failed rename restores the backups, so the previous files stay in place.

use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::error::{PipelineError, Result};

/// Temp file that becomes `final_path` once committed
pub struct StagedFile {
    writer: BufWriter<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    bytes_written: usize,
}

impl StagedFile {
    pub async fn create(final_path: PathBuf) -> Result<Self> {
        let tmp_path = tmp_path_for(&final_path);
        let file = File::create(&tmp_path)
            .await
            .map_err(|e| PipelineError::storage(&tmp_path, e))?;
        let writer = BufWriter::with_capacity(64 * 1024, file); // 64KB buffer

        Ok(Self {
            writer,
            tmp_path,
            final_path,
            bytes_written: 0,
        })
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(|e| PipelineError::storage(&self.tmp_path, e))?;
        self.bytes_written += bytes.len();
        Ok(())
    }

    /// Flush and sync; the temp file is durable but not yet visible
    pub async fn seal(mut self) -> Result<SealedFile> {
        if let Err(e) = self.flush_and_sync().await {
            let tmp_path = self.tmp_path.clone();
            self.abort().await;
            return Err(PipelineError::storage(tmp_path, e));
        }

        // Drop the writer to release the file handle
        drop(self.writer);

        Ok(SealedFile {
            tmp_path: self.tmp_path,
            final_path: self.final_path,
            bytes_written: self.bytes_written,
        })
    }

    async fn flush_and_sync(&mut self) -> std::io::Result<()> {
        self.writer.flush().await?;
        self.writer.get_ref().sync_all().await
    }

    /// Abort: remove temp file without renaming
    pub async fn abort(self) {
        drop(self.writer);
        let _ = fs::remove_file(&self.tmp_path).await;
    }
}

/// Durable temp file awaiting its rename
#[derive(Debug)]
pub struct SealedFile {
    tmp_path: PathBuf,
    final_path: PathBuf,
    bytes_written: usize,
}

impl SealedFile {
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub async fn commit(self) -> Result<PathBuf> {
        fs::rename(&self.tmp_path, &self.final_path)
            .await
            .map_err(|e| PipelineError::storage(&self.final_path, e))?;
        Ok(self.final_path)
    }

    /// Rename into place, keeping the replaced file as a backup
    async fn commit_with_backup(self) -> Result<CommittedFile> {
        let backup = match keep_backup(&self.final_path).await {
            Ok(backup) => backup,
            Err(e) => {
                let final_path = self.final_path.clone();
                self.discard().await;
                return Err(PipelineError::storage(final_path, e));
            }
        };

        if let Err(e) = fs::rename(&self.tmp_path, &self.final_path).await {
            let _ = fs::remove_file(&self.tmp_path).await;
            if let Some(ref backup) = backup {
                let _ = fs::remove_file(backup).await;
            }
            return Err(PipelineError::storage(&self.final_path, e));
        }

        Ok(CommittedFile {
            path: self.final_path,
            backup,
        })
    }

    pub async fn discard(self) {
        let _ = fs::remove_file(&self.tmp_path).await;
    }
}

/// Renamed file whose predecessor can still be restored
struct CommittedFile {
    path: PathBuf,
    backup: Option<PathBuf>,
}

impl CommittedFile {
    /// Put the previous file back, or remove the new one if there was none
    async fn rollback(self) {
        let restored = match self.backup {
            Some(ref backup) => fs::rename(backup, &self.path).await,
            None => fs::remove_file(&self.path).await,
        };
        if let Err(e) = restored {
            tracing::error!(path = %self.path.display(), error = %e, "Failed to roll back published file");
        }
    }

    async fn finish(self) -> PathBuf {
        if let Some(ref backup) = self.backup {
            let _ = fs::remove_file(backup).await;
        }
        self.path
    }
}

/// Link the current file at `path` to a hidden backup; None when there is no file
async fn keep_backup(path: &Path) -> std::io::Result<Option<PathBuf>> {
    match fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => {}
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    }

    let backup = hidden_sibling(path, "prev");
    // Left over from an interrupted publish
    match fs::remove_file(&backup).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    if fs::hard_link(path, &backup).await.is_err() {
        fs::copy(path, &backup).await?;
    }
    Ok(Some(backup))
}

fn hidden_sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}", name, suffix))
}

fn tmp_path_for(final_path: &Path) -> PathBuf {
    hidden_sibling(final_path, "tmp")
}

/// Write bytes to `path` atomically
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut staged = StagedFile::create(path.to_path_buf()).await?;
    if let Err(e) = staged.write_all(bytes).await {
        staged.abort().await;
        return Err(e);
    }
    staged.seal().await?.commit().await?;
    Ok(())
}

async fn discard_all(sealed: Vec<SealedFile>) {
    for file in sealed {
        file.discard().await;
    }
}

/// Publishes named files into a directory as one unit
#[derive(Debug, Clone)]
pub struct Publisher {
    publish_dir: PathBuf,
}

impl Publisher {
    pub fn new(publish_dir: impl Into<PathBuf>) -> Self {
        Self {
            publish_dir: publish_dir.into(),
        }
    }

    pub fn publish_dir(&self) -> &Path {
        &self.publish_dir
    }

    pub fn path_of(&self, file_name: &str) -> PathBuf {
        self.publish_dir.join(file_name)
    }

    /// Replace every named file, or none of them
    ///
    /// Returns the published paths in input order.
    pub async fn publish(&self, files: &[(String, Vec<u8>)]) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.publish_dir)
            .await
            .map_err(|e| PipelineError::storage(&self.publish_dir, e))?;

        let mut sealed = Vec::with_capacity(files.len());
        for (name, bytes) in files {
            let staged = match StagedFile::create(self.path_of(name)).await {
                Ok(staged) => staged,
                Err(e) => {
                    discard_all(sealed).await;
                    return Err(e);
                }
            };
            match stage(staged, bytes).await {
                Ok(file) => sealed.push(file),
                Err(e) => {
                    discard_all(sealed).await;
                    return Err(e);
                }
            }
        }

        let mut committed: Vec<CommittedFile> = Vec::with_capacity(sealed.len());
        let mut pending = sealed.into_iter();
        while let Some(file) = pending.next() {
            let bytes = file.bytes_written();
            match file.commit_with_backup().await {
                Ok(done) => {
                    tracing::debug!(path = %done.path.display(), bytes, "Committed");
                    committed.push(done);
                }
                Err(e) => {
                    discard_all(pending.collect()).await;
                    for done in committed.into_iter().rev() {
                        done.rollback().await;
                    }
                    tracing::warn!(error = %e, "Publish rolled back");
                    return Err(e);
                }
            }
        }

        let mut published = Vec::with_capacity(committed.len());
        for done in committed {
            published.push(done.finish().await);
        }

        tracing::info!(
            dir = %self.publish_dir.display(),
            files = published.len(),
            "Published"
        );
        Ok(published)
    }
}

async fn stage(mut staged: StagedFile, bytes: &[u8]) -> Result<SealedFile> {
    if let Err(e) = staged.write_all(bytes).await {
        staged.abort().await;
        return Err(e);
    }
    staged.seal().await
}
