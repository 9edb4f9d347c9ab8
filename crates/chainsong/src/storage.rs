//! Filesystem primer source and artifact sink.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;

use crate::capabilities::{ArtifactRef, ArtifactSink, PrimerSource};
use crate::error::{ChainError, Result};
use crate::midi;
use crate::sequence::Sequence;

/// Reads primers from one directory and writes stage outputs to another.
///
/// Existing artifacts are never replaced unless `overwrite` is set.
#[derive(Debug, Clone)]
pub struct FileStorage {
    primers_dir: PathBuf,
    output_dir: PathBuf,
    overwrite: bool,
}

impl FileStorage {
    pub fn new(primers_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            primers_dir: primers_dir.into(),
            output_dir: output_dir.into(),
            overwrite: false,
        }
    }

    /// Build from the `[paths]` config section.
    pub fn from_config(paths: &chainconf::PathsConfig) -> Self {
        Self::new(&paths.primers_dir, &paths.output_dir)
    }

    /// Builder: allow replacing existing artifacts.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn primers_dir(&self) -> &Path {
        &self.primers_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Where an artifact with this name is written.
    pub fn artifact_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.output_dir.join(plain_file_name(name)?))
    }

    /// Write `bytes` to `{name}.part`, then rename onto the artifact path.
    ///
    /// A failed write never leaves a file under the artifact's own name.
    async fn write_artifact(&self, name: &str, path: &Path, bytes: &[u8]) -> Result<()> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|e| ChainError::storage(path, e))?;
        if exists && !self.overwrite {
            return Err(ChainError::storage(path, "refusing to overwrite existing artifact"));
        }

        let partial = self.output_dir.join(format!("{name}.part"));
        if let Err(e) = write_file(&partial, bytes).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(ChainError::storage(&partial, e));
        }
        if let Err(e) = tokio::fs::rename(&partial, path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(ChainError::storage(path, e));
        }
        Ok(())
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Names must stay inside their directory.
fn plain_file_name(name: &str) -> Result<&str> {
    let path = Path::new(name);
    let is_plain = !name.is_empty()
        && path.components().count() == 1
        && path.file_name().map(|f| f == name).unwrap_or(false);
    if is_plain {
        Ok(name)
    } else {
        Err(ChainError::NotFound {
            reference: format!("{name} (not a plain file name)"),
        })
    }
}

#[async_trait]
impl PrimerSource for FileStorage {
    async fn load_primer(&self, name: &str) -> Result<Sequence> {
        let path = self.primers_dir.join(plain_file_name(name)?);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ChainError::NotFound {
                    reference: path.display().to_string(),
                })
            }
            Err(e) => return Err(ChainError::storage(&path, e)),
        };

        let sequence = midi::decode(&bytes)?;
        tracing::debug!(
            primer = %path.display(),
            notes = sequence.notes.len(),
            total_time = sequence.total_time,
            "loaded primer"
        );
        Ok(sequence)
    }
}

#[async_trait]
impl ArtifactSink for FileStorage {
    async fn persist(&self, sequence: &Sequence, name: &str) -> Result<ArtifactRef> {
        let path = self.artifact_path(name)?;
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| ChainError::storage(&self.output_dir, e))?;

        let bytes = midi::encode(sequence)?;
        self.write_artifact(name, &path, &bytes).await?;

        tracing::info!(
            artifact = %path.display(),
            notes = sequence.notes.len(),
            bytes = bytes.len(),
            "persisted artifact"
        );

        Ok(ArtifactRef {
            name: name.to_string(),
            path,
            created_at: Utc::now(),
            note_count: sequence.notes.len(),
        })
    }

    async fn load_artifact(&self, artifact: &ArtifactRef) -> Result<Sequence> {
        let bytes = tokio::fs::read(&artifact.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ChainError::NotFound {
                    reference: artifact.path.display().to_string(),
                }
            } else {
                ChainError::storage(&artifact.path, e)
            }
        })?;
        midi::decode(&bytes)
    }
}
