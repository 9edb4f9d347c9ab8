//! Local cache of model bundles, filled on demand over HTTP.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::capabilities::{BundleHandle, BundleResolver};
use crate::error::{ChainError, Result};

/// Resolves bundle names against a directory, downloading missing ones.
#[derive(Debug, Clone)]
pub struct BundleCache {
    bundles_dir: PathBuf,
    base_url: Option<String>,
    client: reqwest::Client,
}

impl BundleCache {
    /// Cache that only resolves bundles already on disk.
    pub fn offline(bundles_dir: impl Into<PathBuf>) -> Self {
        Self {
            bundles_dir: bundles_dir.into(),
            base_url: None,
            client: reqwest::Client::new(),
        }
    }

    /// Cache that downloads missing bundles from `{base_url}/{name}`.
    pub fn new(bundles_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            bundles_dir: bundles_dir.into(),
            base_url: if base_url.trim().is_empty() {
                None
            } else {
                Some(base_url.trim_end_matches('/').to_string())
            },
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &chainconf::ChainConfig) -> Self {
        Self::new(&config.paths.bundles_dir, &config.generator.bundle_base_url)
    }

    pub fn bundles_dir(&self) -> &Path {
        &self.bundles_dir
    }

    async fn download(&self, name: &str, base_url: &str, target: &Path) -> Result<()> {
        let bundle_error = |message: String| ChainError::Bundle {
            name: name.to_string(),
            message,
        };

        let url = format!("{base_url}/{name}");
        tracing::info!(bundle = name, url = %url, "downloading bundle");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| bundle_error(format!("request to {url} failed: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ChainError::NotFound {
                reference: format!("bundle {name} at {url}"),
            });
        }
        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            return Err(bundle_error(format!("download error {status}: {error_body}")));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| bundle_error(format!("failed to read body: {e}")))?;

        tokio::fs::create_dir_all(&self.bundles_dir)
            .await
            .map_err(|e| ChainError::storage(&self.bundles_dir, e))?;

        // Partial downloads never appear under the final name.
        let partial = self.bundles_dir.join(format!("{name}.part"));
        tokio::fs::write(&partial, &bytes)
            .await
            .map_err(|e| ChainError::storage(&partial, e))?;
        tokio::fs::rename(&partial, target)
            .await
            .map_err(|e| ChainError::storage(target, e))?;

        tracing::info!(
            bundle = name,
            bytes = bytes.len(),
            path = %target.display(),
            "bundle cached"
        );
        Ok(())
    }
}

#[async_trait]
impl BundleResolver for BundleCache {
    async fn resolve_bundle(&self, name: &str) -> Result<BundleHandle> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(ChainError::Bundle {
                name: name.to_string(),
                message: "bundle names must be plain file names".to_string(),
            });
        }

        let path = self.bundles_dir.join(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!(bundle = name, path = %path.display(), "bundle already cached");
            return Ok(BundleHandle {
                name: name.to_string(),
                path,
            });
        }

        match &self.base_url {
            Some(base_url) => self.download(name, base_url, &path).await?,
            None => {
                return Err(ChainError::NotFound {
                    reference: format!("bundle {name} in {}", self.bundles_dir.display()),
                })
            }
        }

        Ok(BundleHandle {
            name: name.to_string(),
            path,
        })
    }
}
