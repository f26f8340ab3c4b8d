//! Prover artifact cache
//!
//! Local generation needs per-function prover files that are far too large
//! to ship with the wallet, so they are fetched on first use from a params
//! endpoint and kept in a cache directory. Downloads land in a `.tmp`
//! sibling and are renamed into place, so a crash mid-download never leaves
//! a truncated artifact that would be mistaken for a complete one.

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// On-disk cache of prover artifacts, one file per function
pub struct ProverCache {
    dir: PathBuf,
    base_url: String,
    client: reqwest::Client,
}

impl ProverCache {
    /// A cache rooted at `dir`, fetching misses from `base_url`.
    pub fn new(dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        })
    }

    /// Where the artifact for `function` lives once cached
    pub fn artifact_path(&self, function: &str) -> PathBuf {
        self.dir.join(format!("{function}.prover"))
    }

    /// Whether the artifact for `function` is already cached
    pub fn is_cached(&self, function: &str) -> bool {
        self.artifact_path(function).exists()
    }

    /// Make sure every function's artifact is present, downloading the
    /// missing ones. Returns how many were downloaded.
    pub async fn ensure_artifacts(&self, functions: &[&str]) -> Result<usize> {
        let mut downloaded = 0;
        for function in functions {
            if self.is_cached(function) {
                continue;
            }
            self.download(function).await?;
            downloaded += 1;
        }
        Ok(downloaded)
    }

    async fn download(&self, function: &str) -> Result<()> {
        let url = format!("{}/{function}.prover", self.base_url);
        tracing::info!(function, url = %url, "downloading prover artifact");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Prover(format!(
                "params endpoint returned {} for {function}",
                response.status()
            )));
        }
        let bytes = response.bytes().await?;

        let path = self.artifact_path(function);
        let tmp = path.with_extension("prover.tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &path)?;
        tracing::debug!(function, size = bytes.len(), "prover artifact cached");
        Ok(())
    }
}

/// Seed a cache directory with an artifact without downloading, used by
/// embedders that bundle artifacts and by tests.
pub fn preload_artifact(dir: &Path, function: &str, bytes: &[u8]) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{function}.prover"));
    let tmp = path.with_extension("prover.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}
