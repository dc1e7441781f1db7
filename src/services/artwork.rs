//! Artwork caching to local disk
//!
//! Downloads provider images into a local cache directory with content-hash
//! filenames. Existing cached files are trusted only if they still exist and
//! sniff as a decodable image; anything missing or corrupt is treated as "no
//! local copy" so the next encounter re-downloads it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info, warn};

/// Artwork slot for one media item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtworkKind {
    Poster,
    Backdrop,
}

impl ArtworkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtworkKind::Poster => "posters",
            ArtworkKind::Backdrop => "backdrops",
        }
    }
}

/// Local artwork cache rooted at a configured directory
pub struct ArtworkCache {
    root: PathBuf,
    http: reqwest::Client,
}

impl ArtworkCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Download `source_url` and store it under the cache root.
    ///
    /// Returns the path of the cached file. The filename is derived from a
    /// hash of the source URL so re-caching the same image is a no-op.
    pub async fn cache_image(
        &self,
        source_url: &str,
        kind: ArtworkKind,
        entity_id: &str,
    ) -> Result<PathBuf> {
        let dir = self.root.join(kind.as_str()).join(entity_id);
        let filename = format!("{}.img", short_hash(source_url.as_bytes()));
        let target = dir.join(&filename);

        if self.verify_cached(&target).await {
            debug!(path = %target.display(), "Artwork already cached");
            return Ok(target);
        }

        info!(url = %source_url, kind = ?kind, entity_id = %entity_id, "Caching artwork");

        let response = self
            .http
            .get(source_url)
            .send()
            .await
            .context("Failed to download image")?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to download image: {}", response.status());
        }

        let bytes = response.bytes().await.context("Failed to read image bytes")?;
        if infer::get(&bytes).map(|t| t.matcher_type()) != Some(infer::MatcherType::Image) {
            anyhow::bail!("Downloaded artwork is not a recognizable image");
        }

        fs::create_dir_all(&dir)
            .await
            .context("Failed to create artwork directory")?;
        fs::write(&target, &bytes)
            .await
            .context("Failed to write cached artwork")?;

        debug!(path = %target.display(), size = bytes.len(), "Artwork cached");
        Ok(target)
    }

    /// Best-effort variant: a failed download is logged and yields None
    pub async fn cache_image_optional(
        &self,
        source_url: Option<&str>,
        kind: ArtworkKind,
        entity_id: &str,
    ) -> Option<PathBuf> {
        let url = source_url?;
        match self.cache_image(url, kind, entity_id).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to cache artwork, continuing without");
                None
            }
        }
    }

    /// True when a previously recorded cached file can still be trusted:
    /// it exists, is non-empty, and its header sniffs as an image
    pub async fn verify_cached(&self, path: &Path) -> bool {
        let Ok(meta) = fs::metadata(path).await else {
            return false;
        };
        if !meta.is_file() || meta.len() == 0 {
            return false;
        }

        // Only the header is needed to sniff the format
        let Ok(bytes) = fs::read(path).await else {
            return false;
        };
        infer::get(&bytes).map(|t| t.matcher_type()) == Some(infer::MatcherType::Image)
    }
}

fn short_hash(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}
