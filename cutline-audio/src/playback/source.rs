//! Asset byte sources
//!
//! The engine never touches storage directly: it asks an [`AssetSource`] for
//! the raw bytes behind an asset URI.

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Fetches raw media bytes for an asset URI
pub trait AssetSource: Send + Sync {
    fn fetch<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// Reads assets from the local filesystem.
///
/// Accepts `file://` URIs, absolute paths, and paths relative to the root
/// folder.
#[derive(Debug, Clone)]
pub struct FsAssetSource {
    root: PathBuf,
}

impl FsAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a URI to a filesystem path
    pub fn resolve(&self, uri: &str) -> Result<PathBuf> {
        let path = match uri.split_once("://") {
            Some(("file", rest)) => rest,
            Some((scheme, _)) => {
                return Err(Error::AssetSource(format!(
                    "Unsupported URI scheme '{}' in {}",
                    scheme, uri
                )))
            }
            None => uri,
        };

        let path = Path::new(path);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(self.root.join(path))
        }
    }
}

impl AssetSource for FsAssetSource {
    fn fetch<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        async move {
            let path = self.resolve(uri)?;
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| Error::AssetSource(format!("Failed to read {}: {}", path.display(), e)))?;
            debug!("Read {} bytes from {}", bytes.len(), path.display());
            Ok(bytes)
        }
        .boxed()
    }
}
