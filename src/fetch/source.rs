// src/fetch/source.rs

//! Pluggable source fetching.
//!
//! Fetch sources are opaque URIs. The engine talks to a `Fetcher` so that
//! transports (HTTP, git, object stores, ...) live outside the core and
//! tests can substitute an in-memory implementation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::types::BoxFuture;

/// Trait abstracting how one source URI is materialised on disk.
pub trait Fetcher: Send + Sync {
    /// Write the full contents of `source` to `dest` and return the number
    /// of bytes written.
    ///
    /// `dest` does not exist when this is called. On error the caller
    /// removes whatever was written.
    fn fetch<'a>(&'a self, source: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<u64>>;
}

/// Fetcher for `file://` URIs and plain filesystem paths.
///
/// Relative paths resolve against `base_dir` (normally the manifest's
/// directory). Any other scheme is reported as unreachable.
#[derive(Debug, Clone)]
pub struct LocalFetcher {
    base_dir: PathBuf,
}

impl LocalFetcher {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, source: &str) -> Result<PathBuf> {
        let path = match source.strip_prefix("file://") {
            Some(rest) => PathBuf::from(rest),
            None => {
                if let Some((scheme, _)) = source.split_once("://") {
                    bail!("unsupported source scheme '{scheme}'");
                }
                PathBuf::from(source)
            }
        };

        Ok(if path.is_absolute() {
            path
        } else {
            self.base_dir.join(path)
        })
    }
}

impl Fetcher for LocalFetcher {
    fn fetch<'a>(&'a self, source: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let path = self.resolve(source)?;
            debug!(source = %source, path = ?path, dest = ?dest, "copying local source");
            let bytes = tokio::fs::copy(&path, dest)
                .await
                .with_context(|| format!("copying {:?} to {:?}", path, dest))?;
            Ok(bytes)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copies_relative_and_file_uri_sources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let fetcher = LocalFetcher::new(dir.path());

        let dest = dir.path().join("out1");
        assert_eq!(fetcher.fetch("a.txt", &dest).await.unwrap(), 5);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");

        let uri = format!("file://{}", dir.path().join("a.txt").display());
        let dest = dir.path().join("out2");
        assert_eq!(fetcher.fetch(&uri, &dest).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn rejects_network_schemes_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = LocalFetcher::new(dir.path());

        let err = fetcher
            .fetch("https://example.com/x.tar", &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported source scheme"));

        assert!(fetcher.fetch("missing.bin", &dir.path().join("y")).await.is_err());
    }
}
