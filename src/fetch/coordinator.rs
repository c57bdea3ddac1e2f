// src/fetch/coordinator.rs

//! Populates a cache entry's `fetch/` directory with verified files.
//!
//! Per declared file:
//! - present with a declared SHA-256: re-hash; match is a cache hit,
//!   mismatch is corruption (delete and re-download);
//! - present without a hash: never trusted, always re-downloaded;
//! - absent: download, verify if a hash is declared.
//!
//! Downloads land in `<name>.partial` and are renamed into place only after
//! verification, so an interrupted run never leaves a plausible-looking but
//! truncated file behind. Distinct files are fetched concurrently; one
//! failure does not cancel or delete its siblings.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::store::{CacheEntry, PARTIAL_SUFFIX, remove_file_if_exists};
use crate::cache::sha256_file;
use crate::config::FetchFile;
use crate::errors::{EnvyError, FetchError};
use crate::fetch::source::Fetcher;
use crate::trace::{TraceEventKind, Tracer};

/// What happened to each declared file during one fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Files downloaded in this run (including corruption re-downloads).
    pub downloaded: Vec<String>,
    /// Files reused from the cache after hash verification.
    pub reused: Vec<String>,
    /// Cached files that failed verification and were re-downloaded.
    pub corrupted: Vec<String>,
    /// Whether `fetch/` held files from an earlier run that never wrote
    /// its fetch marker.
    pub resumed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Reused,
    Downloaded { corrupted: bool },
}

#[derive(Clone)]
pub struct FetchCoordinator {
    fetcher: Arc<dyn Fetcher>,
    tracer: Tracer,
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator").finish_non_exhaustive()
    }
}

impl FetchCoordinator {
    pub fn new(fetcher: Arc<dyn Fetcher>, tracer: Tracer) -> Self {
        Self { fetcher, tracer }
    }

    /// Fetch every file in `files` into `entry`'s `fetch/` directory.
    ///
    /// The caller must hold the entry's variant lock. On failure the error
    /// of the first failing file (in declaration order) is returned and
    /// every file that did succeed stays cached for the next attempt.
    pub async fn fetch_all(
        &self,
        entry: &CacheEntry,
        files: &[FetchFile],
    ) -> Result<FetchReport, FetchError> {
        let fetch_dir = entry.fetch_dir();
        entry.prepare().map_err(|source| FetchError::Io {
            file: fetch_dir.display().to_string(),
            source,
        })?;

        let resumed = !entry.has_fetch_marker() && dir_has_entries(&fetch_dir).await;
        if resumed {
            info!(
                spec = %entry.identity,
                variant = %entry.variant,
                "fetch directory present without completion marker; rechecking every file"
            );
        }
        // An interrupted attempt must not look complete.
        entry
            .clear_fetch_marker()
            .map_err(|source| FetchError::Io {
                file: entry.fetch_marker_path().display().to_string(),
                source,
            })?;

        let mut set = JoinSet::new();
        for (index, file) in files.iter().enumerate() {
            let job = FileJob {
                fetcher: Arc::clone(&self.fetcher),
                tracer: self.tracer.clone(),
                identity: entry.identity.clone(),
                variant: entry.variant.clone(),
                path: entry.fetch_file(&file.name),
                file: file.clone(),
            };
            set.spawn(async move { (index, job.run().await) });
        }

        let mut results: Vec<(usize, Result<FileOutcome, FetchError>)> = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(join_err) => {
                    return Err(FetchError::Io {
                        file: fetch_dir.display().to_string(),
                        source: std::io::Error::other(join_err),
                    });
                }
            }
        }
        results.sort_by_key(|(index, _)| *index);

        let mut report = FetchReport {
            resumed,
            ..Default::default()
        };
        let mut first_error = None;

        for (index, result) in results {
            let name = files[index].name.clone();
            match result {
                Ok(FileOutcome::Reused) => report.reused.push(name),
                Ok(FileOutcome::Downloaded { corrupted }) => {
                    if corrupted {
                        report.corrupted.push(name.clone());
                    }
                    report.downloaded.push(name);
                }
                Err(err) => {
                    warn!(spec = %entry.identity, file = %name, error = %err, "fetch failed");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        entry
            .write_fetch_marker()
            .map_err(|source| FetchError::Io {
                file: entry.fetch_marker_path().display().to_string(),
                source,
            })?;

        debug!(
            spec = %entry.identity,
            downloaded = report.downloaded.len(),
            reused = report.reused.len(),
            "fetch complete"
        );
        Ok(report)
    }
}

/// Everything needed to fetch one file on its own task.
struct FileJob {
    fetcher: Arc<dyn Fetcher>,
    tracer: Tracer,
    identity: String,
    variant: String,
    path: PathBuf,
    file: FetchFile,
}

impl FileJob {
    async fn run(self) -> Result<FileOutcome, FetchError> {
        let name = self.file.name.clone();
        let mut corrupted = false;

        if tokio::fs::metadata(&self.path).await.is_ok_and(|m| m.is_file()) {
            match &self.file.sha256 {
                Some(expected) => {
                    let actual = hash_file(&self.path, &name).await?;
                    if actual == *expected {
                        debug!(spec = %self.identity, file = %name, "cached file verified");
                        self.tracer.emit(TraceEventKind::CacheHit {
                            spec: self.identity.clone(),
                            variant: self.variant.clone(),
                            file: Some(name),
                        });
                        return Ok(FileOutcome::Reused);
                    }

                    let corruption = EnvyError::CorruptionDetected {
                        spec: self.identity.clone(),
                        file: name.clone(),
                    };
                    warn!(expected = %expected, actual = %actual, "{corruption}; re-downloading");
                    self.tracer.emit(TraceEventKind::CacheCorrupt {
                        spec: self.identity.clone(),
                        variant: self.variant.clone(),
                        file: name.clone(),
                        expected: expected.clone(),
                        actual,
                    });
                    corrupted = true;
                }
                None => {
                    debug!(
                        spec = %self.identity,
                        file = %name,
                        "no sha256 declared; cached copy cannot be trusted"
                    );
                }
            }
            remove_file_if_exists(&self.path).map_err(|source| FetchError::Io {
                file: name.clone(),
                source,
            })?;
        }

        if !corrupted {
            self.tracer.emit(TraceEventKind::CacheMiss {
                spec: self.identity.clone(),
                variant: self.variant.clone(),
                file: Some(name.clone()),
            });
        }

        self.download().await?;
        Ok(FileOutcome::Downloaded { corrupted })
    }

    async fn download(&self) -> Result<(), FetchError> {
        let name = &self.file.name;
        let partial = partial_path(&self.path);
        remove_file_if_exists(&partial).map_err(|source| FetchError::Io {
            file: name.clone(),
            source,
        })?;

        self.tracer.emit(TraceEventKind::FetchFileStart {
            spec: self.identity.clone(),
            file: name.clone(),
            source: self.file.source.clone(),
        });
        let started = Instant::now();

        let bytes = match self.fetcher.fetch(&self.file.source, &partial).await {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = remove_file_if_exists(&partial);
                return Err(FetchError::Unreachable {
                    file: name.clone(),
                    source_uri: self.file.source.clone(),
                    message: format!("{err:#}"),
                });
            }
        };

        if let Some(expected) = &self.file.sha256 {
            let actual = hash_file(&partial, name).await?;
            if actual != *expected {
                let _ = remove_file_if_exists(&partial);
                return Err(FetchError::HashMismatch {
                    file: name.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        tokio::fs::rename(&partial, &self.path)
            .await
            .map_err(|source| FetchError::Io {
                file: name.clone(),
                source,
            })?;

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(spec = %self.identity, file = %name, bytes, duration_ms, "downloaded");
        self.tracer.emit(TraceEventKind::FetchFileComplete {
            spec: self.identity.clone(),
            file: name.clone(),
            bytes,
            duration_ms,
        });
        Ok(())
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}

async fn hash_file(path: &Path, name: &str) -> Result<String, FetchError> {
    let owned = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || sha256_file(&owned))
        .await
        .map_err(|e| FetchError::Io {
            file: name.to_string(),
            source: std::io::Error::other(e),
        })?;
    result.map_err(|e| FetchError::Io {
        file: name.to_string(),
        source: std::io::Error::other(format!("{e:#}")),
    })
}

async fn dir_has_entries(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}
