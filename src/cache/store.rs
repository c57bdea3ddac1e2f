// src/cache/store.rs

//! On-disk package cache.
//!
//! Layout per cache root:
//!
//! ```text
//! packages/<identity>/<variant>/
//!     fetch/              one file per declared source (+ .envy-fetch-complete)
//!     stage/              scratch space for stage/build
//!     pkg/                installed output
//!     envy-complete       written last; sole authority for "usable as-is"
//! ```

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::cache::lock::{VariantGuard, lock_variant};
use crate::trace::Tracer;
use crate::types::Identity;

pub const PACKAGES_DIR: &str = "packages";
pub const FETCH_DIR: &str = "fetch";
pub const STAGE_DIR: &str = "stage";
pub const PKG_DIR: &str = "pkg";

/// Entry-level completion marker in the variant root.
pub const COMPLETE_MARKER: &str = "envy-complete";

/// Fetch-phase completion marker inside `fetch/`.
pub const FETCH_MARKER: &str = ".envy-fetch-complete";

/// Suffix of in-flight downloads inside `fetch/`.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Content-addressed cache keyed by `(identity, variant)`.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    tracer: Tracer,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>, tracer: Tracer) -> Self {
        Self {
            root: root.into(),
            tracer,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Handle to the entry for `(identity, variant)`. Touches no disk state.
    pub fn entry(&self, identity: &str, variant: &str) -> CacheEntry {
        let dir = self
            .root
            .join(PACKAGES_DIR)
            .join(dir_name_for_identity(identity))
            .join(variant);
        CacheEntry {
            identity: identity.to_string(),
            variant: variant.to_string(),
            dir,
        }
    }

    /// Wait for exclusive access to `entry`.
    pub async fn lock(&self, entry: &CacheEntry) -> VariantGuard {
        lock_variant(&entry.dir, &entry.identity, &entry.variant, &self.tracer).await
    }
}

/// Identities are mostly path-safe already; only separators are replaced.
fn dir_name_for_identity(identity: &str) -> String {
    identity.replace(['/', '\\'], "_")
}

/// One variant directory in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub identity: Identity,
    pub variant: String,
    dir: PathBuf,
}

impl CacheEntry {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn fetch_dir(&self) -> PathBuf {
        self.dir.join(FETCH_DIR)
    }

    pub fn stage_dir(&self) -> PathBuf {
        self.dir.join(STAGE_DIR)
    }

    pub fn pkg_dir(&self) -> PathBuf {
        self.dir.join(PKG_DIR)
    }

    pub fn marker_path(&self) -> PathBuf {
        self.dir.join(COMPLETE_MARKER)
    }

    pub fn fetch_marker_path(&self) -> PathBuf {
        self.fetch_dir().join(FETCH_MARKER)
    }

    pub fn fetch_file(&self, name: &str) -> PathBuf {
        self.fetch_dir().join(name)
    }

    /// Whether a previous run fully installed this variant.
    pub fn is_complete(&self) -> bool {
        self.marker_path().is_file()
    }

    pub fn has_fetch_marker(&self) -> bool {
        self.fetch_marker_path().is_file()
    }

    /// Create `fetch/` and `stage/` if missing.
    pub fn prepare(&self) -> io::Result<()> {
        fs::create_dir_all(self.fetch_dir())?;
        fs::create_dir_all(self.stage_dir())?;
        Ok(())
    }

    pub fn write_fetch_marker(&self) -> io::Result<()> {
        fs::write(self.fetch_marker_path(), b"")
    }

    pub fn clear_fetch_marker(&self) -> io::Result<()> {
        remove_file_if_exists(&self.fetch_marker_path())
    }

    /// Start `pkg/` from scratch so a half-finished earlier install cannot
    /// leak into this one.
    pub fn reset_pkg_dir(&self) -> io::Result<()> {
        remove_dir_if_exists(&self.pkg_dir())?;
        fs::create_dir_all(self.pkg_dir())
    }

    /// Start `stage/` from scratch so output of a failed or interrupted
    /// earlier attempt is not built on.
    pub fn reset_stage_dir(&self) -> io::Result<()> {
        remove_dir_if_exists(&self.stage_dir())?;
        fs::create_dir_all(self.stage_dir())
    }

    /// Drop the transient directories and write the completion marker.
    ///
    /// The marker is written via rename so it is either absent or whole.
    pub fn finalize(&self) -> io::Result<()> {
        remove_dir_if_exists(&self.fetch_dir())?;
        remove_dir_if_exists(&self.stage_dir())?;

        let tmp = self.dir.join(format!("{COMPLETE_MARKER}{PARTIAL_SUFFIX}"));
        fs::write(&tmp, format!("{}\n{}\n", self.identity, self.variant))?;
        fs::rename(&tmp, self.marker_path())?;

        info!(spec = %self.identity, variant = %self.variant, "cache entry complete");
        Ok(())
    }
}

pub(crate) fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            debug!("removed {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
