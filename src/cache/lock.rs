// src/cache/lock.rs

//! Per-variant mutual exclusion.
//!
//! The cache directory of one `(identity, variant)` pair is the unit of
//! exclusion. Locks are process-local and shared by every `CacheStore` in
//! the process, keyed by the entry directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::trace::{TraceEventKind, Tracer};
use crate::types::Identity;

type LockMap = HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>;

fn registry() -> &'static Mutex<LockMap> {
    static REGISTRY: OnceLock<Mutex<LockMap>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Exclusive hold on one cache entry. Released on drop.
pub struct VariantGuard {
    guard: Option<OwnedMutexGuard<()>>,
    dir: PathBuf,
    identity: Identity,
    variant: String,
    acquired_at: Instant,
    tracer: Tracer,
}

impl std::fmt::Debug for VariantGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariantGuard")
            .field("identity", &self.identity)
            .field("variant", &self.variant)
            .finish_non_exhaustive()
    }
}

/// Wait for exclusive access to the entry at `dir`.
pub async fn lock_variant(
    dir: &Path,
    identity: &str,
    variant: &str,
    tracer: &Tracer,
) -> VariantGuard {
    let mutex = {
        let mut map = registry().lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(map.entry(dir.to_path_buf()).or_default())
    };

    let started = Instant::now();
    let guard = mutex.lock_owned().await;
    let wait_ms = started.elapsed().as_millis() as u64;

    debug!(spec = %identity, variant = %variant, wait_ms, "variant lock acquired");
    tracer.emit(TraceEventKind::LockAcquired {
        spec: identity.to_string(),
        variant: variant.to_string(),
        wait_ms,
    });

    VariantGuard {
        guard: Some(guard),
        dir: dir.to_path_buf(),
        identity: identity.to_string(),
        variant: variant.to_string(),
        acquired_at: Instant::now(),
        tracer: tracer.clone(),
    }
}

impl Drop for VariantGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let held_ms = self.acquired_at.elapsed().as_millis() as u64;
        debug!(spec = %self.identity, variant = %self.variant, held_ms, "variant lock released");
        self.tracer.emit(TraceEventKind::LockReleased {
            spec: self.identity.clone(),
            variant: self.variant.clone(),
            held_ms,
        });

        // Forget the mutex once nobody holds or waits on it.
        let mut map = registry().lock().unwrap_or_else(|p| p.into_inner());
        if map
            .get(&self.dir)
            .is_some_and(|m| Arc::strong_count(m) == 1)
        {
            map.remove(&self.dir);
        }
    }
}
