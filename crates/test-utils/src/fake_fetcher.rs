use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use envy::fetch::Fetcher;
use envy::types::BoxFuture;

/// An in-memory fetcher that:
/// - serves registered sources from memory
/// - records every download
/// - fails sources on request
/// - tracks the highest number of downloads in flight at once.
#[derive(Default)]
pub struct FakeFetcher {
    sources: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<HashSet<String>>,
    downloads: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_source(&self, source: &str, bytes: impl Into<Vec<u8>>) {
        self.sources
            .lock()
            .unwrap()
            .insert(source.to_string(), bytes.into());
    }

    /// Make every download of `source` fail as unreachable.
    pub fn fail_source(&self, source: &str) {
        self.failing.lock().unwrap().insert(source.to_string());
    }

    pub fn heal_source(&self, source: &str) {
        self.failing.lock().unwrap().remove(source);
    }

    /// Delay every download (to widen race windows).
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Sources downloaded so far, in order.
    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn download_count(&self, source: &str) -> usize {
        self.downloads
            .lock()
            .unwrap()
            .iter()
            .filter(|s| *s == source)
            .count()
    }

    pub fn total_downloads(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }

    pub fn reset_counts(&self) {
        self.downloads.lock().unwrap().clear();
        self.max_in_flight.store(0, Ordering::SeqCst);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Fetcher for FakeFetcher {
    fn fetch<'a>(&'a self, source: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = *self.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let result = self.serve(source, dest).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }
}

impl FakeFetcher {
    async fn serve(&self, source: &str, dest: &Path) -> Result<u64> {
        self.downloads.lock().unwrap().push(source.to_string());

        if self.failing.lock().unwrap().contains(source) {
            bail!("source '{source}' unreachable (injected)");
        }
        let bytes = self.sources.lock().unwrap().get(source).cloned();
        let Some(bytes) = bytes else {
            bail!("source '{source}' not registered with the fake fetcher");
        };

        tokio::fs::write(dest, &bytes).await?;
        Ok(bytes.len() as u64)
    }
}
