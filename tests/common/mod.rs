#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use envy::cache::{CacheEntry, CacheStore, variant_hashes};
use envy::config::Manifest;
use envy::engine::{Engine, EngineOptions};
use envy::trace::{MemorySink, Tracer};
use envy_test_utils::fake_fetcher::FakeFetcher;
use envy_test_utils::fake_recipe::FakeRecipeHost;
use envy_test_utils::trace_log::TraceLog;

/// One cache root plus the fake collaborators every engine built from it
/// shares.
pub struct Harness {
    pub cache: TempDir,
    pub fetcher: Arc<FakeFetcher>,
    pub recipes: Arc<FakeRecipeHost>,
    pub sink: Arc<MemorySink>,
}

impl Harness {
    pub fn new() -> Self {
        envy_test_utils::init_tracing();
        Self {
            cache: tempfile::tempdir().unwrap(),
            fetcher: FakeFetcher::new(),
            recipes: FakeRecipeHost::new(),
            sink: MemorySink::new(),
        }
    }

    pub fn engine(&self, manifest: Manifest) -> Engine {
        self.engine_with(manifest, 4, self.recipes.clone())
    }

    /// An engine on the same cache root with its own worker count and
    /// recipe host.
    pub fn engine_with(&self, manifest: Manifest, jobs: usize, recipes: Arc<FakeRecipeHost>) -> Engine {
        Engine::new(manifest, EngineOptions::new(self.cache.path()).with_jobs(jobs))
            .with_tracer(Tracer::disabled().with_sink(self.sink.clone()))
            .with_fetcher(self.fetcher.clone())
            .with_recipe_host(recipes)
    }

    pub fn trace(&self) -> TraceLog {
        TraceLog::new(self.sink.kinds())
    }

    /// Cache entry `identity` resolves to under this harness's cache root.
    pub fn entry(&self, manifest: &Manifest, identity: &str) -> CacheEntry {
        let variants = variant_hashes(manifest, &[identity.to_string()]).unwrap();
        CacheStore::new(self.cache.path(), Tracer::disabled()).entry(identity, &variants[identity])
    }

    /// Forget everything recorded so far, keeping the cache.
    pub fn reset(&self) {
        self.fetcher.reset_counts();
        self.recipes.clear();
        self.sink.clear();
    }
}
