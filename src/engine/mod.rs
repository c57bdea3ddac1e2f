// src/engine/mod.rs

//! Orchestration engine.
//!
//! This module ties together:
//! - manifest closure and variant resolution
//! - the phase [`Scheduler`] and target extension
//! - one async driver per spec, sharing a bounded pool of phase permits
//! - the phase bodies (cache check, fetch coordinator, recipe steps)
//!
//! The scheduling semantics live in [`crate::dag`]; the async shell is in
//! [`runtime`], and the per-phase work in [`phases`].

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::cache::{CacheStore, variant_hashes};
use crate::config::Manifest;
use crate::dag::{Scheduler, SpecRunState};
use crate::errors::{EnvyError, Result};
use crate::exec::{ManifestRecipeHost, RecipeHost};
use crate::fetch::{FetchCoordinator, Fetcher, LocalFetcher};
use crate::trace::Tracer;
use crate::types::{Identity, Phase};

pub mod phases;
pub mod runtime;

use runtime::{Drivers, RunShared};

/// Default size of the phase worker pool.
pub const DEFAULT_JOBS: usize = 4;

/// Default cache root, relative to the manifest directory.
pub const DEFAULT_CACHE_DIR: &str = ".envy-cache";

/// How the requested roots are turned into targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Roots target COMPLETION; dependencies are raised lazily, one hop at
    /// a time, when a dependent blocks on them.
    Single,
    /// Every member of the roots' closure targets COMPLETION.
    Closure,
    /// Target extension runs across the whole closure before any driver
    /// starts.
    Product,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub cache_root: PathBuf,
    /// Maximum number of phase bodies running at once.
    pub jobs: usize,
}

impl EngineOptions {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            jobs: DEFAULT_JOBS,
        }
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }
}

/// Outcome of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Specs that reached their target, sorted.
    pub completed: Vec<Identity>,
    /// Failed specs with their first error, sorted.
    pub failed: Vec<(Identity, String)>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Engine {
    manifest: Arc<Manifest>,
    options: EngineOptions,
    tracer: Tracer,
    fetcher: Arc<dyn Fetcher>,
    recipe_host: Arc<dyn RecipeHost>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("specs", &self.manifest.len())
            .field("options", &self.options)
            .field("tracer", &self.tracer)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine with the default collaborators: local-file fetching and shell
    /// recipes, both rooted at the manifest's directory. Tracing is off.
    pub fn new(manifest: Manifest, options: EngineOptions) -> Self {
        let root = manifest.root_dir().to_path_buf();
        Self {
            manifest: Arc::new(manifest),
            options,
            tracer: Tracer::disabled(),
            fetcher: Arc::new(LocalFetcher::new(root.clone())),
            recipe_host: Arc::new(ManifestRecipeHost::new(root)),
        }
    }

    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_recipe_host(mut self, host: Arc<dyn RecipeHost>) -> Self {
        self.recipe_host = host;
        self
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Run `roots` (every manifest spec when empty) according to `mode`.
    ///
    /// Unknown roots are reported before any work starts. Phase and fetch
    /// failures do not abort the run: they fail the affected specs and are
    /// listed in the returned report.
    pub async fn run<S: AsRef<str>>(&self, roots: &[S], mode: RunMode) -> Result<RunReport> {
        let roots: Vec<Identity> = if roots.is_empty() {
            self.manifest.identities().map(str::to_string).collect()
        } else {
            roots.iter().map(|r| r.as_ref().to_string()).collect()
        };
        if roots.is_empty() {
            return Ok(RunReport::default());
        }

        let closure = self.manifest.closure(&roots)?;
        let variants = variant_hashes(&self.manifest, &closure)?;
        info!(
            roots = ?roots,
            specs = closure.len(),
            mode = ?mode,
            jobs = self.options.jobs,
            "starting run"
        );

        let shared = Arc::new(RunShared {
            scheduler: Scheduler::new(self.tracer.clone()),
            tracer: self.tracer.clone(),
            store: CacheStore::new(self.options.cache_root.clone(), self.tracer.clone()),
            coordinator: FetchCoordinator::new(Arc::clone(&self.fetcher), self.tracer.clone()),
            recipe_host: Arc::clone(&self.recipe_host),
            manifest: Arc::clone(&self.manifest),
            variants,
            permits: Semaphore::new(self.options.jobs.max(1)),
        });
        let mut drivers = Drivers::new(Arc::clone(&shared));

        if let Err(err) = self.schedule(&shared, &mut drivers, &roots, &closure, mode) {
            drivers.shutdown().await;
            return Err(err);
        }

        drivers.wait_settled().await;
        drivers.shutdown().await;
        self.tracer.flush();

        let report = report_for(&shared.scheduler);
        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            "run finished"
        );
        Ok(report)
    }

    fn schedule(
        &self,
        shared: &RunShared,
        drivers: &mut Drivers,
        roots: &[Identity],
        closure: &[Identity],
        mode: RunMode,
    ) -> Result<()> {
        let scheduler = &shared.scheduler;

        for identity in closure {
            let decl = self
                .manifest
                .get(identity)
                .ok_or_else(|| EnvyError::SpecNotFound(identity.clone()))?;
            scheduler.register(decl)?;

            match mode {
                RunMode::Closure => {
                    scheduler.raise_target(identity, Phase::Completion)?;
                }
                RunMode::Single if roots.contains(identity) => {
                    scheduler.raise_target(identity, Phase::Completion)?;
                }
                RunMode::Single | RunMode::Product => {}
            }

            if mode != RunMode::Product {
                drivers.spawn(identity);
            }
        }

        if mode == RunMode::Product {
            let raised = scheduler.extend_to(roots, Phase::Completion)?;
            debug!(raised = raised.len(), "closure extended before scheduling");
            for identity in closure {
                drivers.spawn(identity);
            }
        }
        Ok(())
    }
}

fn report_for(scheduler: &Scheduler) -> RunReport {
    let mut report = RunReport::default();
    for (identity, status) in scheduler.statuses() {
        match status.state {
            SpecRunState::Failed => report
                .failed
                .push((identity, status.failure.unwrap_or_default())),
            SpecRunState::Done => report.completed.push(identity),
            SpecRunState::Idle if status.target.is_some() => report.completed.push(identity),
            _ => {}
        }
    }
    report
}
