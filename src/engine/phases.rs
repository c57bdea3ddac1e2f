// src/engine/phases.rs

//! Phase bodies of one spec.
//!
//! A [`SpecRun`] lives as long as the spec's driver and carries what the
//! phases hand to each other: the resolved recipe, whether the cache already
//! satisfies the asset phases, and the variant lock between fetch and
//! install.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::{CacheEntry, VariantGuard};
use crate::config::SpecDecl;
use crate::engine::runtime::RunShared;
use crate::errors::EnvyError;
use crate::exec::{EmptyRecipe, PhaseContext, RecipeBody};
use crate::trace::TraceEventKind;
use crate::types::Phase;

pub(crate) struct SpecRun {
    shared: Arc<RunShared>,
    decl: Arc<SpecDecl>,
    entry: CacheEntry,
    recipe: Option<Arc<dyn RecipeBody>>,
    /// The asset phases have nothing to do: either the entry is complete or
    /// the recipe's check reported the asset as satisfied.
    satisfied: bool,
    guard: Option<VariantGuard>,
}

impl SpecRun {
    pub(crate) fn new(shared: Arc<RunShared>, decl: Arc<SpecDecl>, entry: CacheEntry) -> Self {
        Self {
            shared,
            decl,
            entry,
            recipe: None,
            satisfied: false,
            guard: None,
        }
    }

    fn identity(&self) -> &str {
        &self.decl.identity
    }

    fn recipe(&self) -> Arc<dyn RecipeBody> {
        self.recipe
            .clone()
            .unwrap_or_else(|| Arc::new(EmptyRecipe) as Arc<dyn RecipeBody>)
    }

    fn context(&self, phase: Phase) -> PhaseContext {
        let dependencies: BTreeMap<_, _> = self
            .decl
            .dependencies
            .iter()
            .filter_map(|dep| {
                let variant = self.shared.variants.get(&dep.spec)?;
                let entry = self.shared.store.entry(&dep.spec, variant);
                Some((dep.spec.clone(), entry.pkg_dir()))
            })
            .collect();

        PhaseContext {
            identity: self.decl.identity.clone(),
            phase,
            variant: self.entry.variant.clone(),
            fetch_dir: self.entry.fetch_dir(),
            stage_dir: self.entry.stage_dir(),
            install_dir: self.entry.pkg_dir(),
            fetched_files: self
                .decl
                .fetch
                .iter()
                .map(|f| self.entry.fetch_file(&f.name))
                .collect(),
            dependencies,
            manifest_dir: self.shared.manifest.root_dir().to_path_buf(),
        }
    }

    fn phase_error(&self, phase: Phase, err: anyhow::Error) -> EnvyError {
        EnvyError::PhaseExecution {
            spec: self.identity().to_string(),
            phase,
            message: format!("{err:#}"),
        }
    }

    fn io_error(&self, phase: Phase, err: std::io::Error) -> EnvyError {
        EnvyError::PhaseExecution {
            spec: self.identity().to_string(),
            phase,
            message: format!("cache entry {}: {err}", self.entry.dir().display()),
        }
    }

    fn cache_hit(&self) {
        self.shared.tracer.emit(TraceEventKind::CacheHit {
            spec: self.identity().to_string(),
            variant: self.entry.variant.clone(),
            file: None,
        });
    }

    /// Hold the variant lock, taking it again if the spec was parked.
    ///
    /// Returns `false` when, once the lock is held, the entry turns out to be
    /// complete (another holder finished it) and the asset phases can stop.
    async fn hold_lock(&mut self) -> bool {
        if self.guard.is_none() {
            self.guard = Some(self.shared.store.lock(&self.entry).await);
            if self.entry.is_complete() {
                debug!(spec = %self.identity(), "entry completed by another holder");
                self.cache_hit();
                self.satisfied = true;
                self.guard = None;
                return false;
            }
        }
        true
    }

    /// Take the variant lock ahead of `phase` if its body writes into the
    /// entry. Runs before the spec queues for a worker permit, so a permit is
    /// never held while waiting on another holder of the entry.
    pub(crate) async fn lock_for(&mut self, phase: Phase) {
        if !self.satisfied && (Phase::AssetFetch..=Phase::AssetInstall).contains(&phase) {
            self.hold_lock().await;
        }
    }

    /// Drop the variant lock while the spec has nothing to do.
    pub(crate) fn park(&mut self) {
        if self.guard.take().is_some() {
            debug!(spec = %self.identity(), "released variant lock while parked");
        }
    }

    /// Execute the body of `phase`.
    pub(crate) async fn execute(&mut self, phase: Phase) -> Result<(), EnvyError> {
        match phase {
            Phase::RecipeFetch => {
                let recipe = self
                    .shared
                    .recipe_host
                    .recipe_for(&self.decl)
                    .await
                    .map_err(|e| self.phase_error(phase, e))?;
                self.recipe = Some(recipe);
            }

            Phase::AssetCheck => {
                if self.entry.is_complete() {
                    info!(spec = %self.identity(), variant = %self.entry.variant, "cache hit");
                    self.cache_hit();
                    self.satisfied = true;
                    return Ok(());
                }
                let ctx = self.context(phase);
                let satisfied = self
                    .recipe()
                    .check(&ctx)
                    .await
                    .map_err(|e| self.phase_error(phase, e))?;
                if satisfied {
                    info!(spec = %self.identity(), "check reports asset satisfied; skipping asset phases");
                    self.satisfied = true;
                } else {
                    self.shared.tracer.emit(TraceEventKind::CacheMiss {
                        spec: self.identity().to_string(),
                        variant: self.entry.variant.clone(),
                        file: None,
                    });
                }
            }

            Phase::AssetFetch => {
                if self.satisfied || !self.hold_lock().await {
                    return Ok(());
                }
                let report = self
                    .shared
                    .coordinator
                    .fetch_all(&self.entry, &self.decl.fetch)
                    .await
                    .map_err(|source| EnvyError::Fetch {
                        spec: self.identity().to_string(),
                        source,
                    })?;
                debug!(
                    spec = %self.identity(),
                    downloaded = report.downloaded.len(),
                    reused = report.reused.len(),
                    corrupted = report.corrupted.len(),
                    resumed = report.resumed,
                    "asset files ready"
                );
                let ctx = self.context(phase);
                self.recipe()
                    .fetch(&ctx)
                    .await
                    .map_err(|e| self.phase_error(phase, e))?;
            }

            Phase::AssetStage | Phase::AssetBuild => {
                if self.satisfied || !self.hold_lock().await {
                    return Ok(());
                }
                let prepared = if phase == Phase::AssetStage {
                    self.entry.reset_stage_dir()
                } else {
                    self.entry.prepare()
                };
                prepared.map_err(|e| self.io_error(phase, e))?;
                let ctx = self.context(phase);
                let recipe = self.recipe();
                let result = if phase == Phase::AssetStage {
                    recipe.stage(&ctx).await
                } else {
                    recipe.build(&ctx).await
                };
                result.map_err(|e| self.phase_error(phase, e))?;
            }

            Phase::AssetInstall => {
                if self.satisfied || !self.hold_lock().await {
                    return Ok(());
                }
                self.entry
                    .reset_pkg_dir()
                    .map_err(|e| self.io_error(phase, e))?;
                let ctx = self.context(phase);
                self.recipe()
                    .install(&ctx)
                    .await
                    .map_err(|e| self.phase_error(phase, e))?;
                self.entry.finalize().map_err(|e| self.io_error(phase, e))?;
                self.guard = None;
            }

            Phase::AssetDeploy => {
                let ctx = self.context(phase);
                self.recipe()
                    .deploy(&ctx)
                    .await
                    .map_err(|e| self.phase_error(phase, e))?;
            }

            Phase::Completion => {}
        }
        Ok(())
    }
}
