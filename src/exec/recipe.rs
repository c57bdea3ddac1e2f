// src/exec/recipe.rs

//! The capability interface phase bodies are invoked through.
//!
//! The scheduler never looks inside a recipe: whatever scripting or host
//! mechanism backs a spec is adapted to [`RecipeBody`], and tests provide
//! their own implementation that records calls instead of running anything.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;

use crate::types::{BoxFuture, Identity, Phase};

/// Everything a phase body may need to know about where it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseContext {
    pub identity: Identity,
    pub phase: Phase,
    pub variant: String,
    pub fetch_dir: PathBuf,
    pub stage_dir: PathBuf,
    /// The cache entry's `pkg/` directory.
    pub install_dir: PathBuf,
    /// Paths of the declared fetch files inside `fetch_dir`, in declaration
    /// order.
    pub fetched_files: Vec<PathBuf>,
    /// `pkg/` directory of every declared dependency.
    pub dependencies: BTreeMap<Identity, PathBuf>,
    /// Directory of the manifest that declared the spec.
    pub manifest_dir: PathBuf,
}

impl PhaseContext {
    pub fn for_phase(&self, phase: Phase) -> Self {
        Self {
            phase,
            ..self.clone()
        }
    }
}

/// Phase bodies of one spec. Every step defaults to a no-op.
pub trait RecipeBody: Send + Sync {
    /// Whether the asset is already satisfied outside the cache (for example
    /// provided by the system). `true` turns the asset phases into no-ops.
    fn check<'a>(&'a self, _ctx: &'a PhaseContext) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async { Ok(false) })
    }

    /// Runs after the declared files are verified in `fetch_dir`.
    fn fetch<'a>(&'a self, _ctx: &'a PhaseContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn stage<'a>(&'a self, _ctx: &'a PhaseContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn build<'a>(&'a self, _ctx: &'a PhaseContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Populate `install_dir`. The entry is finalised only if this succeeds.
    fn install<'a>(&'a self, _ctx: &'a PhaseContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn deploy<'a>(&'a self, _ctx: &'a PhaseContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Recipe with no phase bodies at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyRecipe;

impl RecipeBody for EmptyRecipe {}
