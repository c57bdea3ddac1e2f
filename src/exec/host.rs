// src/exec/host.rs

//! Resolution of a spec declaration into its recipe body.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::config::SpecDecl;
use crate::exec::recipe::{EmptyRecipe, RecipeBody};
use crate::exec::shell::ShellRecipe;
use crate::types::BoxFuture;

/// Trait abstracting where recipe bodies come from.
///
/// Consulted once per spec, in the RECIPE_FETCH phase.
pub trait RecipeHost: Send + Sync {
    fn recipe_for<'a>(&'a self, spec: &'a SpecDecl) -> BoxFuture<'a, Result<Arc<dyn RecipeBody>>>;
}

/// Default host: the shell commands declared in the manifest.
#[derive(Debug, Clone)]
pub struct ManifestRecipeHost {
    manifest_dir: PathBuf,
}

impl ManifestRecipeHost {
    pub fn new(manifest_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest_dir: manifest_dir.into(),
        }
    }
}

impl RecipeHost for ManifestRecipeHost {
    fn recipe_for<'a>(&'a self, spec: &'a SpecDecl) -> BoxFuture<'a, Result<Arc<dyn RecipeBody>>> {
        Box::pin(async move {
            let commands = &spec.commands;
            let has_commands = commands.check.is_some()
                || commands.stage.is_some()
                || commands.build.is_some()
                || commands.install.is_some()
                || commands.deploy.is_some();

            if !has_commands {
                debug!(spec = %spec.identity, "no recipe commands; using empty recipe");
                return Ok(Arc::new(EmptyRecipe) as Arc<dyn RecipeBody>);
            }

            Ok(Arc::new(ShellRecipe::new(
                spec.identity.clone(),
                commands.clone(),
                self.manifest_dir.clone(),
            )) as Arc<dyn RecipeBody>)
        })
    }
}
