// src/exec/mod.rs

//! Phase body execution.
//!
//! - [`recipe`] defines the [`RecipeBody`] capability interface and the
//!   [`PhaseContext`] handed to it.
//! - [`host`] resolves a spec declaration into a recipe body.
//! - [`shell`] is the default adapter running manifest shell commands.

pub mod host;
pub mod recipe;
pub mod shell;

pub use host::{ManifestRecipeHost, RecipeHost};
pub use recipe::{EmptyRecipe, PhaseContext, RecipeBody};
pub use shell::ShellRecipe;
