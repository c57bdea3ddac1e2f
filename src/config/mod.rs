// src/config/mod.rs

//! Manifest loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed spec declarations (`model.rs`).
//! - Load a manifest from disk (`loader.rs`).
//! - Validate identities, fetch lists, `needed_by` names and graph shape
//!   (`validate.rs`), so parse and graph errors surface before scheduling.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_manifest_path, load_and_validate, load_from_path};
pub use model::{
    ConfigSection, DependencyDecl, FetchDecl, FetchFile, Manifest, RawDependency, RawFetchFile,
    RawManifest, RawSpec, RecipeCommands, SpecDecl,
};
pub use validate::file_name_for_source;
