// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{Manifest, RawManifest};
use crate::errors::Result;

/// Load a manifest from a given path and return the raw `RawManifest`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (identities, needed-by names, graph correctness). Use
/// [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawManifest> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let manifest: RawManifest = toml::from_str(&contents)?;

    Ok(manifest)
}

/// Load a manifest from path and validate it.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Checks identities, fetch declarations and `needed_by` names
///   (parse errors).
/// - Checks for unknown dependencies and cycles (graph errors).
/// - Anchors relative sources and the cache root at the manifest's
///   directory.
///
/// Nothing is scheduled until this has succeeded.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Manifest> {
    let raw = load_from_path(&path)?;
    let manifest = Manifest::try_from(raw)?;
    Ok(manifest.with_root_dir(manifest_root_dir(path.as_ref())))
}

/// Default manifest path: `envy.toml` in the current working directory.
pub fn default_manifest_path() -> PathBuf {
    PathBuf::from("envy.toml")
}

/// Directory a manifest's relative paths resolve against.
///
/// A bare file name like `envy.toml` (parent = "") falls back to the
/// current working directory.
fn manifest_root_dir(manifest_path: &Path) -> PathBuf {
    match manifest_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}
