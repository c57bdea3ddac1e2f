// src/cache/hash.rs

//! Content hashing: SHA-256 for fetched files, blake3 for variant keys.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use blake3::Hasher;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::{Manifest, SpecDecl};
use crate::errors::EnvyError;
use crate::types::Identity;

/// Number of hex characters kept from the blake3 digest for a variant key.
const VARIANT_HASH_LEN: usize = 16;

/// Compute the lower-case hex SHA-256 of a file, streaming its contents.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut file =
        File::open(path).with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("reading file for hashing: {:?}", path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Variant key for one spec given the variant keys of its dependencies.
///
/// Covers everything that determines the installed output: identity, fetch
/// declarations, recipe commands, and each dependency's own variant together
/// with its needed-by phase. Dependency order does not matter.
pub fn variant_hash(decl: &SpecDecl, dependency_variants: &HashMap<Identity, String>) -> String {
    let mut hasher = Hasher::new();

    field(&mut hasher, "identity", &decl.identity);

    for file in &decl.fetch {
        field(&mut hasher, "fetch.source", &file.source);
        field(
            &mut hasher,
            "fetch.sha256",
            file.sha256.as_deref().unwrap_or("-"),
        );
    }

    let commands = &decl.commands;
    for (name, cmd) in [
        ("check", &commands.check),
        ("stage", &commands.stage),
        ("build", &commands.build),
        ("install", &commands.install),
        ("deploy", &commands.deploy),
    ] {
        if let Some(cmd) = cmd {
            field(&mut hasher, name, cmd);
        }
    }

    let mut deps: Vec<_> = decl.dependencies.iter().collect();
    deps.sort_by(|a, b| a.spec.cmp(&b.spec));
    for dep in deps {
        field(&mut hasher, "dep", &dep.spec);
        field(&mut hasher, "dep.needed_by", dep.needed_by.name());
        if let Some(v) = dependency_variants.get(&dep.spec) {
            field(&mut hasher, "dep.variant", v);
        }
    }

    let hex = hasher.finalize().to_hex().to_string();
    hex[..VARIANT_HASH_LEN].to_string()
}

fn field(hasher: &mut Hasher, key: &str, value: &str) {
    // Length-prefix both parts so adjacent fields cannot run together.
    hasher.update(&(key.len() as u64).to_le_bytes());
    hasher.update(key.as_bytes());
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

/// Variant keys for `identities` and everything they depend on.
pub fn variant_hashes(
    manifest: &Manifest,
    identities: &[Identity],
) -> crate::errors::Result<HashMap<Identity, String>> {
    let mut memo: HashMap<Identity, String> = HashMap::new();
    for id in identities {
        variant_of(manifest, id, &mut memo)?;
    }
    Ok(memo)
}

// The manifest is validated acyclic, so plain recursion terminates.
fn variant_of(
    manifest: &Manifest,
    identity: &str,
    memo: &mut HashMap<Identity, String>,
) -> crate::errors::Result<String> {
    if let Some(v) = memo.get(identity) {
        return Ok(v.clone());
    }

    let decl = manifest
        .get(identity)
        .ok_or_else(|| EnvyError::SpecNotFound(identity.to_string()))?;

    let mut dep_variants = HashMap::new();
    for dep in &decl.dependencies {
        let v = variant_of(manifest, &dep.spec, memo)?;
        dep_variants.insert(dep.spec.clone(), v);
    }

    let v = variant_hash(decl, &dep_variants);
    debug!(spec = %identity, variant = %v, "computed variant hash");
    memo.insert(identity.to_string(), v.clone());
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DependencyDecl, FetchFile, RecipeCommands};
    use crate::types::Phase;

    fn decl(identity: &str, build: Option<&str>) -> SpecDecl {
        SpecDecl {
            identity: identity.to_string(),
            source: None,
            fetch: vec![FetchFile {
                source: "files/a.txt".into(),
                sha256: None,
                name: "a.txt".into(),
            }],
            dependencies: vec![DependencyDecl {
                spec: "dep@1".into(),
                source: None,
                needed_by: Phase::AssetBuild,
            }],
            commands: RecipeCommands {
                build: build.map(str::to_string),
                ..Default::default()
            },
        }
    }

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(sha256_file(&path).unwrap(), sha256_bytes(b"abc"));
    }

    #[test]
    fn variant_hash_is_stable_and_input_sensitive() {
        let deps: HashMap<_, _> = [("dep@1".to_string(), "0011".to_string())].into();
        let a = variant_hash(&decl("a@1", Some("make")), &deps);
        assert_eq!(a.len(), VARIANT_HASH_LEN);
        assert_eq!(a, variant_hash(&decl("a@1", Some("make")), &deps));

        assert_ne!(a, variant_hash(&decl("a@1", Some("make -j2")), &deps));
        assert_ne!(a, variant_hash(&decl("a@2", Some("make")), &deps));

        let other_deps: HashMap<_, _> = [("dep@1".to_string(), "ffff".to_string())].into();
        assert_ne!(a, variant_hash(&decl("a@1", Some("make")), &other_deps));
    }
}
