// src/config/model.rs

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::errors::{EnvyError, Result};
use crate::types::{Identity, Phase};

/// Manifest as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// cache_root = ".envy-cache"
/// jobs = 4
///
/// [[spec]]
/// identity = "local.app@v1"
/// fetch = { source = "files/app.tar", sha256 = "..." }
/// dependencies = [{ spec = "local.lib@v1", needed_by = "stage" }]
/// build = "make"
/// install = "make install PREFIX=$ENVY_INSTALL_DIR"
/// ```
///
/// All sections are optional; an empty manifest simply declares nothing.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawManifest {
    /// Engine behaviour from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// All `[[spec]]` entries, in declaration order.
    #[serde(default, rename = "spec")]
    pub specs: Vec<RawSpec>,
}

/// `[config]` section. Every field can be overridden from the CLI.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigSection {
    /// Root of the package cache. Relative paths resolve against the
    /// manifest's directory.
    #[serde(default)]
    pub cache_root: Option<PathBuf>,

    /// Size of the worker pool executing phase bodies.
    #[serde(default)]
    pub jobs: Option<usize>,

    /// Trace sink specification, e.g. `"stderr,file:trace.jsonl"`.
    #[serde(default)]
    pub trace: Option<String>,
}

/// One `[[spec]]` entry.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawSpec {
    /// `IDENTITY`. Optional here so that its absence is reported as a
    /// parse error naming the offending entry instead of a TOML error.
    #[serde(default)]
    pub identity: Option<String>,

    /// Where the spec itself was declared (informational).
    #[serde(default)]
    pub source: Option<String>,

    /// `FETCH`: a single `{ source, sha256? }` table or an array of them.
    #[serde(default)]
    pub fetch: Option<FetchDecl>,

    /// `DEPENDENCIES`.
    #[serde(default)]
    pub dependencies: Vec<RawDependency>,

    #[serde(default)]
    pub check: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub build: Option<String>,
    #[serde(default)]
    pub install: Option<String>,
    #[serde(default)]
    pub deploy: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FetchDecl {
    One(RawFetchFile),
    Many(Vec<RawFetchFile>),
}

impl FetchDecl {
    pub fn into_vec(self) -> Vec<RawFetchFile> {
        match self {
            FetchDecl::One(f) => vec![f],
            FetchDecl::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFetchFile {
    pub source: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDependency {
    pub spec: String,
    #[serde(default)]
    pub source: Option<String>,
    /// Phase name; defaults to `build` when absent.
    #[serde(default)]
    pub needed_by: Option<String>,
}

/// A validated spec declaration. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecDecl {
    pub identity: Identity,
    pub source: Option<String>,
    pub fetch: Vec<FetchFile>,
    pub dependencies: Vec<DependencyDecl>,
    pub commands: RecipeCommands,
}

/// A declared fetch file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFile {
    pub source: String,
    /// Lower-case hex SHA-256, if declared.
    pub sha256: Option<String>,
    /// File name inside `fetch/`, derived from the source.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDecl {
    pub spec: Identity,
    pub source: Option<String>,
    pub needed_by: Phase,
}

/// Shell commands backing the phase bodies of the shell recipe adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipeCommands {
    pub check: Option<String>,
    pub stage: Option<String>,
    pub build: Option<String>,
    pub install: Option<String>,
    pub deploy: Option<String>,
}

/// Validated manifest.
///
/// Construct via `TryFrom<RawManifest>` (see `config::validate`) or
/// [`crate::config::load_and_validate`]; both guarantee that every
/// dependency is declared and the graph is acyclic.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub config: ConfigSection,
    specs: BTreeMap<Identity, Arc<SpecDecl>>,
    /// Directory relative sources and the cache root resolve against.
    root_dir: PathBuf,
}

impl Manifest {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        specs: BTreeMap<Identity, Arc<SpecDecl>>,
    ) -> Self {
        Self {
            config,
            specs,
            root_dir: PathBuf::from("."),
        }
    }

    pub fn with_root_dir(mut self, root_dir: impl Into<PathBuf>) -> Self {
        self.root_dir = root_dir.into();
        self
    }

    pub fn root_dir(&self) -> &std::path::Path {
        &self.root_dir
    }

    pub fn get(&self, identity: &str) -> Option<&Arc<SpecDecl>> {
        self.specs.get(identity)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.specs.contains_key(identity)
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(|s| s.as_str())
    }

    pub fn specs(&self) -> impl Iterator<Item = &Arc<SpecDecl>> {
        self.specs.values()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Transitive dependency closure of `roots`, roots included, sorted.
    ///
    /// Fails with [`EnvyError::SpecNotFound`] if any root is not declared.
    pub fn closure<S: AsRef<str>>(&self, roots: &[S]) -> Result<Vec<Identity>> {
        let mut seen: BTreeSet<Identity> = BTreeSet::new();
        let mut stack: Vec<Identity> = Vec::new();

        for root in roots {
            let root = root.as_ref();
            if !self.specs.contains_key(root) {
                return Err(EnvyError::SpecNotFound(root.to_string()));
            }
            stack.push(root.to_string());
        }

        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let decl = self
                .specs
                .get(&id)
                .ok_or_else(|| EnvyError::SpecNotFound(id.clone()))?;
            stack.extend(decl.dependencies.iter().map(|d| d.spec.clone()));
        }

        Ok(seen.into_iter().collect())
    }
}
