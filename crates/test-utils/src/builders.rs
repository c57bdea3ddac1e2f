#![allow(dead_code)]

use std::path::PathBuf;

use envy::config::{
    FetchDecl, Manifest, RawDependency, RawFetchFile, RawManifest, RawSpec,
};
use envy::errors::Result;

/// Builder for `Manifest` to simplify test setup.
pub struct ManifestBuilder {
    manifest: RawManifest,
    root_dir: Option<PathBuf>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self {
            manifest: RawManifest::default(),
            root_dir: None,
        }
    }

    pub fn with_spec(mut self, spec: RawSpec) -> Self {
        self.manifest.specs.push(spec);
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.manifest.config.jobs = Some(jobs);
        self
    }

    pub fn with_root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(dir.into());
        self
    }

    pub fn try_build(self) -> Result<Manifest> {
        let manifest = Manifest::try_from(self.manifest)?;
        Ok(match self.root_dir {
            Some(dir) => manifest.with_root_dir(dir),
            None => manifest,
        })
    }

    pub fn build(self) -> Manifest {
        self.try_build()
            .expect("Failed to build valid manifest from builder")
    }
}

impl Default for ManifestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for one `[[spec]]` entry.
pub struct SpecBuilder {
    spec: RawSpec,
    files: Vec<RawFetchFile>,
}

impl SpecBuilder {
    pub fn new(identity: &str) -> Self {
        Self {
            spec: RawSpec {
                identity: Some(identity.to_string()),
                ..Default::default()
            },
            files: Vec::new(),
        }
    }

    /// Declare a fetch file without a hash.
    pub fn fetch(mut self, source: &str) -> Self {
        self.files.push(RawFetchFile {
            source: source.to_string(),
            sha256: None,
        });
        self
    }

    /// Declare a fetch file verified against `sha256`.
    pub fn fetch_verified(mut self, source: &str, sha256: &str) -> Self {
        self.files.push(RawFetchFile {
            source: source.to_string(),
            sha256: Some(sha256.to_string()),
        });
        self
    }

    /// Depend on `spec` with the default needed-by phase.
    pub fn depends_on(mut self, spec: &str) -> Self {
        self.spec.dependencies.push(RawDependency {
            spec: spec.to_string(),
            source: None,
            needed_by: None,
        });
        self
    }

    pub fn depends_on_by(mut self, spec: &str, needed_by: &str) -> Self {
        self.spec.dependencies.push(RawDependency {
            spec: spec.to_string(),
            source: None,
            needed_by: Some(needed_by.to_string()),
        });
        self
    }

    pub fn check_cmd(mut self, cmd: &str) -> Self {
        self.spec.check = Some(cmd.to_string());
        self
    }

    pub fn build_cmd(mut self, cmd: &str) -> Self {
        self.spec.build = Some(cmd.to_string());
        self
    }

    pub fn install_cmd(mut self, cmd: &str) -> Self {
        self.spec.install = Some(cmd.to_string());
        self
    }

    pub fn build(mut self) -> RawSpec {
        self.spec.fetch = match self.files.len() {
            0 => None,
            1 => self.files.pop().map(FetchDecl::One),
            _ => Some(FetchDecl::Many(self.files)),
        };
        self.spec
    }
}
