// src/config/validate.rs

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use regex::Regex;

use crate::cache::store::{FETCH_MARKER, PARTIAL_SUFFIX};
use crate::config::model::{
    DependencyDecl, FetchFile, Manifest, RawFetchFile, RawManifest, RawSpec, RecipeCommands,
    SpecDecl,
};
use crate::errors::{EnvyError, Result};
use crate::types::{DEFAULT_NEEDED_BY, Phase};

/// `namespace.name@version`; the namespace part is optional and may be dotted.
const IDENTITY_PATTERN: &str = r"^[A-Za-z0-9_\-]+(\.[A-Za-z0-9_\-]+)*@[A-Za-z0-9_.+\-]+$";

impl TryFrom<RawManifest> for Manifest {
    type Error = EnvyError;

    fn try_from(raw: RawManifest) -> std::result::Result<Self, Self::Error> {
        let specs = parse_specs(&raw.specs)?;
        validate_dependencies(&specs)?;
        validate_dag(&specs)?;
        Ok(Manifest::new_unchecked(raw.config, specs))
    }
}

fn parse_specs(raw: &[RawSpec]) -> Result<BTreeMap<String, Arc<SpecDecl>>> {
    let identity_re = Regex::new(IDENTITY_PATTERN)
        .map_err(|e| EnvyError::ConfigError(format!("identity pattern: {e}")))?;

    let mut specs = BTreeMap::new();
    for (index, spec) in raw.iter().enumerate() {
        let decl = parse_spec(index, spec, &identity_re)?;
        if specs.contains_key(&decl.identity) {
            return Err(EnvyError::parse(
                &decl.identity,
                "identity declared more than once",
            ));
        }
        specs.insert(decl.identity.clone(), Arc::new(decl));
    }
    Ok(specs)
}

fn parse_spec(index: usize, raw: &RawSpec, identity_re: &Regex) -> Result<SpecDecl> {
    let identity = match raw.identity.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            return Err(EnvyError::parse(
                format!("#{index}"),
                "missing IDENTITY",
            ));
        }
    };

    if !identity_re.is_match(&identity) {
        return Err(EnvyError::parse(
            &identity,
            "identity must look like `namespace.name@version`",
        ));
    }

    let fetch = parse_fetch(&identity, raw.fetch.clone().map(|f| f.into_vec()))?;

    let mut dependencies = Vec::with_capacity(raw.dependencies.len());
    for dep in &raw.dependencies {
        let needed_by = match dep.needed_by.as_deref() {
            None => DEFAULT_NEEDED_BY,
            Some(name) => name
                .parse::<Phase>()
                .map_err(|msg| EnvyError::parse(&identity, format!("dependency '{}': {msg}", dep.spec)))?,
        };
        dependencies.push(DependencyDecl {
            spec: dep.spec.trim().to_string(),
            source: dep.source.clone(),
            needed_by,
        });
    }

    Ok(SpecDecl {
        identity,
        source: raw.source.clone(),
        fetch,
        dependencies,
        commands: RecipeCommands {
            check: raw.check.clone(),
            stage: raw.stage.clone(),
            build: raw.build.clone(),
            install: raw.install.clone(),
            deploy: raw.deploy.clone(),
        },
    })
}

fn parse_fetch(identity: &str, raw: Option<Vec<RawFetchFile>>) -> Result<Vec<FetchFile>> {
    let mut names = HashSet::new();
    let mut files = Vec::new();

    for file in raw.unwrap_or_default() {
        let name = file_name_for_source(&file.source).ok_or_else(|| {
            EnvyError::parse(
                identity,
                format!("cannot derive a file name from source '{}'", file.source),
            )
        })?;

        if name == FETCH_MARKER || name.ends_with(PARTIAL_SUFFIX) {
            return Err(EnvyError::parse(
                identity,
                format!("fetch file name '{name}' is reserved"),
            ));
        }
        if !names.insert(name.clone()) {
            return Err(EnvyError::parse(
                identity,
                format!("two fetch sources map to the same file name '{name}'"),
            ));
        }

        let sha256 = match file.sha256 {
            None => None,
            Some(hash) => {
                let hash = hash.trim().to_lowercase();
                if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(EnvyError::parse(
                        identity,
                        format!("sha256 for '{name}' must be 64 hex characters"),
                    ));
                }
                Some(hash)
            }
        };

        files.push(FetchFile {
            source: file.source,
            sha256,
            name,
        });
    }

    Ok(files)
}

/// Last path segment of a source URI, without query string or fragment.
pub fn file_name_for_source(source: &str) -> Option<String> {
    let without_query = source.split(['?', '#']).next().unwrap_or(source);
    let trimmed = without_query.trim();
    let name = trimmed.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains(':') {
        return None;
    }
    Some(name.to_string())
}

fn validate_dependencies(specs: &BTreeMap<String, Arc<SpecDecl>>) -> Result<()> {
    for (name, spec) in specs.iter() {
        for dep in spec.dependencies.iter() {
            if dep.spec == *name {
                return Err(EnvyError::DagCycle(format!(
                    "spec '{}' cannot depend on itself",
                    name
                )));
            }
            if !specs.contains_key(&dep.spec) {
                return Err(EnvyError::SpecNotFound(format!(
                    "'{}' (dependency of '{}')",
                    dep.spec, name
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(specs: &BTreeMap<String, Arc<SpecDecl>>) -> Result<()> {
    // Edge direction: dependency -> dependent.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in specs.keys() {
        graph.add_node(name.as_str());
    }

    for (name, spec) in specs.iter() {
        for dep in spec.dependencies.iter() {
            graph.add_edge(dep.spec.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(EnvyError::DagCycle(format!(
            "cycle detected in dependency graph involving spec '{}'",
            cycle.node_id()
        ))),
    }
}
