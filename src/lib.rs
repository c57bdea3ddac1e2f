// src/lib.rs

pub mod cache;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fetch;
pub mod logging;
pub mod trace;
pub mod types;

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::{debug, error, info};

use crate::cache::variant_hashes;
use crate::cli::{CliArgs, Command};
use crate::config::{Manifest, load_and_validate};
use crate::engine::{DEFAULT_CACHE_DIR, DEFAULT_JOBS, Engine, EngineOptions, RunMode};
use crate::trace::Tracer;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - manifest loading and validation
/// - cache root, worker pool size and trace sinks (flags over `[config]`)
/// - the engine, in the run mode the subcommand asks for
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let (manifest_path, roots, mode) = match &args.command {
        Command::Run {
            identity,
            spec_source,
        } => (spec_source.clone(), vec![identity.clone()], Some(RunMode::Single)),
        Command::Sync(m) => (m.manifest.clone(), m.identities.clone(), Some(RunMode::Closure)),
        Command::Product(m) => (m.manifest.clone(), m.identities.clone(), Some(RunMode::Product)),
        Command::Plan(m) => (m.manifest.clone(), m.identities.clone(), None),
    };

    let manifest = load_and_validate(&manifest_path)?;
    debug!(path = ?manifest_path, specs = manifest.len(), "manifest loaded");

    let Some(mode) = mode else {
        print_plan(&manifest, &roots)?;
        return Ok(());
    };

    let cache_root = cache_root_for(&args, &manifest);
    let jobs = args.jobs.or(manifest.config.jobs).unwrap_or(DEFAULT_JOBS);
    let tracer = match args.trace.as_deref().or(manifest.config.trace.as_deref()) {
        Some(spec) => Tracer::from_spec(spec)?,
        None => Tracer::disabled(),
    };
    info!(cache_root = ?cache_root, jobs, "cache configured");

    let engine = Engine::new(manifest, EngineOptions::new(cache_root).with_jobs(jobs))
        .with_tracer(tracer);

    // Ctrl-C drops the run; whatever was in flight is recovered next time
    // from the markers on disk.
    let report = tokio::select! {
        report = engine.run(&roots, mode) => report?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            bail!("interrupted");
        }
    };

    for (spec, err) in &report.failed {
        error!(spec = %spec, "{err}");
    }
    if !report.is_success() {
        let names: Vec<_> = report.failed.iter().map(|(s, _)| s.as_str()).collect();
        bail!("{} spec(s) failed: {}", names.len(), names.join(", "));
    }

    info!(completed = report.completed.len(), "all specs satisfied");
    Ok(())
}

/// Cache root priority: `--cache-root` (relative to the working directory),
/// then `[config].cache_root` (relative to the manifest), then
/// `.envy-cache` next to the manifest.
fn cache_root_for(args: &CliArgs, manifest: &Manifest) -> PathBuf {
    if let Some(root) = &args.cache_root {
        return root.clone();
    }
    match &manifest.config.cache_root {
        Some(root) => resolve_against(manifest.root_dir(), root),
        None => manifest.root_dir().join(DEFAULT_CACHE_DIR),
    }
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Dry-run output: closure, variant keys, edges and fetch files.
fn print_plan(manifest: &Manifest, roots: &[String]) -> Result<()> {
    let closure = if roots.is_empty() {
        manifest.identities().map(str::to_string).collect()
    } else {
        manifest.closure(roots)?
    };
    let variants = variant_hashes(manifest, &closure)?;

    println!("envy plan");
    println!("  manifest dir = {}", manifest.root_dir().display());
    println!();
    println!("specs ({}):", closure.len());
    for identity in &closure {
        let Some(decl) = manifest.get(identity) else {
            continue;
        };
        let variant = variants.get(identity).map(String::as_str).unwrap_or("?");
        println!("  - {identity} [{variant}]");
        for dep in &decl.dependencies {
            println!("      depends on: {} (needed by {})", dep.spec, dep.needed_by);
        }
        for file in &decl.fetch {
            match &file.sha256 {
                Some(sha) => println!("      fetch: {} <- {} (sha256 {sha})", file.name, file.source),
                None => println!("      fetch: {} <- {} (unverified)", file.name, file.source),
            }
        }
    }

    debug!("plan complete (no execution)");
    Ok(())
}
