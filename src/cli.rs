// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::default_manifest_path;

/// Command-line arguments for `envy`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "envy",
    version,
    about = "Fetch, build and cache packages described by spec manifests.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `ENVY_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    /// Trace sinks, e.g. `stderr,file:trace.jsonl`.
    ///
    /// Overrides `trace` in the manifest's `[config]`.
    #[arg(long, value_name = "SPEC", global = true)]
    pub trace: Option<String>,

    /// Cache root directory.
    ///
    /// Default: `cache_root` from the manifest, else `.envy-cache` next to it.
    #[arg(long, value_name = "DIR", global = true)]
    pub cache_root: Option<PathBuf>,

    /// Maximum number of phases running at once.
    #[arg(long, short = 'j', value_name = "N", global = true)]
    pub jobs: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run one spec to completion; dependencies are pulled in on demand.
    Run {
        /// Identity of the spec to run (e.g. `local.zlib@1.3`).
        identity: String,
        /// Manifest declaring the spec and its dependencies.
        spec_source: PathBuf,
    },

    /// Bring every spec of the manifest (or the closure of the named ones)
    /// to completion.
    Sync(ManifestArgs),

    /// Extend targets across the whole closure first, then run.
    Product(ManifestArgs),

    /// Validate and print the closure, variants and edges without running.
    Plan(ManifestArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ManifestArgs {
    /// Path to the manifest (TOML).
    #[arg(long, value_name = "PATH", default_value_os_t = default_manifest_path())]
    pub manifest: PathBuf,

    /// Identities to process. Default: every spec in the manifest.
    #[arg(value_name = "IDENTITY")]
    pub identities: Vec<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_global_flags() {
        let args = CliArgs::try_parse_from([
            "envy",
            "run",
            "local.a@v1",
            "specs/envy.toml",
            "--jobs",
            "2",
            "--trace",
            "stderr",
        ])
        .unwrap();

        assert_eq!(args.jobs, Some(2));
        assert_eq!(args.trace.as_deref(), Some("stderr"));
        match args.command {
            Command::Run {
                identity,
                spec_source,
            } => {
                assert_eq!(identity, "local.a@v1");
                assert_eq!(spec_source, PathBuf::from("specs/envy.toml"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn manifest_commands_default_to_envy_toml() {
        let args = CliArgs::try_parse_from(["envy", "product", "a@1", "b@1"]).unwrap();
        match args.command {
            Command::Product(m) => {
                assert_eq!(m.manifest, PathBuf::from("envy.toml"));
                assert_eq!(m.identities, vec!["a@1", "b@1"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn run_requires_identity_and_source() {
        assert!(CliArgs::try_parse_from(["envy", "run", "a@1"]).is_err());
    }
}
