// src/exec/shell.rs

//! Shell-command recipe adapter.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::RecipeCommands;
use crate::exec::recipe::{PhaseContext, RecipeBody};
use crate::types::{BoxFuture, Identity};

/// Runs the manifest's per-phase shell commands with `sh -c`.
///
/// Commands run in the entry's `stage/` directory (the manifest directory
/// for `check`, which runs before the cache entry exists) with these
/// variables exported:
///
/// - `ENVY_SPEC`, `ENVY_PHASE`
/// - `ENVY_FETCH_DIR`, `ENVY_STAGE_DIR`, `ENVY_INSTALL_DIR`
/// - `ENVY_MANIFEST_DIR`
#[derive(Debug, Clone)]
pub struct ShellRecipe {
    identity: Identity,
    commands: RecipeCommands,
    manifest_dir: PathBuf,
}

impl ShellRecipe {
    pub fn new(identity: Identity, commands: RecipeCommands, manifest_dir: PathBuf) -> Self {
        Self {
            identity,
            commands,
            manifest_dir,
        }
    }

    fn command(&self, script: &str, ctx: &PhaseContext, cwd: &Path) -> Command {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(script);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(script);
            c
        };

        cmd.current_dir(cwd)
            .env("ENVY_SPEC", &ctx.identity)
            .env("ENVY_PHASE", ctx.phase.name())
            .env("ENVY_FETCH_DIR", &ctx.fetch_dir)
            .env("ENVY_STAGE_DIR", &ctx.stage_dir)
            .env("ENVY_INSTALL_DIR", &ctx.install_dir)
            .env("ENVY_MANIFEST_DIR", &self.manifest_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run `script` and return whether it exited successfully.
    async fn run(&self, script: &str, ctx: &PhaseContext, cwd: &Path) -> Result<bool> {
        info!(spec = %self.identity, phase = %ctx.phase, cmd = %script, "running recipe command");

        let mut child = self
            .command(script, ctx, cwd)
            .spawn()
            .with_context(|| format!("spawning {} command for '{}'", ctx.phase, self.identity))?;

        // Always consume both streams so pipe buffers never fill up.
        let stdout = child.stdout.take().map(|s| drain(s, &self.identity, "stdout"));
        let stderr = child.stderr.take().map(|s| drain(s, &self.identity, "stderr"));

        let status = child
            .wait()
            .await
            .with_context(|| format!("waiting for {} command of '{}'", ctx.phase, self.identity))?;

        for handle in [stdout, stderr].into_iter().flatten() {
            let _ = handle.await;
        }

        let code = status.code().unwrap_or(-1);
        debug!(
            spec = %self.identity,
            phase = %ctx.phase,
            exit_code = code,
            success = status.success(),
            "recipe command exited"
        );
        Ok(status.success())
    }

    async fn run_required(&self, script: Option<&str>, ctx: &PhaseContext) -> Result<()> {
        let Some(script) = script else {
            return Ok(());
        };
        if !self.run(script, ctx, &ctx.stage_dir).await? {
            bail!("{} command exited with a non-zero status", ctx.phase);
        }
        Ok(())
    }
}

fn drain<R>(stream: R, identity: &str, label: &'static str) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let identity = identity.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(spec = %identity, "{label}: {line}");
        }
    })
}

impl RecipeBody for ShellRecipe {
    fn check<'a>(&'a self, ctx: &'a PhaseContext) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            match self.commands.check.as_deref() {
                Some(script) => self.run(script, ctx, &self.manifest_dir).await,
                None => Ok(false),
            }
        })
    }

    fn stage<'a>(&'a self, ctx: &'a PhaseContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.run_required(self.commands.stage.as_deref(), ctx))
    }

    fn build<'a>(&'a self, ctx: &'a PhaseContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.run_required(self.commands.build.as_deref(), ctx))
    }

    fn install<'a>(&'a self, ctx: &'a PhaseContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.run_required(self.commands.install.as_deref(), ctx))
    }

    fn deploy<'a>(&'a self, ctx: &'a PhaseContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.run_required(self.commands.deploy.as_deref(), ctx))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::types::Phase;

    fn ctx(root: &Path) -> PhaseContext {
        let stage = root.join("stage");
        std::fs::create_dir_all(&stage).unwrap();
        std::fs::create_dir_all(root.join("pkg")).unwrap();
        PhaseContext {
            identity: "local.a@1".into(),
            phase: Phase::AssetInstall,
            variant: "v".into(),
            fetch_dir: root.join("fetch"),
            stage_dir: stage,
            install_dir: root.join("pkg"),
            fetched_files: Vec::new(),
            dependencies: Default::default(),
            manifest_dir: root.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn install_command_sees_install_dir() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = ShellRecipe::new(
            "local.a@1".into(),
            RecipeCommands {
                install: Some("echo hi > \"$ENVY_INSTALL_DIR/out.txt\"".into()),
                ..Default::default()
            },
            dir.path().to_path_buf(),
        );

        recipe.install(&ctx(dir.path())).await.unwrap();
        let out = std::fs::read_to_string(dir.path().join("pkg/out.txt")).unwrap();
        assert_eq!(out.trim(), "hi");
    }

    #[tokio::test]
    async fn non_zero_exit_fails_but_check_just_reports_false() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = ShellRecipe::new(
            "local.a@1".into(),
            RecipeCommands {
                check: Some("exit 3".into()),
                build: Some("exit 1".into()),
                ..Default::default()
            },
            dir.path().to_path_buf(),
        );
        let ctx = ctx(dir.path());

        assert!(!recipe.check(&ctx).await.unwrap());
        let err = recipe.build(&ctx.for_phase(Phase::AssetBuild)).await.unwrap_err();
        assert!(err.to_string().contains("non-zero"));
        // Steps without a command are no-ops.
        recipe.stage(&ctx).await.unwrap();
    }
}
