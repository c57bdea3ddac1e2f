use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use envy::config::SpecDecl;
use envy::exec::{PhaseContext, RecipeBody, RecipeHost};
use envy::types::{BoxFuture, Phase};

#[derive(Default)]
struct RecipeState {
    calls: Mutex<Vec<PhaseContext>>,
    failures: Mutex<HashSet<(String, Phase)>>,
    satisfied: Mutex<HashSet<String>>,
    delay: Mutex<Duration>,
    phase_delays: Mutex<HashMap<(String, Phase), Duration>>,
    stage_seen: Mutex<Vec<(String, Vec<String>)>>,
}

/// A fake recipe host that:
/// - hands every spec a recipe recording each phase body call
/// - fails chosen `(spec, phase)` pairs
/// - reports chosen specs as satisfied from `check`
/// - records what `stage/` held when each stage body started, then writes an
///   `<identity>.staged` file there
/// - writes an `<identity>.installed` file into `pkg/` on install.
#[derive(Clone, Default)]
pub struct FakeRecipeHost {
    state: Arc<RecipeState>,
}

impl FakeRecipeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_at(&self, spec: &str, phase: Phase) {
        self.state
            .failures
            .lock()
            .unwrap()
            .insert((spec.to_string(), phase));
    }

    pub fn heal(&self, spec: &str, phase: Phase) {
        self.state
            .failures
            .lock()
            .unwrap()
            .remove(&(spec.to_string(), phase));
    }

    pub fn satisfy_check(&self, spec: &str) {
        self.state.satisfied.lock().unwrap().insert(spec.to_string());
    }

    /// Delay every phase body (to let other specs interleave).
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = delay;
    }

    /// Delay only the `phase` body of `spec`, on top of any global delay.
    pub fn delay_at(&self, spec: &str, phase: Phase, delay: Duration) {
        self.state
            .phase_delays
            .lock()
            .unwrap()
            .insert((spec.to_string(), phase), delay);
    }

    /// Sorted file names found in `stage/` at the start of each stage body
    /// of `spec`, one list per call.
    pub fn stage_contents_seen(&self, spec: &str) -> Vec<Vec<String>> {
        self.state
            .stage_seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(identity, _)| identity == spec)
            .map(|(_, names)| names.clone())
            .collect()
    }

    /// Every phase body call so far, in order.
    pub fn calls(&self) -> Vec<PhaseContext> {
        self.state.calls.lock().unwrap().clone()
    }

    /// Phases whose body was called for `spec`, in order.
    pub fn phases_of(&self, spec: &str) -> Vec<Phase> {
        self.calls()
            .into_iter()
            .filter(|c| c.identity == spec)
            .map(|c| c.phase)
            .collect()
    }

    pub fn clear(&self) {
        self.state.calls.lock().unwrap().clear();
        self.state.stage_seen.lock().unwrap().clear();
    }
}

impl RecipeHost for FakeRecipeHost {
    fn recipe_for<'a>(&'a self, spec: &'a SpecDecl) -> BoxFuture<'a, Result<Arc<dyn RecipeBody>>> {
        let recipe = FakeRecipe {
            state: Arc::clone(&self.state),
        };
        let identity = spec.identity.clone();
        Box::pin(async move {
            if self
                .state
                .failures
                .lock()
                .unwrap()
                .contains(&(identity.clone(), Phase::RecipeFetch))
            {
                bail!("recipe for '{identity}' unavailable (injected)");
            }
            Ok(Arc::new(recipe) as Arc<dyn RecipeBody>)
        })
    }
}

struct FakeRecipe {
    state: Arc<RecipeState>,
}

impl FakeRecipe {
    async fn step(&self, ctx: &PhaseContext) -> Result<()> {
        self.state.calls.lock().unwrap().push(ctx.clone());

        let delay = *self.state.delay.lock().unwrap()
            + self
                .state
                .phase_delays
                .lock()
                .unwrap()
                .get(&(ctx.identity.clone(), ctx.phase))
                .copied()
                .unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let fail = self
            .state
            .failures
            .lock()
            .unwrap()
            .contains(&(ctx.identity.clone(), ctx.phase));
        if fail {
            bail!("{} of '{}' failed (injected)", ctx.phase, ctx.identity);
        }
        Ok(())
    }
}

impl RecipeBody for FakeRecipe {
    fn check<'a>(&'a self, ctx: &'a PhaseContext) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            self.step(ctx).await?;
            Ok(self.state.satisfied.lock().unwrap().contains(&ctx.identity))
        })
    }

    fn fetch<'a>(&'a self, ctx: &'a PhaseContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.step(ctx))
    }

    fn stage<'a>(&'a self, ctx: &'a PhaseContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut names = Vec::new();
            let mut entries = tokio::fs::read_dir(&ctx.stage_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
            names.sort();
            self.state
                .stage_seen
                .lock()
                .unwrap()
                .push((ctx.identity.clone(), names));

            self.step(ctx).await?;
            let marker = ctx.stage_dir.join(format!("{}.staged", ctx.identity));
            tokio::fs::write(marker, ctx.variant.as_bytes()).await?;
            Ok(())
        })
    }

    fn build<'a>(&'a self, ctx: &'a PhaseContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.step(ctx))
    }

    fn install<'a>(&'a self, ctx: &'a PhaseContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.step(ctx).await?;
            let marker = ctx.install_dir.join(format!("{}.installed", ctx.identity));
            tokio::fs::write(marker, ctx.variant.as_bytes()).await?;
            Ok(())
        })
    }

    fn deploy<'a>(&'a self, ctx: &'a PhaseContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.step(ctx))
    }
}
