// src/engine/runtime.rs

//! Async shell around the scheduler: one driver task per spec, a bounded
//! pool of phase permits, and the wait for the run to settle.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::CacheStore;
use crate::config::Manifest;
use crate::dag::{Admission, Scheduler};
use crate::engine::phases::SpecRun;
use crate::exec::RecipeHost;
use crate::fetch::FetchCoordinator;
use crate::trace::Tracer;
use crate::types::Identity;

/// State shared by every driver of one run.
pub(crate) struct RunShared {
    pub scheduler: Scheduler,
    pub tracer: Tracer,
    pub store: CacheStore,
    pub coordinator: FetchCoordinator,
    pub recipe_host: Arc<dyn RecipeHost>,
    pub manifest: Arc<Manifest>,
    pub variants: HashMap<Identity, String>,
    /// Bounded worker pool: one permit per running phase body.
    pub permits: Semaphore,
}

impl fmt::Debug for RunShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunShared")
            .field("scheduler", &self.scheduler)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// Owns the driver tasks of one run.
pub(crate) struct Drivers {
    shared: Arc<RunShared>,
    tasks: JoinSet<()>,
}

impl Drivers {
    pub(crate) fn new(shared: Arc<RunShared>) -> Self {
        Self {
            shared,
            tasks: JoinSet::new(),
        }
    }

    /// Start the driver for an already registered spec.
    pub(crate) fn spawn(&mut self, identity: &str) {
        let Some(decl) = self.shared.manifest.get(identity).cloned() else {
            warn!(spec = %identity, "no declaration for spec; not starting a driver");
            return;
        };
        let Some(variant) = self.shared.variants.get(identity) else {
            warn!(spec = %identity, "no variant for spec; not starting a driver");
            return;
        };
        let entry = self.shared.store.entry(identity, variant);
        let run = SpecRun::new(Arc::clone(&self.shared), decl, entry);
        let shared = Arc::clone(&self.shared);
        let identity = identity.to_string();
        self.tasks.spawn(drive(shared, identity, run));
    }

    /// Wait until every spec is settled: failed, done, or parked at its
    /// target with nothing running.
    pub(crate) async fn wait_settled(&self) {
        let scheduler = &self.shared.scheduler;
        let mut changes = scheduler.subscribe();
        loop {
            changes.borrow_and_update();
            if scheduler.all_settled() {
                break;
            }
            if changes.changed().await.is_err() {
                break;
            }
        }
    }

    /// Stop every driver and wait for them to exit.
    pub(crate) async fn shutdown(mut self) {
        self.shared.scheduler.shutdown();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "spec driver panicked");
            }
        }
        debug!("all spec drivers stopped");
    }
}

/// Advance one spec for as long as it has work, sleeping between wakeups.
async fn drive(shared: Arc<RunShared>, identity: Identity, mut run: SpecRun) {
    let scheduler = &shared.scheduler;

    loop {
        if scheduler.is_shut_down() {
            break;
        }

        let admission = match scheduler.advance(&identity) {
            Ok(admission) => admission,
            Err(err) => {
                error!(spec = %identity, error = %err, "advance failed; stopping driver");
                break;
            }
        };

        match admission {
            Admission::Run(phase) => {
                run.lock_for(phase).await;
                let Ok(permit) = shared.permits.acquire().await else {
                    break;
                };
                let started = Instant::now();
                let result = run.execute(phase).await;
                drop(permit);

                let outcome = match result {
                    Ok(()) => scheduler.complete_phase(&identity, phase, started.elapsed()),
                    Err(err) => scheduler.fail(&identity, phase, &err).map(|_| ()),
                };
                if let Err(err) = outcome {
                    error!(spec = %identity, error = %err, "could not record phase outcome");
                    break;
                }
            }
            Admission::Done => {
                info!(spec = %identity, "driver finished");
                break;
            }
            Admission::Failed => break,
            Admission::Idle | Admission::Blocked { .. } | Admission::Busy => {
                run.park();
                if scheduler.wait_for_wakeup(&identity).await.is_err() {
                    break;
                }
            }
        }
    }

    run.park();
}
