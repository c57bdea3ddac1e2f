// tests/property/main.rs

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use proptest::prelude::*;

use envy::config::Manifest;
use envy::dag::{Admission, Scheduler, SpecRunState};
use envy::errors::EnvyError;
use envy::trace::Tracer;
use envy::types::Phase;
use envy_test_utils::builders::{ManifestBuilder, SpecBuilder};

fn identity(i: usize) -> String {
    format!("local.s{i}@v1")
}

// Strategy to generate a valid manifest DAG.
// Acyclic by construction: spec N may only depend on specs 0..N-1.
fn dag_strategy(max_specs: usize) -> impl Strategy<Value = Manifest> {
    (1..=max_specs).prop_flat_map(|num_specs| {
        let deps_strat = proptest::collection::vec(
            proptest::collection::vec((any::<usize>(), 0..8u8), 0..num_specs),
            num_specs,
        );

        deps_strat.prop_map(move |raw_deps| {
            let mut builder = ManifestBuilder::new();
            for (i, potential) in raw_deps.into_iter().enumerate() {
                let mut spec = SpecBuilder::new(&identity(i));
                let mut seen = HashSet::new();
                if i > 0 {
                    for (dep, phase) in potential {
                        let dep = dep % i;
                        if seen.insert(dep) {
                            let needed_by = Phase::from_num(phase).unwrap_or(Phase::AssetBuild);
                            spec = spec.depends_on_by(&identity(dep), needed_by.name());
                        }
                    }
                }
                builder = builder.with_spec(spec.build());
            }
            builder.build()
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn scheduler_terminates_and_honours_needed_by(
        manifest in dag_strategy(8),
        failing in proptest::collection::vec((0..8usize, 0..8u8), 0..3),
    ) {
        let s = Scheduler::new(Tracer::disabled());
        // Registration order must not matter; go in reverse.
        let specs: Vec<_> = manifest.specs().cloned().collect();
        for decl in specs.iter().rev() {
            s.register(decl).unwrap();
        }
        for decl in &specs {
            s.raise_target(&decl.identity, Phase::Completion).unwrap();
        }

        let failures: HashMap<String, Phase> = failing
            .into_iter()
            .filter(|(i, _)| *i < specs.len())
            .map(|(i, p)| (identity(i), Phase::from_num(p).unwrap_or(Phase::Completion)))
            .collect();

        let mut started: HashMap<String, Vec<Phase>> = HashMap::new();
        // Each admitted phase moves a cursor forward or fails a spec, so
        // this bound is never reached by a correct scheduler.
        let mut budget = specs.len() * Phase::ALL.len() * 2 + 1;

        loop {
            let mut progressed = false;
            for decl in &specs {
                let id = decl.identity.as_str();
                let Admission::Run(phase) = s.advance(id).unwrap() else {
                    continue;
                };
                progressed = true;
                prop_assert!(budget > 0, "scheduler did not terminate");
                budget -= 1;

                // Needed-by: every edge at or below this phase is satisfied.
                for dep in decl.dependencies.iter().filter(|d| d.needed_by <= phase) {
                    let completed = s.status(&dep.spec).unwrap().completed;
                    prop_assert!(
                        completed >= Some(dep.needed_by),
                        "{id} started {phase} while {} had only completed {completed:?} (needs {})",
                        dep.spec,
                        dep.needed_by
                    );
                }
                started.entry(id.to_string()).or_default().push(phase);

                if failures.get(id) == Some(&phase) {
                    let err = EnvyError::PhaseExecution {
                        spec: id.to_string(),
                        phase,
                        message: "injected".into(),
                    };
                    s.fail(id, phase, &err).unwrap();
                } else {
                    s.complete_phase(id, phase, Duration::ZERO).unwrap();
                }
            }
            if !progressed {
                break;
            }
        }

        prop_assert!(s.all_settled());
        for decl in &specs {
            let id = decl.identity.as_str();
            let status = s.status(id).unwrap();
            prop_assert!(
                matches!(status.state, SpecRunState::Done | SpecRunState::Failed),
                "{id} stuck in {:?}",
                status.state
            );

            // Phases start in order from the first one, with no gaps.
            let phases = started.get(id).cloned().unwrap_or_default();
            let expected: Vec<Phase> = Phase::ALL.iter().copied().take(phases.len()).collect();
            prop_assert_eq!(phases, expected);

            if failures.is_empty() {
                prop_assert_eq!(status.state, SpecRunState::Done);
            }
        }
    }
}
