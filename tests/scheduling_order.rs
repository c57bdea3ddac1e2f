// tests/scheduling_order.rs

mod common;
use crate::common::Harness;

use std::time::Duration;

use envy::engine::RunMode;
use envy::trace::TraceEventKind;
use envy_test_utils::builders::{ManifestBuilder, SpecBuilder};
use envy_test_utils::with_timeout;

const A: &str = "local.a@v1";
const B: &str = "local.b@v1";
const C: &str = "local.c@v1";
const D: &str = "local.d@v1";
const U: &str = "local.unrelated@v1";

const STAGE: u8 = 3;
const BUILD: u8 = 4;
const INSTALL: u8 = 5;

#[tokio::test]
async fn every_spec_starts_every_phase_in_order() {
    let h = Harness::new();
    let manifest = ManifestBuilder::new()
        .with_spec(SpecBuilder::new(A).depends_on(B).depends_on_by(C, "fetch").build())
        .with_spec(SpecBuilder::new(B).depends_on_by(D, "install").build())
        .with_spec(SpecBuilder::new(C).depends_on(D).build())
        .with_spec(SpecBuilder::new(D).build())
        .build();

    let report = with_timeout(h.engine(manifest).run(&[A], RunMode::Closure))
        .await
        .unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.completed, vec![A, B, C, D]);

    let trace = h.trace();
    for spec in [A, B, C, D] {
        assert_eq!(
            trace.phase_starts(spec),
            vec![0, 1, 2, 3, 4, 5, 6, 7],
            "phase starts of {spec}"
        );
    }
}

#[tokio::test]
async fn parent_waits_for_needed_by_phase_of_dependency() {
    let h = Harness::new();
    h.recipes.set_delay(Duration::from_millis(5));
    let manifest = ManifestBuilder::new()
        .with_spec(SpecBuilder::new(A).depends_on_by(D, "stage").build())
        .with_spec(SpecBuilder::new(D).build())
        .build();

    let report = with_timeout(h.engine(manifest).run(&[A], RunMode::Closure))
        .await
        .unwrap();
    assert!(report.is_success(), "{report:?}");

    let trace = h.trace();
    let dep_done = trace.complete_index(D, STAGE).unwrap();
    let parent_start = trace.start_index(A, STAGE).unwrap();
    assert!(
        dep_done < parent_start,
        "parent started stage at {parent_start} before dependency finished it at {dep_done}"
    );
}

#[tokio::test]
async fn edge_without_needed_by_behaves_like_build() {
    let h = Harness::new();
    let manifest = ManifestBuilder::new()
        .with_spec(SpecBuilder::new(A).depends_on(D).build())
        .with_spec(SpecBuilder::new(B).depends_on_by(D, "build").build())
        .with_spec(SpecBuilder::new(D).build())
        .build();

    let a = manifest.get(A).unwrap();
    let b = manifest.get(B).unwrap();
    assert_eq!(a.dependencies[0].needed_by, b.dependencies[0].needed_by);

    let report = with_timeout(h.engine(manifest).run(&[A, B], RunMode::Closure))
        .await
        .unwrap();
    assert!(report.is_success(), "{report:?}");

    let trace = h.trace();
    let added: Vec<u8> = trace
        .events()
        .iter()
        .filter_map(|e| match e {
            TraceEventKind::DependencyAdded { needed_by_num, .. } => Some(*needed_by_num),
            _ => None,
        })
        .collect();
    assert_eq!(added, vec![BUILD, BUILD]);

    let dep_built = trace.complete_index(D, BUILD).unwrap();
    for parent in [A, B] {
        assert!(trace.start_index(parent, BUILD).unwrap() > dep_built);
    }
}

#[tokio::test]
async fn product_extends_a_diamond_before_anything_completes() {
    let h = Harness::new();
    let manifest = ManifestBuilder::new()
        .with_spec(
            SpecBuilder::new(A)
                .depends_on_by(B, "completion")
                .depends_on_by(C, "completion")
                .build(),
        )
        .with_spec(SpecBuilder::new(B).depends_on_by(D, "stage").build())
        .with_spec(SpecBuilder::new(C).depends_on_by(D, "install").build())
        .with_spec(SpecBuilder::new(D).build())
        .with_spec(SpecBuilder::new(U).build())
        .build();

    let report = with_timeout(h.engine(manifest).run(&[A], RunMode::Product))
        .await
        .unwrap();
    assert!(report.is_success(), "{report:?}");

    let trace = h.trace();
    assert_eq!(trace.target_raises(D), vec![INSTALL]);
    // D stops at the highest phase anyone needs.
    assert_eq!(trace.phase_starts(D), vec![0, 1, 2, 3, 4, 5]);

    let last_raise = *trace.target_indices(&[A, B, C, D]).last().unwrap();
    let first_completion = trace.first_completion_of(&[B, C, D]).unwrap();
    assert!(last_raise < first_completion);

    assert!(trace.target_raises(U).is_empty());
    assert_eq!(trace.count("spec_registered", U), 0);
}

#[tokio::test]
async fn unrelated_spec_in_the_manifest_is_left_alone() {
    let h = Harness::new();
    let manifest = ManifestBuilder::new()
        .with_spec(SpecBuilder::new(A).depends_on(B).build())
        .with_spec(SpecBuilder::new(B).build())
        .with_spec(SpecBuilder::new(U).build())
        .build();
    let engine = h.engine(manifest);

    for mode in [RunMode::Single, RunMode::Closure, RunMode::Product] {
        h.reset();
        let report = with_timeout(engine.run(&[A], mode)).await.unwrap();
        assert!(report.is_success(), "{mode:?}: {report:?}");
        assert!(!report.completed.contains(&U.to_string()));

        let trace = h.trace();
        assert!(trace.target_raises(U).is_empty(), "{mode:?}");
        assert!(trace.phase_starts(U).is_empty(), "{mode:?}");
    }
}

#[tokio::test]
async fn single_run_raises_dependencies_one_hop_at_a_time() {
    let h = Harness::new();
    let manifest = ManifestBuilder::new()
        .with_spec(SpecBuilder::new(A).depends_on(B).build())
        .with_spec(SpecBuilder::new(B).depends_on_by(C, "stage").build())
        .with_spec(SpecBuilder::new(C).build())
        .build();

    let report = with_timeout(h.engine(manifest.clone()).run(&[A], RunMode::Single))
        .await
        .unwrap();
    assert!(report.is_success(), "{report:?}");

    let trace = h.trace();
    assert_eq!(trace.target_raises(A), vec![7]);
    assert_eq!(trace.target_raises(B), vec![BUILD]);
    assert_eq!(trace.target_raises(C), vec![STAGE]);
    assert_eq!(trace.phase_starts(B), vec![0, 1, 2, 3, 4]);
    assert_eq!(trace.phase_starts(C), vec![0, 1, 2, 3]);

    // B blocked on C before C had any target at all.
    let c_raised = trace.target_indices(&[C])[0];
    let b_blocked = trace
        .events()
        .iter()
        .position(|e| matches!(e, TraceEventKind::Blocked { spec, .. } if spec == B))
        .unwrap();
    assert!(c_raised < b_blocked);

    // Only the root was installed.
    assert!(h.entry(&manifest, A).is_complete());
    assert!(!h.entry(&manifest, B).is_complete());
}

#[tokio::test]
async fn worker_pool_bounds_concurrent_downloads() {
    let h = Harness::new();
    h.fetcher.set_delay(Duration::from_millis(20));
    let mut builder = ManifestBuilder::new();
    for i in 0..6 {
        let source = format!("mem://p{i}/src.tar");
        h.fetcher.add_source(&source, format!("payload {i}"));
        builder = builder.with_spec(SpecBuilder::new(&format!("local.p{i}@v1")).fetch(&source).build());
    }
    let manifest = builder.build();

    let engine = envy::engine::Engine::new(
        manifest,
        envy::engine::EngineOptions::new(h.cache.path()).with_jobs(2),
    )
    .with_fetcher(h.fetcher.clone())
    .with_recipe_host(h.recipes.clone());

    let report = with_timeout(engine.run::<&str>(&[], RunMode::Closure)).await.unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.completed.len(), 6);
    assert_eq!(h.fetcher.total_downloads(), 6);
    assert!(h.fetcher.max_in_flight() <= 2);
    assert!(h.fetcher.max_in_flight() >= 1);
}
