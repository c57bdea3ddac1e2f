// tests/cache_behaviour.rs

mod common;
use crate::common::Harness;

use envy::cache::sha256_bytes;
use envy::engine::RunMode;
use envy::types::Phase;
use envy_test_utils::builders::{ManifestBuilder, SpecBuilder};
use envy_test_utils::with_timeout;

const APP: &str = "local.app@v1";

#[tokio::test]
async fn second_run_on_same_cache_downloads_nothing() {
    let h = Harness::new();
    h.fetcher.add_source("mem://app/app.tar", "payload");
    let manifest = ManifestBuilder::new()
        .with_spec(
            SpecBuilder::new(APP)
                .fetch_verified("mem://app/app.tar", &sha256_bytes(b"payload"))
                .build(),
        )
        .build();
    let engine = h.engine(manifest.clone());

    let report = with_timeout(engine.run(&[APP], RunMode::Single)).await.unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.completed, vec![APP.to_string()]);
    assert_eq!(h.fetcher.download_count("mem://app/app.tar"), 1);

    let entry = h.entry(&manifest, APP);
    assert!(entry.is_complete());
    assert!(entry.pkg_dir().join(format!("{APP}.installed")).is_file());
    assert!(!entry.fetch_dir().exists());
    assert!(!entry.stage_dir().exists());

    h.reset();
    let report = with_timeout(engine.run(&[APP], RunMode::Single)).await.unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(h.fetcher.total_downloads(), 0);

    let trace = h.trace();
    assert_eq!(trace.count("cache_hit", APP), 1);
    assert_eq!(trace.count("cache_miss", APP), 0);
    // Cached specs still walk every phase.
    assert_eq!(trace.phase_starts(APP), vec![0, 1, 2, 3, 4, 5, 6, 7]);
    assert_eq!(h.recipes.phases_of(APP), vec![Phase::AssetDeploy]);
}

#[tokio::test]
async fn retry_after_partial_fetch_downloads_only_the_failed_file() {
    let h = Harness::new();
    for (source, bytes) in [
        ("mem://app/a.bin", "aaa"),
        ("mem://app/b.bin", "bbb"),
        ("mem://app/c.bin", "ccc"),
    ] {
        h.fetcher.add_source(source, bytes);
    }
    let manifest = ManifestBuilder::new()
        .with_spec(
            SpecBuilder::new(APP)
                .fetch_verified("mem://app/a.bin", &sha256_bytes(b"aaa"))
                .fetch_verified("mem://app/b.bin", &sha256_bytes(b"bbb"))
                .fetch_verified("mem://app/c.bin", &sha256_bytes(b"ccc"))
                .build(),
        )
        .build();
    let engine = h.engine(manifest.clone());

    h.fetcher.fail_source("mem://app/b.bin");
    let report = with_timeout(engine.run(&[APP], RunMode::Single)).await.unwrap();
    assert!(!report.is_success());
    assert_eq!(report.failed.len(), 1);
    let (failed, message) = &report.failed[0];
    assert_eq!(failed, APP);
    assert!(message.contains("b.bin"), "error should name the file: {message}");

    let entry = h.entry(&manifest, APP);
    assert!(!entry.is_complete());
    assert!(entry.fetch_file("a.bin").is_file());
    assert!(entry.fetch_file("c.bin").is_file());
    assert!(!entry.fetch_file("b.bin").exists());
    assert!(!entry.has_fetch_marker());

    h.fetcher.heal_source("mem://app/b.bin");
    h.reset();
    let report = with_timeout(engine.run(&[APP], RunMode::Single)).await.unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(h.fetcher.downloads(), vec!["mem://app/b.bin".to_string()]);
    assert_eq!(h.trace().count("cache_hit", APP), 2);
    assert!(entry.is_complete());
}

#[tokio::test]
async fn corrupted_cached_file_is_downloaded_again_exactly_once() {
    let h = Harness::new();
    h.fetcher.add_source("mem://app/a.bin", "aaa");
    h.fetcher.add_source("mem://app/b.bin", "bbb");
    let manifest = ManifestBuilder::new()
        .with_spec(
            SpecBuilder::new(APP)
                .fetch_verified("mem://app/a.bin", &sha256_bytes(b"aaa"))
                .fetch_verified("mem://app/b.bin", &sha256_bytes(b"bbb"))
                .build(),
        )
        .build();
    let engine = h.engine(manifest.clone());

    // Stop after the fetch so the files stay in the entry.
    h.recipes.fail_at(APP, Phase::AssetBuild);
    let report = with_timeout(engine.run(&[APP], RunMode::Single)).await.unwrap();
    assert!(!report.is_success());

    let entry = h.entry(&manifest, APP);
    assert!(entry.has_fetch_marker());
    std::fs::write(entry.fetch_file("a.bin"), b"bit rot").unwrap();

    h.recipes.heal(APP, Phase::AssetBuild);
    h.reset();
    let report = with_timeout(engine.run(&[APP], RunMode::Single)).await.unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(h.fetcher.download_count("mem://app/a.bin"), 1);
    assert_eq!(h.fetcher.download_count("mem://app/b.bin"), 0);

    let trace = h.trace();
    assert_eq!(trace.count("cache_corrupt", APP), 1);
    assert_eq!(trace.count("phase_failed", APP), 0);
    assert!(entry.is_complete());
}

#[tokio::test]
async fn retry_stages_into_an_empty_stage_dir() {
    let h = Harness::new();
    h.fetcher.add_source("mem://app/app.tar", "payload");
    let manifest = ManifestBuilder::new()
        .with_spec(
            SpecBuilder::new(APP)
                .fetch_verified("mem://app/app.tar", &sha256_bytes(b"payload"))
                .build(),
        )
        .build();
    let engine = h.engine(manifest.clone());

    h.recipes.fail_at(APP, Phase::AssetBuild);
    let report = with_timeout(engine.run(&[APP], RunMode::Single)).await.unwrap();
    assert!(!report.is_success());

    let entry = h.entry(&manifest, APP);
    let staged = entry.stage_dir().join(format!("{APP}.staged"));
    assert!(staged.is_file());
    std::fs::write(entry.stage_dir().join("half-built.o"), b"partial").unwrap();

    h.recipes.heal(APP, Phase::AssetBuild);
    h.reset();
    let report = with_timeout(engine.run(&[APP], RunMode::Single)).await.unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(h.recipes.stage_contents_seen(APP), vec![Vec::<String>::new()]);
    assert_eq!(h.fetcher.total_downloads(), 0);
    assert!(entry.is_complete());
}

#[tokio::test]
async fn unhashed_files_are_never_trusted_from_an_unfinished_entry() {
    let h = Harness::new();
    h.fetcher.add_source("mem://app/plain.txt", "plain");
    h.fetcher.add_source("mem://app/pinned.bin", "pinned");
    let manifest = ManifestBuilder::new()
        .with_spec(
            SpecBuilder::new(APP)
                .fetch("mem://app/plain.txt")
                .fetch_verified("mem://app/pinned.bin", &sha256_bytes(b"pinned"))
                .build(),
        )
        .build();
    let engine = h.engine(manifest.clone());

    h.recipes.fail_at(APP, Phase::AssetInstall);
    with_timeout(engine.run(&[APP], RunMode::Single)).await.unwrap();

    h.recipes.heal(APP, Phase::AssetInstall);
    h.reset();
    let report = with_timeout(engine.run(&[APP], RunMode::Single)).await.unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(h.fetcher.download_count("mem://app/plain.txt"), 1);
    assert_eq!(h.fetcher.download_count("mem://app/pinned.bin"), 0);

    // Once the entry is complete its marker is trusted for everything.
    h.reset();
    with_timeout(engine.run(&[APP], RunMode::Single)).await.unwrap();
    assert_eq!(h.fetcher.total_downloads(), 0);
}

#[tokio::test]
async fn check_satisfied_skips_asset_phases_without_marking_the_entry() {
    let h = Harness::new();
    h.fetcher.add_source("mem://app/app.tar", "payload");
    let manifest = ManifestBuilder::new()
        .with_spec(SpecBuilder::new(APP).fetch("mem://app/app.tar").build())
        .build();
    let engine = h.engine(manifest.clone());
    h.recipes.satisfy_check(APP);

    let report = with_timeout(engine.run(&[APP], RunMode::Single)).await.unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(h.fetcher.total_downloads(), 0);
    assert_eq!(
        h.recipes.phases_of(APP),
        vec![Phase::AssetCheck, Phase::AssetDeploy]
    );
    assert!(!h.entry(&manifest, APP).is_complete());
    assert_eq!(h.trace().phase_starts(APP), vec![0, 1, 2, 3, 4, 5, 6, 7]);
}

#[tokio::test]
async fn hash_mismatch_after_download_fails_the_spec() {
    let h = Harness::new();
    h.fetcher.add_source("mem://app/app.tar", "tampered");
    let manifest = ManifestBuilder::new()
        .with_spec(
            SpecBuilder::new(APP)
                .fetch_verified("mem://app/app.tar", &sha256_bytes(b"payload"))
                .build(),
        )
        .build();
    let engine = h.engine(manifest.clone());

    let report = with_timeout(engine.run(&[APP], RunMode::Single)).await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].1.contains("hash mismatch"), "{report:?}");

    let entry = h.entry(&manifest, APP);
    assert!(!entry.fetch_file("app.tar").exists());
    assert!(!entry.fetch_file("app.tar.partial").exists());
}
