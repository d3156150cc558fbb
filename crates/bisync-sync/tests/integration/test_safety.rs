//! Safety guards, access checks, lock and modtime preflight

use std::sync::Arc;

use bisync_core::domain::Side;
use bisync_core::ports::ModTimePrecision;
use bisync_sync::{BisyncError, MemoryBackend};

use crate::common::{path, t, Pair};

async fn hundred_files() -> Pair {
    let names: Vec<(String, String)> = (0..100)
        .map(|i| (format!("f{i:03}.dat"), format!("content {i}")))
        .collect();
    let files: Vec<(&str, &str)> = names
        .iter()
        .map(|(n, c)| (n.as_str(), c.as_str()))
        .collect();
    Pair::synced(&files).await
}

#[tokio::test]
async fn test_mass_delete_aborts_without_mutation() {
    let pair = hundred_files().await;
    for i in 0..80 {
        pair.p1.purge(&path(&format!("f{i:03}.dat"))).await;
    }

    let err = pair.run().await.unwrap_err();

    assert!(matches!(err, BisyncError::SafetyAbort(_)));
    assert!(err.to_string().contains("too many deletes"));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(pair.p2.file_paths().await.len(), 100);

    // listings untouched, no recovery needed
    let store = pair.store();
    assert!(store.listing_path(Side::Path1).exists());
    assert!(!store.err_path(Side::Path1).exists());
}

#[tokio::test]
async fn test_force_bypasses_delete_guard() {
    let mut pair = hundred_files().await;
    for i in 0..80 {
        pair.p1.purge(&path(&format!("f{i:03}.dat"))).await;
    }
    pair.opts.force = true;

    let summary = pair.run().await.unwrap();

    assert_eq!(summary.path2.deleted, 80);
    assert_eq!(pair.p2.file_paths().await.len(), 20);
}

#[tokio::test]
async fn test_delete_count_limit() {
    let mut pair = hundred_files().await;
    for i in 0..10 {
        pair.p2.purge(&path(&format!("f{i:03}.dat"))).await;
    }
    pair.opts.max_delete_count = Some(5);

    let err = pair.run().await.unwrap_err();
    assert!(err.to_string().contains("too many deletes"));
    assert_eq!(pair.p1.file_paths().await.len(), 100);
}

#[tokio::test]
async fn test_all_files_changed_aborts() {
    let pair = Pair::synced(&[("a", "1"), ("b", "2")]).await;
    pair.p2.write_file(&path("a"), "11", t(100)).await.unwrap();
    pair.p2.write_file(&path("b"), "22", t(100)).await.unwrap();

    let err = pair.run().await.unwrap_err();
    assert!(err.to_string().contains("all files were changed"));
    assert_eq!(pair.p1.read_file(&path("a")).await.unwrap(), b"1");
}

#[tokio::test]
async fn test_access_check_requires_matching_check_files() {
    let mut pair = Pair::synced(&[
        ("BISYNC_CHECK", ""),
        ("sub/BISYNC_CHECK", ""),
        ("data", "x"),
    ])
    .await;
    pair.opts.check_access = true;
    assert!(pair.run().await.is_ok());

    pair.p2.purge(&path("sub/BISYNC_CHECK")).await;
    let err = pair.run().await.unwrap_err();

    assert!(err.to_string().contains("check file check failed"));
    assert!(err.requires_resync());
    // the check file deletion was not propagated
    assert!(pair.p1.exists(&path("sub/BISYNC_CHECK")).await);
}

#[tokio::test]
async fn test_held_lock_blocks_run() {
    let pair = Pair::synced(&[("a", "1"), ("b", "2")]).await;
    let store = pair.store();
    assert!(!store.lock_path().exists());

    std::fs::write(store.lock_path(), "4242").unwrap();
    let err = pair.run().await.unwrap_err();
    assert!(matches!(err, BisyncError::LockHeld(_)));
    assert!(err.to_string().starts_with("prior lock file found"));

    // the other run's lock is left alone
    assert!(store.lock_path().exists());

    std::fs::remove_file(store.lock_path()).unwrap();
    assert!(pair.run().await.is_ok());
}

#[tokio::test]
async fn test_concurrent_runs_are_exclusive() {
    let pair = Pair::synced(&[("a", "1"), ("b", "2")]).await;

    let (first, second) = tokio::join!(pair.run(), pair.run());

    let results = [first, second];
    let held = results
        .iter()
        .filter(|r| matches!(r, Err(BisyncError::LockHeld(_))))
        .count();
    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok + held, 2);
    assert!(ok >= 1);
}

#[tokio::test]
async fn test_missing_modtime_support_fails_fast() {
    let mut pair = Pair::new();
    pair.p2 = Arc::new(MemoryBackend::new("two").with_precision(ModTimePrecision::NotSupported));

    let err = pair.run().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "modification time support is missing on path2"
    );

    pair.opts.force = true;
    pair.opts.resync = true;
    assert!(pair.run().await.is_ok());
}
