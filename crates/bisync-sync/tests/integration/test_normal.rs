//! Normal and resync runs between two memory backends

use bisync_core::domain::Side;
use bisync_sync::{BisyncError, RunMode};

use crate::common::{path, t, Pair};

const FILES: &[(&str, &str)] = &[
    ("a.txt", "alpha"),
    ("b.txt", "bravo"),
    ("c.txt", "charlie"),
    ("docs/d.txt", "delta"),
    ("docs/e.txt", "echo"),
];

// ============================================================================
// First run and resync
// ============================================================================

#[tokio::test]
async fn test_first_run_requires_resync_then_converges() {
    let pair = Pair::new();
    pair.p1.write_file(&path("a.txt"), "from one", t(0)).await.unwrap();
    pair.p2.write_file(&path("b.txt"), "from two", t(0)).await.unwrap();

    let err = pair.run().await.unwrap_err();
    assert!(matches!(err, BisyncError::Aborted { must_resync: true, .. }));
    assert!(err.to_string().contains("cannot find prior Path1 or Path2 listings"));
    assert_eq!(err.exit_code(), 2);

    let summary = pair.resync().await;
    assert_eq!(summary.mode, RunMode::Resync);
    assert_eq!(summary.queues.copy2to1, [path("b.txt")].into());
    assert_eq!(summary.queues.copy1to2, [path("a.txt")].into());
    pair.assert_converged().await;
    assert_eq!(pair.p1.read_file(&path("b.txt")).await.unwrap(), b"from two");

    let summary = pair.run().await.unwrap();
    assert_eq!(summary.mode, RunMode::Normal);
    assert!(summary.queues.is_empty());
}

#[tokio::test]
async fn test_resync_copies_newer_path1_over_path2() {
    let pair = Pair::new();
    pair.p1.write_file(&path("x"), "version one", t(10)).await.unwrap();
    pair.p2.write_file(&path("x"), "v2", t(5)).await.unwrap();
    pair.p2.write_file(&path("only2"), "kept", t(5)).await.unwrap();

    pair.resync().await;

    assert_eq!(pair.p2.read_file(&path("x")).await.unwrap(), b"version one");
    assert!(pair.p1.exists(&path("only2")).await);
    pair.assert_converged().await;
}

// ============================================================================
// Propagation
// ============================================================================

#[tokio::test]
async fn test_changes_converge_and_rerun_is_idempotent() {
    let pair = Pair::synced(FILES).await;

    pair.p1.write_file(&path("a.txt"), "alpha v2", t(100)).await.unwrap();
    pair.p2.write_file(&path("new.txt"), "fresh", t(100)).await.unwrap();
    pair.p1.purge(&path("c.txt")).await;

    let summary = pair.run().await.unwrap();
    assert_eq!(summary.queues.copy1to2, [path("a.txt")].into());
    assert_eq!(summary.queues.copy2to1, [path("new.txt")].into());
    assert_eq!(summary.queues.delete2, [path("c.txt")].into());
    assert_eq!(summary.path2.copied, 1);
    assert_eq!(summary.path2.deleted, 1);
    assert!(!summary.has_failures());

    pair.assert_converged().await;
    assert_eq!(pair.p2.read_file(&path("a.txt")).await.unwrap(), b"alpha v2");
    assert!(!pair.p2.exists(&path("c.txt")).await);

    let again = pair.run().await.unwrap();
    assert!(again.queues.is_empty());
}

#[tokio::test]
async fn test_unchanged_run_rewrites_identical_listings() {
    let pair = Pair::synced(FILES).await;
    let store = pair.store();

    pair.run().await.unwrap();
    let before: Vec<Vec<u8>> = [Side::Path1, Side::Path2]
        .iter()
        .map(|side| std::fs::read(store.listing_path(*side)).unwrap())
        .collect();

    assert!(pair.run().await.unwrap().queues.is_empty());
    for (side, bytes) in [Side::Path1, Side::Path2].iter().zip(&before) {
        assert_eq!(&std::fs::read(store.listing_path(*side)).unwrap(), bytes);
    }
}

#[tokio::test]
async fn test_delete_propagates_to_unchanged_side() {
    let pair = Pair::synced(FILES).await;
    pair.p2.purge(&path("docs/d.txt")).await;

    let summary = pair.run().await.unwrap();

    assert_eq!(summary.queues.delete1, [path("docs/d.txt")].into());
    assert!(!pair.p1.exists(&path("docs/d.txt")).await);
    pair.assert_converged().await;
}

#[tokio::test]
async fn test_update_wins_over_delete() {
    let pair = Pair::synced(FILES).await;
    pair.p1.purge(&path("b.txt")).await;
    pair.p2.write_file(&path("b.txt"), "bravo edited", t(50)).await.unwrap();

    let summary = pair.run().await.unwrap();

    assert_eq!(summary.queues.copy2to1, [path("b.txt")].into());
    assert_eq!(pair.p1.read_file(&path("b.txt")).await.unwrap(), b"bravo edited");
    pair.assert_converged().await;
}

#[tokio::test]
async fn test_deleted_on_both_sides_is_dropped() {
    let pair = Pair::synced(FILES).await;
    pair.p1.purge(&path("a.txt")).await;
    pair.p2.purge(&path("a.txt")).await;

    let summary = pair.run().await.unwrap();

    assert_eq!(summary.queues.deleted_on_both, [path("a.txt")].into());
    assert_eq!(summary.queues.operation_count(), 0);
    assert!(pair.run().await.unwrap().queues.is_empty());
}

// ============================================================================
// Conflicts
// ============================================================================

#[tokio::test]
async fn test_conflict_keeps_both_versions() {
    let pair = Pair::synced(FILES).await;
    pair.p1.write_file(&path("c.txt"), "left edit", t(100)).await.unwrap();
    pair.p2.write_file(&path("c.txt"), "right side edit", t(120)).await.unwrap();

    let summary = pair.run().await.unwrap();

    assert_eq!(summary.queues.renamed1.get(&path("c.txt")), Some(&path("c.txt..path1")));
    assert_eq!(summary.queues.renamed2.get(&path("c.txt")), Some(&path("c.txt..path2")));
    assert_eq!(summary.path1.renamed, 1);
    assert_eq!(summary.path2.renamed, 1);

    pair.assert_converged().await;
    assert!(!pair.p1.exists(&path("c.txt")).await);
    assert_eq!(
        pair.p2.read_file(&path("c.txt..path1")).await.unwrap(),
        b"left edit"
    );
    assert_eq!(
        pair.p1.read_file(&path("c.txt..path2")).await.unwrap(),
        b"right side edit"
    );

    assert!(pair.run().await.unwrap().queues.is_empty());
}

#[tokio::test]
async fn test_identical_edits_are_not_conflicts() {
    let pair = Pair::synced(FILES).await;
    pair.p1.write_file(&path("a.txt"), "same edit", t(100)).await.unwrap();
    pair.p2.write_file(&path("a.txt"), "same edit", t(140)).await.unwrap();

    let summary = pair.run().await.unwrap();

    assert_eq!(summary.queues.rename_skipped, [path("a.txt")].into());
    assert!(summary.queues.renamed1.is_empty());
    assert!(!pair.p1.exists(&path("a.txt..path1")).await);
    pair.assert_converged().await;
}

#[tokio::test]
async fn test_conflict_tags_come_from_options() {
    let mut pair = Pair::synced(FILES).await;
    pair.opts.path1_tag = "laptop".into();
    pair.opts.path2_tag = "server".into();
    pair.p1.write_file(&path("a.txt"), "one", t(100)).await.unwrap();
    pair.p2.write_file(&path("a.txt"), "two!", t(100)).await.unwrap();

    pair.run().await.unwrap();

    assert!(pair.p1.exists(&path("a.txt..laptop")).await);
    assert!(pair.p1.exists(&path("a.txt..server")).await);
}

// ============================================================================
// Dry run and check-only
// ============================================================================

#[tokio::test]
async fn test_dry_run_predicts_real_run_without_mutation() {
    let pair = Pair::synced(FILES).await;
    pair.p1.write_file(&path("a.txt"), "alpha v2", t(100)).await.unwrap();
    pair.p2.purge(&path("b.txt")).await;
    pair.p2.write_file(&path("f.txt"), "foxtrot", t(100)).await.unwrap();

    let store = pair.store();
    let listing1_before = std::fs::read(store.listing_path(Side::Path1)).unwrap();

    let mut dry = pair.opts.clone();
    dry.dry_run = true;
    let preview = pair.run_with(&dry).await.unwrap();
    assert!(preview.dry_run);

    // nothing moved
    assert_eq!(pair.p2.read_file(&path("a.txt")).await.unwrap(), b"alpha");
    assert!(pair.p1.exists(&path("b.txt")).await);
    assert!(!pair.p1.exists(&path("f.txt")).await);
    assert_eq!(
        std::fs::read(store.listing_path(Side::Path1)).unwrap(),
        listing1_before
    );
    assert!(!store.lock_path().exists());

    let real = pair.run().await.unwrap();
    assert_eq!(real.queues, preview.queues);
    pair.assert_converged().await;
}

#[tokio::test]
async fn test_check_only_reports_drift() {
    let pair = Pair::synced(FILES).await;
    let mut check = pair.opts.clone();
    check.check_sync = bisync_core::config::CheckSync::Only;

    let summary = pair.run_with(&check).await.unwrap();
    assert_eq!(summary.mode, RunMode::CheckOnly);
    assert!(summary.queues.is_empty());

    let store = pair.store();
    let mut listing = store.load_prior(Side::Path1).await.unwrap();
    listing.remove(&path("a.txt"));
    store.commit(Side::Path1, &listing).await.unwrap();

    let err = pair.run_with(&check).await.unwrap_err();
    assert!(err.to_string().contains("out of sync"));
    assert!(err.requires_resync());
    assert!(store.err_path(Side::Path1).exists());
}

#[tokio::test]
async fn test_resilient_keeps_listings_on_retryable_error() {
    let pair = Pair::synced(FILES).await;
    let store = pair.store();
    let mut listing = store.load_prior(Side::Path2).await.unwrap();
    listing.remove(&path("b.txt"));
    store.commit(Side::Path2, &listing).await.unwrap();

    let mut check = pair.opts.clone();
    check.check_sync = bisync_core::config::CheckSync::Only;
    check.resilient = true;

    let err = pair.run_with(&check).await.unwrap_err();
    assert!(matches!(err, BisyncError::Aborted { must_resync: false, .. }));
    assert!(store.listing_path(Side::Path2).exists());
    assert!(!store.err_path(Side::Path2).exists());
}
