//! Interruption, per-item failures and recovery through resync

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use bisync_core::domain::Side;
use bisync_core::ports::IBackend;
use bisync_sync::{bisync, BisyncError};

use crate::common::{path, t, FlakyBackend, Pair};

const FILES: &[(&str, &str)] = &[
    ("a", "one"),
    ("b", "two"),
    ("c", "three"),
    ("d", "four"),
    ("e", "five"),
];

#[tokio::test]
async fn test_cancel_before_apply_marks_listings_failed() {
    let pair = Pair::synced(FILES).await;
    pair.p1.write_file(&path("a"), "one, edited", t(100)).await.unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let (p1, p2) = pair.backends();
    let err = bisync(p1, p2, &pair.opts, token).await.unwrap_err();

    assert!(matches!(err, BisyncError::Interrupted));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(pair.p2.read_file(&path("a")).await.unwrap(), b"one");

    let store = pair.store();
    for side in [Side::Path1, Side::Path2] {
        assert!(!store.listing_path(side).exists());
        assert!(store.err_path(side).exists());
    }
    assert!(!store.lock_path().exists());

    // later runs refuse until a resync
    let err = pair.run().await.unwrap_err();
    assert!(err.to_string().contains("cannot find prior"));

    pair.resync().await;
    pair.assert_converged().await;
    assert_eq!(pair.p2.read_file(&path("a")).await.unwrap(), b"one, edited");
    assert!(pair.run().await.unwrap().queues.is_empty());
}

#[tokio::test]
async fn test_cancel_during_transfers_interrupts_run() {
    let pair = Pair::synced(FILES).await;
    for name in ["a", "b"] {
        pair.p1.write_file(&path(name), "changed!", t(100)).await.unwrap();
    }

    let token = CancellationToken::new();
    let p2: Arc<dyn IBackend> = Arc::new(FlakyBackend::cancelling(pair.p2.clone(), token.clone()));
    let err = bisync(pair.p1.clone(), p2, &pair.opts, token).await.unwrap_err();

    assert!(matches!(err, BisyncError::Interrupted));
    let store = pair.store();
    assert!(store.err_path(Side::Path1).exists());
    assert!(!store.lock_path().exists());
}

#[tokio::test]
async fn test_failed_item_is_retried_next_run() {
    let pair = Pair::synced(FILES).await;
    pair.p1.write_file(&path("a"), "one v2", t(100)).await.unwrap();
    pair.p1.write_file(&path("b"), "two v2", t(100)).await.unwrap();

    let flaky: Arc<dyn IBackend> = Arc::new(FlakyBackend::failing(pair.p2.clone(), &["a"]));
    let summary = bisync(pair.p1.clone(), flaky, &pair.opts, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].path, path("a"));
    assert!(summary.failures[0]
        .error
        .as_deref()
        .unwrap()
        .contains("injected failure"));
    assert_eq!(summary.path2.copied, 1);
    assert_eq!(pair.p2.read_file(&path("b")).await.unwrap(), b"two v2");
    assert_eq!(pair.p2.read_file(&path("a")).await.unwrap(), b"one");

    let retry = pair.run().await.unwrap();
    assert_eq!(retry.queues.copy1to2, [path("a")].into());
    assert!(!retry.has_failures());
    pair.assert_converged().await;
}

#[tokio::test]
async fn test_failed_resync_item_is_picked_up_later() {
    let pair = Pair::new();
    pair.p1.write_file(&path("keep"), "k", t(0)).await.unwrap();
    pair.p2.write_file(&path("keep"), "k", t(0)).await.unwrap();
    pair.p1.write_file(&path("new"), "n", t(0)).await.unwrap();

    let mut opts = pair.opts.clone();
    opts.resync = true;
    let flaky: Arc<dyn IBackend> = Arc::new(FlakyBackend::failing(pair.p2.clone(), &["new"]));
    let summary = bisync(pair.p1.clone(), flaky, &opts, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.failures.len(), 1);
    assert!(!pair.p2.exists(&path("new")).await);

    let listing1 = pair.store().load_prior(Side::Path1).await.unwrap();
    assert!(!listing1.contains(&path("new")));

    let next = pair.run().await.unwrap();
    assert_eq!(next.queues.copy1to2, [path("new")].into());
    pair.assert_converged().await;
}
