//! End-to-end runs between two local directories

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use bisync_core::config::Options;
use bisync_core::ports::IBackend;
use bisync_sync::{bisync, LocalBackend, RunSummary};

struct LocalPair {
    dir1: TempDir,
    dir2: TempDir,
    opts: Options,
    workdir: TempDir,
}

impl LocalPair {
    fn new() -> Self {
        let workdir = TempDir::new().unwrap();
        Self {
            dir1: TempDir::new().unwrap(),
            dir2: TempDir::new().unwrap(),
            opts: Options::with_workdir(workdir.path()),
            workdir,
        }
    }

    async fn run_with(&self, opts: &Options) -> RunSummary {
        let p1: Arc<dyn IBackend> = Arc::new(LocalBackend::new(self.dir1.path()));
        let p2: Arc<dyn IBackend> = Arc::new(LocalBackend::new(self.dir2.path()));
        bisync(p1, p2, opts, CancellationToken::new())
            .await
            .expect("bisync failed")
    }

    async fn run(&self) -> RunSummary {
        self.run_with(&self.opts).await
    }

    async fn resync(&self) -> RunSummary {
        let mut opts = self.opts.clone();
        opts.resync = true;
        self.run_with(&opts).await
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let p = root.join(rel);
    std::fs::create_dir_all(p.parent().unwrap()).unwrap();
    std::fs::write(p, content).unwrap();
}

fn read(root: &Path, rel: &str) -> String {
    std::fs::read_to_string(root.join(rel)).unwrap()
}

#[tokio::test]
async fn test_local_resync_then_update() {
    let pair = LocalPair::new();
    write(pair.dir1.path(), "notes/one.md", "# one");
    write(pair.dir1.path(), "keep.txt", "keep");
    write(pair.dir2.path(), "photos/two.jpg", "jpeg bytes");

    pair.resync().await;
    assert_eq!(read(pair.dir2.path(), "notes/one.md"), "# one");
    assert_eq!(read(pair.dir1.path(), "photos/two.jpg"), "jpeg bytes");

    let meta1 = std::fs::metadata(pair.dir1.path().join("photos/two.jpg")).unwrap();
    let meta2 = std::fs::metadata(pair.dir2.path().join("photos/two.jpg")).unwrap();
    assert_eq!(meta1.modified().unwrap(), meta2.modified().unwrap());

    write(pair.dir1.path(), "notes/one.md", "# one, revised");
    let summary = pair.run().await;
    assert_eq!(summary.path2.copied, 1);
    assert_eq!(read(pair.dir2.path(), "notes/one.md"), "# one, revised");

    assert!(pair.run().await.queues.is_empty());
}

#[tokio::test]
async fn test_local_excluded_paths_are_ignored() {
    let mut pair = LocalPair::new();
    pair.opts.excludes = vec!["*.tmp".to_string(), "cache".to_string()];
    write(pair.dir1.path(), "doc.txt", "doc");
    write(pair.dir1.path(), "scratch.tmp", "junk");
    write(pair.dir1.path(), "cache/blob", "blob");

    pair.resync().await;

    assert!(pair.dir2.path().join("doc.txt").exists());
    assert!(!pair.dir2.path().join("scratch.tmp").exists());
    assert!(!pair.dir2.path().join("cache").exists());
}

#[tokio::test]
async fn test_local_remove_empty_dirs() {
    let mut pair = LocalPair::new();
    for name in ["a.txt", "b.txt", "c.txt", "dir/inner.txt"] {
        write(pair.dir1.path(), name, name);
    }
    pair.resync().await;
    assert!(pair.dir2.path().join("dir/inner.txt").exists());

    std::fs::remove_file(pair.dir1.path().join("dir/inner.txt")).unwrap();
    pair.opts.remove_empty_dirs = true;
    let summary = pair.run().await;

    assert_eq!(summary.path2.deleted, 1);
    assert!(!pair.dir2.path().join("dir").exists());
    assert!(!pair.dir1.path().join("dir").exists());
    assert_eq!(summary.path1.empty_dirs_removed, 1);
    assert_eq!(summary.path2.empty_dirs_removed, 1);
}

#[tokio::test]
async fn test_local_empty_dirs_are_created_when_requested() {
    let mut pair = LocalPair::new();
    write(pair.dir1.path(), "file.txt", "f");
    std::fs::create_dir_all(pair.dir1.path().join("empty/nested")).unwrap();
    pair.opts.create_empty_src_dirs = true;

    pair.resync().await;

    assert!(pair.dir2.path().join("empty/nested").is_dir());
    assert!(pair.run().await.queues.is_empty());
}

#[tokio::test]
async fn test_local_checksum_mode_detects_same_size_edits() {
    let mut pair = LocalPair::new();
    write(pair.dir1.path(), "a.txt", "aaaa");
    write(pair.dir1.path(), "b.txt", "bbbb");
    pair.opts.checksum = true;
    pair.resync().await;

    let listing = std::fs::read_dir(pair.workdir.path())
        .unwrap()
        .filter_map(Result::ok)
        .find(|e| e.file_name().to_string_lossy().ends_with(".path1.lst"))
        .map(|e| std::fs::read_to_string(e.path()).unwrap())
        .unwrap();
    assert!(listing.contains("sha256:"));

    write(pair.dir1.path(), "a.txt", "AAAA");
    let summary = pair.run().await;
    assert_eq!(read(pair.dir2.path(), "a.txt"), "AAAA");
    assert_eq!(summary.queues.copy1to2.len(), 1);
}
