//! Listing persistence
//!
//! Owns the file layout of a session inside the work directory:
//!
//! ```text
//! {session}.path1.lst        prior listing (committed)
//! {session}.path1.lst-new    listing captured at the start of this run
//! {session}.path1.lst-old    prior listing of the previous run
//! {session}.path1.lst-err    prior listing of a failed run
//! {session}.lck              lock file
//! ```
//!
//! In dry-run mode every listing path gains a `-dry` infix
//! (`.lst-dry`, `.lst-dry-new`, ...) so a preview never touches the real
//! listings. Commits are atomic: write a temp file, then rename.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use bisync_core::domain::{Listing, SessionName, Side};

use crate::BisyncError;

/// Listing files of one session
#[derive(Debug, Clone)]
pub struct ListingStore {
    workdir: PathBuf,
    session: SessionName,
    dry_run: bool,
}

impl ListingStore {
    pub fn new(workdir: impl Into<PathBuf>, session: SessionName, dry_run: bool) -> Self {
        Self {
            workdir: workdir.into(),
            session,
            dry_run,
        }
    }

    pub fn session(&self) -> &SessionName {
        &self.session
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// The committed listing path that a real run uses
    pub fn real_listing_path(&self, side: Side) -> PathBuf {
        self.workdir
            .join(format!("{}.{}.lst", self.session, side.file_tag()))
    }

    /// The committed listing path for this run (shadowed in dry-run mode)
    pub fn listing_path(&self, side: Side) -> PathBuf {
        let real = self.real_listing_path(side);
        if self.dry_run {
            with_suffix(&real, "-dry")
        } else {
            real
        }
    }

    pub fn new_path(&self, side: Side) -> PathBuf {
        with_suffix(&self.listing_path(side), "-new")
    }

    pub fn old_path(&self, side: Side) -> PathBuf {
        with_suffix(&self.listing_path(side), "-old")
    }

    pub fn err_path(&self, side: Side) -> PathBuf {
        with_suffix(&self.listing_path(side), "-err")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.workdir.join(format!("{}.lck", self.session))
    }

    /// Creates the work directory if needed
    pub async fn ensure_workdir(&self) -> Result<(), BisyncError> {
        tokio::fs::create_dir_all(&self.workdir).await?;
        Ok(())
    }

    /// True if both prior listings exist
    pub async fn priors_exist(&self) -> Result<bool, BisyncError> {
        for side in [Side::Path1, Side::Path2] {
            if !tokio::fs::try_exists(self.listing_path(side)).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Loads and parses a listing file
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn load(&self, path: &Path) -> Result<Listing, BisyncError> {
        let text = tokio::fs::read_to_string(path).await?;
        let listing = Listing::parse(&text).map_err(|source| BisyncError::ListingLoad {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(entries = listing.len(), "listing loaded");
        Ok(listing)
    }

    /// Loads the committed listing of `side`
    pub async fn load_prior(&self, side: Side) -> Result<Listing, BisyncError> {
        self.load(&self.listing_path(side)).await
    }

    /// Writes a listing atomically (temp file + rename)
    #[instrument(skip(self, listing), fields(path = %path.display(), entries = listing.len()))]
    pub async fn save_atomic(&self, path: &Path, listing: &Listing) -> Result<(), BisyncError> {
        let tmp_path = with_suffix(path, ".tmp");
        let text = listing.render();

        debug!(?tmp_path, "writing listing to temporary file");
        tokio::fs::write(&tmp_path, text).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        debug!("listing written");
        Ok(())
    }

    /// Persists the freshly captured listing of `side`
    pub async fn save_new(&self, side: Side, listing: &Listing) -> Result<(), BisyncError> {
        self.save_atomic(&self.new_path(side), listing).await
    }

    /// Commits the next prior listing of `side`
    pub async fn commit(&self, side: Side, listing: &Listing) -> Result<(), BisyncError> {
        self.save_atomic(&self.listing_path(side), listing).await
    }

    /// Copies the current prior listing of each side to its `-old` backup
    pub async fn save_old(&self) -> Result<(), BisyncError> {
        for side in [Side::Path1, Side::Path2] {
            let src = self.listing_path(side);
            match tokio::fs::copy(&src, self.old_path(side)).await {
                Ok(_) => debug!(side = %side, "saved -old listing"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Renames both prior listings to `-err` so later runs refuse without resync
    pub async fn mark_failed(&self) -> Result<(), BisyncError> {
        for side in [Side::Path1, Side::Path2] {
            let src = self.listing_path(side);
            let dst = self.err_path(side);
            match tokio::fs::rename(&src, &dst).await {
                Ok(()) => warn!(
                    side = %side,
                    path = %dst.display(),
                    "Listing marked as failed"
                ),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Removes the `-new` intermediates of both sides
    pub async fn remove_new(&self) -> Result<(), BisyncError> {
        for side in [Side::Path1, Side::Path2] {
            match tokio::fs::remove_file(self.new_path(side)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Seeds the dry-run shadows from the real listings
    ///
    /// Stale shadows are removed first so a preview always starts from the
    /// real committed state.
    pub async fn prepare_dry_run(&self) -> Result<(), BisyncError> {
        if !self.dry_run {
            return Ok(());
        }
        for side in [Side::Path1, Side::Path2] {
            let shadow = self.listing_path(side);
            match tokio::fs::remove_file(&shadow).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            match tokio::fs::copy(self.real_listing_path(side), &shadow).await {
                Ok(_) => info!(side = %side, "Dry run: copied listing to shadow"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}
