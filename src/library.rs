//! The library: catalog, cache and configuration behind one handle.
//!
//! This is what a front end talks to. Reads go straight to the catalog or
//! the cache directory; the only writes it can cause are the self-healing
//! invalidation sweep, per-user book extraction, and an operator reset of
//! errored comics. Reconciliation and thumbnailing run through
//! [`Library::run_cycle`], normally driven by the
//! [`Scheduler`](crate::scheduler::Scheduler).
//!
//! ## Reading books
//!
//! [`Library::extract_book`] materializes a comic's pages into
//! `<temp_dir>/Books/<user>/<id>/` as `{id}-0001.jpg`, `{id}-0002.png`, …
//! The first call extracts into a scratch directory and renames it into
//! place; later calls list what is already there. After every cycle each
//! user keeps only the `reader.keep_books` most recently extracted books.

use crate::archive::{self, ArchiveError};
use crate::cache::{InvalidationGate, InvalidationStats, ThumbCache};
use crate::catalog::{
    Catalog, CatalogError, CatalogStats, ComicListing, ListFilter, Neighbours, PageWindow,
};
use crate::config::AppConfig;
use crate::process::{self, ProcessConfig, ProcessError, ProcessReport};
use crate::scan::{self, ReconcileReport, ScanError};
use crate::types::Geometry;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("Scan failed: {0}")]
    Scan(#[from] ScanError),
    #[error("Thumbnailing failed: {0}")]
    Process(#[from] ProcessError),
    #[error("Invalid user name: {0:?}")]
    InvalidUser(String),
}

/// Everything one cycle did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub reconcile: ReconcileReport,
    pub thumbnails: ProcessReport,
    pub books_removed: usize,
}

pub struct Library {
    config: AppConfig,
    catalog: Catalog,
    cache: ThumbCache,
    gate: InvalidationGate,
    process: ProcessConfig,
}

impl Library {
    /// Open the library described by `config`, creating the data directory
    /// and catalog as needed.
    pub fn open(config: AppConfig) -> Result<Self, LibraryError> {
        fs::create_dir_all(&config.data_dir)?;
        let catalog = Catalog::open(&config.catalog_path())?;
        Ok(Self::with_catalog(config, catalog))
    }

    /// Library over an already opened catalog.
    pub fn with_catalog(config: AppConfig, catalog: Catalog) -> Self {
        Self {
            cache: config.cache(),
            gate: InvalidationGate::new(config.thumbnails.invalidation_cooldown()),
            process: ProcessConfig::from_app_config(&config),
            catalog,
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn cache(&self) -> &ThumbCache {
        &self.cache
    }

    // =========================================================================
    // Background work
    // =========================================================================

    /// Reconcile, thumbnail everything pending, then tidy book workspaces.
    pub fn run_cycle(&self) -> Result<CycleReport, LibraryError> {
        self.run_cycle_at(&self.config.library_root())
    }

    /// [`run_cycle`](Self::run_cycle) against an explicit library root.
    pub fn run_cycle_at(&self, root: &Path) -> Result<CycleReport, LibraryError> {
        let reconcile = self.reconcile(root)?;
        let thumbnails = self.process_pending()?;
        let books_removed = self.clean_tempspace()?;
        Ok(CycleReport {
            reconcile,
            thumbnails,
            books_removed,
        })
    }

    pub fn reconcile(&self, root: &Path) -> Result<ReconcileReport, LibraryError> {
        Ok(scan::reconcile(&self.catalog, &self.cache, root)?)
    }

    pub fn process_pending(&self) -> Result<ProcessReport, LibraryError> {
        Ok(process::process_pending(
            &self.catalog,
            &self.cache,
            &self.gate,
            &self.process,
        )?)
    }

    /// Return every errored comic to the pending queue.
    pub fn reset_errors(&self) -> Result<usize, LibraryError> {
        let reset = self.catalog.reset_errored()?;
        info!(reset, "errored comics queued for another attempt");
        Ok(reset)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get_comic_path(&self, id: i64) -> Result<PathBuf, LibraryError> {
        Ok(PathBuf::from(self.catalog.get_comic_path(id)?))
    }

    /// One page (1-based) of comics, `listing.per_page` per page.
    pub fn list_comics(
        &self,
        filter: ListFilter,
        series: Option<&str>,
        page: u32,
    ) -> Result<Vec<ComicListing>, LibraryError> {
        let window = PageWindow::new(page, self.config.listing.per_page);
        Ok(self.catalog.list_comics(filter, series, window)?)
    }

    /// Number of listing pages for `filter`.
    pub fn page_count(&self, filter: ListFilter) -> Result<u64, LibraryError> {
        let total = self.catalog.count_comics(filter)?;
        Ok(total.div_ceil(self.config.listing.per_page as u64))
    }

    /// The "recent" filter with the configured window.
    pub fn recent(&self) -> ListFilter {
        ListFilter::Recent {
            days: self.config.listing.recent_days,
        }
    }

    pub fn neighbours(&self, id: i64, filter: ListFilter) -> Result<Neighbours, LibraryError> {
        Ok(self.catalog.neighbours(id, filter)?)
    }

    pub fn stats(&self) -> Result<CatalogStats, LibraryError> {
        Ok(self.catalog.catalog_stats(self.config.listing.recent_days)?)
    }

    // =========================================================================
    // Thumbnails
    // =========================================================================

    /// Cached thumbnail for a comic, processed variant first. No side effects.
    pub fn thumbnail_path(&self, id: i64, width: u32, height: u32) -> Option<PathBuf> {
        self.cache.resolve(id, Geometry::Box { width, height })
    }

    /// Cached thumbnail for a comic.
    ///
    /// A miss starts an invalidation sweep in the background (subject to the
    /// cooldown) so lost thumbnails are regenerated on the next cycle.
    pub fn get_thumbnail_path(self: &Arc<Self>, id: i64, width: u32, height: u32) -> Option<PathBuf> {
        let found = self.thumbnail_path(id, width, height);
        if found.is_none() {
            debug!(id, width, height, "thumbnail missing");
            self.spawn_invalidation();
        }
        found
    }

    /// Start a background sweep unless one ran within the cooldown.
    pub fn spawn_invalidation(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.gate.try_acquire() {
            return None;
        }
        let library = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("invalidate".into())
            .spawn(move || {
                if let Err(e) = library.sweep_missing() {
                    warn!(error = %e, "invalidation sweep failed");
                }
            });
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "could not start invalidation sweep");
                None
            }
        }
    }

    /// Synchronous sweep, subject to the cooldown. `None` when refused.
    pub fn invalidate_missing(&self) -> Result<Option<InvalidationStats>, LibraryError> {
        if !self.gate.try_acquire() {
            debug!("invalidation sweep refused, cooling down");
            return Ok(None);
        }
        self.sweep_missing().map(Some)
    }

    /// Send every thumbnailed comic whose file is gone back to pending.
    fn sweep_missing(&self) -> Result<InvalidationStats, LibraryError> {
        let geometry = self.config.geometry();
        let ids = self.catalog.thumbnailed_ids()?;
        let missing: Vec<i64> = ids
            .iter()
            .copied()
            .filter(|id| self.cache.resolve(*id, geometry).is_none())
            .collect();
        let reset = if missing.is_empty() {
            0
        } else {
            self.catalog.reset_thumbnails(&missing)?
        };
        let stats = InvalidationStats {
            checked: ids.len(),
            reset,
        };
        info!(%stats, "invalidation sweep");
        Ok(stats)
    }

    // =========================================================================
    // Book extraction
    // =========================================================================

    fn user_dir(&self, user: &str) -> Result<PathBuf, LibraryError> {
        let valid = !user.is_empty()
            && user != "."
            && user != ".."
            && !user.contains(['/', '\\', '\0']);
        if !valid {
            return Err(LibraryError::InvalidUser(user.to_string()));
        }
        Ok(self.config.books_dir().join(user))
    }

    /// Page files of a comic in `user`'s workspace, extracting on first use.
    pub fn extract_book(&self, id: i64, user: &str) -> Result<Vec<PathBuf>, LibraryError> {
        let dest = self.user_dir(user)?.join(id.to_string());
        if dest.is_dir() {
            return Ok(list_pages(&dest)?);
        }

        let source = self.get_comic_path(id)?;
        let parent = dest.parent().unwrap_or(&dest);
        fs::create_dir_all(parent)?;
        let scratch = parent.join(format!(".{}.partial", id));
        if scratch.exists() {
            fs::remove_dir_all(&scratch)?;
        }

        let mut reader = archive::open(&source)?;
        if let Err(e) = archive::extract_all(reader.as_mut(), &scratch, &format!("{}-", id)) {
            let _ = fs::remove_dir_all(&scratch);
            return Err(e.into());
        }

        if let Err(e) = fs::rename(&scratch, &dest) {
            let _ = fs::remove_dir_all(&scratch);
            // Another request finished the same book first.
            if !dest.is_dir() {
                return Err(e.into());
            }
        } else {
            info!(id, user, path = %dest.display(), "extracted book");
        }
        Ok(list_pages(&dest)?)
    }

    /// Trim every user's workspace to the `keep_books` newest books.
    pub fn clean_tempspace(&self) -> Result<usize, LibraryError> {
        let books = self.config.books_dir();
        let users = match fs::read_dir(&books) {
            Ok(users) => users,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for user in users {
            let user = user?;
            if user.file_type()?.is_dir() {
                removed += trim_workspace(&user.path(), self.config.reader.keep_books)?;
            }
        }
        if removed > 0 {
            info!(removed, "removed old extracted books");
        }
        Ok(removed)
    }
}

fn list_pages(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut pages = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            pages.push(entry.path());
        }
    }
    pages.sort();
    Ok(pages)
}

/// Remove all but the `keep` newest book directories. Scratch directories
/// are left to the extraction that owns them.
fn trim_workspace(user_dir: &Path, keep: usize) -> io::Result<usize> {
    let mut books: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(user_dir)? {
        let entry = entry?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || !entry.file_type()?.is_dir() {
            continue;
        }
        let meta = entry.metadata()?;
        let made = meta.created().or_else(|_| meta.modified())?;
        books.push((made, entry.path()));
    }

    books.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    let mut removed = 0;
    for (_, path) in books.into_iter().skip(keep) {
        fs::remove_dir_all(&path)?;
        debug!(path = %path.display(), "removed book");
        removed += 1;
    }
    Ok(removed)
}
