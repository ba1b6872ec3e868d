//! Library reconciliation.
//!
//! Brings the catalog in line with the comic tree on disk. One cycle runs in
//! two phases, always in this order:
//!
//! 1. **Stale sweep.** Every known directory and comic is checked against
//!    the filesystem. A comic whose file is gone is deleted together with its
//!    cached renditions; a directory that is gone (or is no longer a
//!    directory) is deleted with all of its comics and their renditions. What
//!    survives is loaded into a [`PathArena`].
//! 2. **Tree walk.** A post-order walk of the library root, following
//!    symlinked subtrees. Directories not in the arena are inserted; `.cbz`
//!    and `.cbr` files not in the arena are inserted with their size only.
//!    Metadata is left for the thumbnail pipeline.
//!
//! Existence is all the reconciler owns. It never touches thumbnail state or
//! metadata, so it can run between pipeline batches without coordination.
//!
//! ## Filename collisions
//!
//! Filenames are compared case-insensitively, in the arena and in the
//! catalog. A file that differs from a known comic only by case is ignored.
//!
//! ## Failures
//!
//! An unreadable entry during the walk is logged and skipped. A missing
//! library root aborts the cycle *before* the sweep, so an unmounted volume
//! never empties the catalog.

use crate::cache::ThumbCache;
use crate::catalog::{Catalog, CatalogError};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Extensions recognised as comic archives (lower-case).
pub const COMIC_EXTENSIONS: &[&str] = &["cbz", "cbr"];

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("Library root not found: {0}")]
    RootMissing(PathBuf),
}

/// What one reconcile cycle changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub directories_added: usize,
    pub directories_removed: usize,
    pub comics_added: usize,
    pub comics_removed: usize,
    pub cache_files_removed: usize,
    /// Entries the walk could not read.
    pub skipped: usize,
}

impl ReconcileReport {
    pub fn is_unchanged(&self) -> bool {
        self.directories_added == 0
            && self.directories_removed == 0
            && self.comics_added == 0
            && self.comics_removed == 0
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "+{} comics, -{} comics, +{} directories, -{} directories",
            self.comics_added, self.comics_removed, self.directories_added, self.directories_removed
        )?;
        if self.skipped > 0 {
            write!(f, ", {} unreadable", self.skipped)?;
        }
        Ok(())
    }
}

/// Live catalog entries for one cycle.
///
/// Built by the sweep from rows that survived it and extended by the walk.
/// Never outlives the cycle that built it.
#[derive(Debug, Default)]
pub struct PathArena {
    directories: HashMap<String, i64>,
    filenames: HashMap<i64, HashSet<String>>,
}

impl PathArena {
    pub fn directory(&self, path: &str) -> Option<i64> {
        self.directories.get(path).copied()
    }

    pub fn contains(&self, directory_id: i64, filename: &str) -> bool {
        self.filenames
            .get(&directory_id)
            .is_some_and(|names| names.contains(&filename.to_lowercase()))
    }

    fn add_directory(&mut self, path: String, id: i64) {
        self.directories.insert(path, id);
    }

    fn add_file(&mut self, directory_id: i64, filename: &str) {
        self.filenames
            .entry(directory_id)
            .or_default()
            .insert(filename.to_lowercase());
    }

    pub fn directory_count(&self) -> usize {
        self.directories.len()
    }

    pub fn comic_count(&self) -> usize {
        self.filenames.values().map(HashSet::len).sum()
    }
}

pub fn is_comic_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| COMIC_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Run one reconcile cycle against `root`.
pub fn reconcile(
    catalog: &Catalog,
    cache: &ThumbCache,
    root: &Path,
) -> Result<ReconcileReport, ScanError> {
    let root = root
        .canonicalize()
        .ok()
        .filter(|r| r.is_dir())
        .ok_or_else(|| ScanError::RootMissing(root.to_path_buf()))?;

    let mut report = ReconcileReport::default();
    let mut arena = sweep_stale(catalog, cache, &mut report)?;
    walk_tree(catalog, &root, &mut arena, &mut report)?;

    info!(
        root = %root.display(),
        directories = arena.directory_count(),
        comics = arena.comic_count(),
        %report,
        "reconciled library"
    );
    Ok(report)
}

/// Phase 1: drop catalog rows whose backing path is gone.
fn sweep_stale(
    catalog: &Catalog,
    cache: &ThumbCache,
    report: &mut ReconcileReport,
) -> Result<PathArena, ScanError> {
    let mut by_directory: HashMap<i64, Vec<(i64, String)>> = HashMap::new();
    for comic in catalog.comics()? {
        by_directory
            .entry(comic.directory_id)
            .or_default()
            .push((comic.id, comic.filename));
    }

    let mut arena = PathArena::default();
    for dir in catalog.directories()? {
        let comics = by_directory.remove(&dir.id).unwrap_or_default();
        let dir_path = Path::new(&dir.path);

        if !dir_path.is_dir() {
            for (id, _) in &comics {
                report.cache_files_removed += purge(cache, *id);
            }
            catalog.delete_directory(dir.id)?;
            report.directories_removed += 1;
            report.comics_removed += comics.len();
            info!(path = %dir.path, comics = comics.len(), "directory gone");
            continue;
        }

        for (id, filename) in comics {
            if dir_path.join(&filename).is_file() {
                arena.add_file(dir.id, &filename);
            } else {
                report.cache_files_removed += purge(cache, id);
                catalog.delete_comic(id)?;
                report.comics_removed += 1;
                info!(id, path = %dir_path.join(&filename).display(), "comic gone");
            }
        }
        arena.add_directory(dir.path, dir.id);
    }
    Ok(arena)
}

fn purge(cache: &ThumbCache, id: i64) -> usize {
    cache.purge(id).unwrap_or_else(|e| {
        warn!(id, error = %e, "could not purge cached renditions");
        0
    })
}

/// Phase 2: insert what the catalog has not seen yet.
fn walk_tree(
    catalog: &Catalog,
    root: &Path,
    arena: &mut PathArena,
    report: &mut ReconcileReport,
) -> Result<(), ScanError> {
    let mut inserted: Vec<(i64, PathBuf)> = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .contents_first(true)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                report.skipped += 1;
                continue;
            }
        };
        let path = entry.path();

        if entry.file_type().is_dir() {
            directory_id(catalog, path, arena, &mut inserted, report)?;
            continue;
        }
        if !entry.file_type().is_file() || !is_comic_file(path) {
            continue;
        }

        let (Some(parent), Some(filename)) = (path.parent(), entry.file_name().to_str()) else {
            warn!(path = %path.display(), "skipping non UTF-8 filename");
            report.skipped += 1;
            continue;
        };
        let Some(dir_id) = directory_id(catalog, parent, arena, &mut inserted, report)? else {
            continue;
        };
        if arena.contains(dir_id, filename) {
            continue;
        }

        let size = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot stat comic");
                report.skipped += 1;
                continue;
            }
        };
        match catalog.insert_comic(dir_id, filename, size)? {
            Some(id) => {
                debug!(id, path = %path.display(), size, "new comic");
                report.comics_added += 1;
            }
            None => debug!(path = %path.display(), "name collides with a known comic"),
        }
        arena.add_file(dir_id, filename);
    }

    // Contents come before their directory, so parents are only known now.
    for (id, path) in inserted {
        if path == root {
            continue;
        }
        let parent = path
            .parent()
            .and_then(|p| p.to_str())
            .and_then(|p| arena.directory(p));
        catalog.set_directory_parent(id, parent)?;
    }
    Ok(())
}

/// Catalog id of a directory, inserting it on first sight this cycle.
fn directory_id(
    catalog: &Catalog,
    path: &Path,
    arena: &mut PathArena,
    inserted: &mut Vec<(i64, PathBuf)>,
    report: &mut ReconcileReport,
) -> Result<Option<i64>, ScanError> {
    let Some(key) = path.to_str() else {
        warn!(path = %path.display(), "skipping non UTF-8 directory");
        report.skipped += 1;
        return Ok(None);
    };
    if let Some(id) = arena.directory(key) {
        return Ok(Some(id));
    }

    let id = catalog.ensure_directory(key, None)?;
    debug!(id, path = key, "new directory");
    arena.add_directory(key.to_string(), id);
    inserted.push((id, path.to_path_buf()));
    report.directories_added += 1;
    Ok(Some(id))
}
