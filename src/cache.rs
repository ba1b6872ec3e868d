//! On-disk thumbnail cache layout.
//!
//! Every comic owns a handful of JPEG renditions under the data directory,
//! keyed by catalog id and geometry. Files are sharded by `id / 512` so no
//! single directory ever holds more than a few thousand entries:
//!
//! ```text
//! <data_dir>/cache/
//! ├── 0/
//! │   ├── 7-native.jpg        ← cover bytes, verbatim
//! │   ├── 7-300x400.jpg       ← built-in thumbnail
//! │   └── p7-300x400.jpg      ← post-processed variant (hook output)
//! └── 1/
//!     └── 512-300x400.jpg
//! ```
//!
//! When both a `p{id}-…` and a plain `{id}-…` file exist, the processed one
//! wins. Nothing about this layout is recorded in the catalog besides the
//! path of the preferred thumbnail; it can always be recomputed from the id.
//!
//! ## Invalidation
//!
//! A request for a thumbnail that is not on disk means the catalog points at
//! a file that has been lost (cache wiped, resolution changed). The caller
//! asks for an invalidation sweep, which resets every such row back to
//! pending. Sweeps are throttled by [`InvalidationGate`]: during a large scan
//! hundreds of missing thumbnails would otherwise each trigger a full stat
//! pass over the catalog.

use crate::imaging::CoverTargets;
use crate::types::Geometry;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Maximum comics per cache partition directory.
pub const CACHE_PER_DIR: i64 = 512;

/// Cache partition for a comic id.
pub fn partition(id: i64) -> i64 {
    id / CACHE_PER_DIR
}

/// Resolver for the sharded cache tree rooted at `<data_dir>/cache`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbCache {
    root: PathBuf,
}

impl ThumbCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache tree under a data directory.
    pub fn under(data_dir: &Path) -> Self {
        Self::new(data_dir.join("cache"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partition_dir(&self, id: i64) -> PathBuf {
        self.root.join(partition(id).to_string())
    }

    /// Path of one rendition. `processed` selects the `p{id}-` variant.
    pub fn path_for(&self, id: i64, geometry: Geometry, processed: bool) -> PathBuf {
        let prefix = if processed { "p" } else { "" };
        self.partition_dir(id)
            .join(format!("{}{}-{}.jpg", prefix, id, geometry.suffix()))
    }

    /// Output paths for one thumbnail job; creates the partition directory.
    pub fn targets(&self, id: i64, width: u32, height: u32) -> io::Result<CoverTargets> {
        std::fs::create_dir_all(self.partition_dir(id))?;
        let thumb = Geometry::Box { width, height };
        Ok(CoverTargets {
            native: self.path_for(id, Geometry::Native, false),
            thumbnail: self.path_for(id, thumb, false),
            processed: self.path_for(id, thumb, true),
        })
    }

    /// The rendition to serve: processed variant first, then plain.
    pub fn resolve(&self, id: i64, geometry: Geometry) -> Option<PathBuf> {
        [true, false]
            .into_iter()
            .map(|processed| self.path_for(id, geometry, processed))
            .find(|p| p.is_file())
    }

    /// Delete every rendition of a comic. Returns the number of files removed.
    pub fn purge(&self, id: i64) -> io::Result<usize> {
        let dir = self.partition_dir(id);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let plain = format!("{}-", id);
        let processed = format!("p{}-", id);
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.ends_with(".jpg") {
                continue;
            }
            if name.starts_with(&plain) || name.starts_with(&processed) {
                std::fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(id, removed, "purged cached renditions");
        }
        Ok(removed)
    }
}

/// Cooldown guard for invalidation sweeps.
///
/// A sweep is refused while the previous sweep, or the last thumbnail batch,
/// is younger than the cooldown.
#[derive(Debug)]
pub struct InvalidationGate {
    cooldown: Duration,
    last: Mutex<Option<Instant>>,
}

impl InvalidationGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: Mutex::new(None),
        }
    }

    /// Claim a sweep at `now`. Returns false while cooling down.
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            Some(prev) if now.saturating_duration_since(prev) < self.cooldown => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Restart the cooldown, e.g. after a thumbnail batch wrote new files.
    pub fn touch_at(&self, now: Instant) {
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(now);
    }

    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }
}

/// Summary of a cache invalidation sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InvalidationStats {
    pub checked: usize,
    pub reset: usize,
}

impl fmt::Display for InvalidationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reset > 0 {
            write!(
                f,
                "{} of {} thumbnails missing, queued for regeneration",
                self.reset, self.checked
            )
        } else {
            write!(f, "{} thumbnails present", self.checked)
        }
    }
}
