//! Thumbnail pipeline.
//!
//! Drains the catalog's pending queue in batches. For each batch:
//!
//! 1. Up to `batch_size` pending comics are claimed (marked in progress).
//! 2. Each comic becomes a self-contained [`ThumbJob`] (id, archive path,
//!    output paths) and is dispatched to a bounded [rayon](https://docs.rs/rayon)
//!    pool. A job opens the archive, reads the cover (first image member in
//!    page order), writes the native rendition and one thumbnail, and returns
//!    a [`ThumbOutcome`]. Jobs share nothing but the read-only backend.
//! 3. Back on the calling thread, outcomes are written to the catalog one at a
//!    time: the thumbnail path and cover size, then metadata from the filename
//!    with the series resolved by find-or-create. Failures store the error
//!    marker instead.
//!
//! A bad archive, a broken image or a missing hook script fails that one
//! job only; the batch and the loop carry on.
//!
//! ## Output
//!
//! ```text
//! <data_dir>/cache/0/
//! ├── 7-native.jpg       # cover bytes, verbatim
//! ├── 7-300x400.jpg      # exact or fitted thumbnail
//! └── p7-300x400.jpg     # hook output, fitted covers only
//! ```

use crate::archive::{self, ArchiveError};
use crate::cache::{InvalidationGate, ThumbCache};
use crate::catalog::{Catalog, CatalogError, ComicMeta, PendingComic, UNKNOWN_SERIES_ID};
use crate::config::{AppConfig, effective_threads};
use crate::imaging::{
    BackendError, CoverTargets, ImageBackend, PostProcessHook, RustBackend, ThumbnailConfig,
    render_cover,
};
use crate::metadata;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("Could not start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Why a single job failed. Stored verbatim after the error marker.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("{0}")]
    Archive(#[from] ArchiveError),
    #[error("{0}")]
    Imaging(#[from] BackendError),
    #[error("cache directory: {0}")]
    Cache(#[from] std::io::Error),
}

/// Settings for the thumbnail pipeline.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub thumbnails: ThumbnailConfig,
    pub hook: Option<PostProcessHook>,
    pub workers: usize,
    pub batch_size: usize,
}

impl ProcessConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            thumbnails: config.thumbnail_config(),
            hook: config.hook(),
            workers: effective_threads(&config.processing),
            batch_size: config.processing.batch_size,
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            thumbnails: ThumbnailConfig::default(),
            hook: None,
            workers: 4,
            batch_size: 20,
        }
    }
}

/// One unit of work for the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbJob {
    pub id: i64,
    pub path: PathBuf,
    pub targets: CoverTargets,
}

/// What a job hands back to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum ThumbOutcome {
    Ok {
        pages: usize,
        /// Cover dimensions as stored in the archive.
        width: u32,
        height: u32,
        path: PathBuf,
    },
    Err {
        reason: String,
    },
}

/// Totals for one run of the pipeline.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    pub batches: usize,
    pub thumbnailed: usize,
    pub errored: usize,
}

impl ProcessReport {
    pub fn processed(&self) -> usize {
        self.thumbnailed + self.errored
    }
}

/// Thumbnail every pending comic with the built-in backend.
pub fn process_pending(
    catalog: &Catalog,
    cache: &ThumbCache,
    gate: &InvalidationGate,
    config: &ProcessConfig,
) -> Result<ProcessReport, ProcessError> {
    process_pending_with_backend(&RustBackend::new(), catalog, cache, gate, config)
}

/// Thumbnail every pending comic using a specific backend (allows testing with mock).
pub fn process_pending_with_backend(
    backend: &impl ImageBackend,
    catalog: &Catalog,
    cache: &ThumbCache,
    gate: &InvalidationGate,
    config: &ProcessConfig,
) -> Result<ProcessReport, ProcessError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers.max(1))
        .thread_name(|i| format!("thumb-{i}"))
        .build()?;

    let mut report = ProcessReport::default();
    loop {
        let batch = catalog.pending_batch(config.batch_size.max(1))?;
        if batch.is_empty() {
            break;
        }
        let ids: Vec<i64> = batch.iter().map(|c| c.id).collect();
        catalog.mark_in_progress(&ids)?;

        if let Err(e) = run_batch(backend, &pool, &batch, catalog, cache, config, &mut report) {
            // Unapplied claims go back to pending so the next tick retries them.
            match catalog.release_claims(&ids) {
                Ok(released) => warn!(released, error = %e, "thumbnail batch aborted"),
                Err(release) => warn!(error = %release, "could not release claimed comics"),
            }
            return Err(e.into());
        }

        report.batches += 1;
        gate.touch();
        info!(
            batch = report.batches,
            comics = batch.len(),
            thumbnailed = report.thumbnailed,
            errored = report.errored,
            "thumbnail batch done"
        );
    }
    Ok(report)
}

/// Plan, render and apply one claimed batch.
fn run_batch(
    backend: &impl ImageBackend,
    pool: &rayon::ThreadPool,
    batch: &[PendingComic],
    catalog: &Catalog,
    cache: &ThumbCache,
    config: &ProcessConfig,
    report: &mut ProcessReport,
) -> Result<(), CatalogError> {
    let jobs = plan_jobs(batch, cache, config, catalog, report)?;
    let outcomes = pool.install(|| run_jobs(backend, &jobs, config));
    for (job, outcome) in jobs.iter().zip(&outcomes) {
        apply_outcome(catalog, job, outcome, report)?;
    }
    Ok(())
}

/// Build jobs for a claimed batch. Comics whose cache directory cannot be
/// prepared are errored here and never reach the pool.
fn plan_jobs(
    batch: &[PendingComic],
    cache: &ThumbCache,
    config: &ProcessConfig,
    catalog: &Catalog,
    report: &mut ProcessReport,
) -> Result<Vec<ThumbJob>, CatalogError> {
    let mut jobs = Vec::with_capacity(batch.len());
    for comic in batch {
        let prepared = cache.purge(comic.id).and_then(|_| {
            cache.targets(
                comic.id,
                config.thumbnails.width,
                config.thumbnails.height,
            )
        });
        match prepared {
            Ok(targets) => jobs.push(ThumbJob {
                id: comic.id,
                path: PathBuf::from(&comic.path),
                targets,
            }),
            Err(e) => {
                let reason = JobError::from(e).to_string();
                warn!(id = comic.id, %reason, "cannot prepare cache");
                catalog.set_error(comic.id, &reason)?;
                report.errored += 1;
            }
        }
    }
    Ok(jobs)
}

/// Run jobs on the current rayon pool, preserving order.
pub fn run_jobs(
    backend: &impl ImageBackend,
    jobs: &[ThumbJob],
    config: &ProcessConfig,
) -> Vec<ThumbOutcome> {
    jobs.par_iter()
        .map(|job| match thumbnail_one(backend, job, config) {
            Ok(outcome) => outcome,
            Err(e) => ThumbOutcome::Err {
                reason: e.to_string(),
            },
        })
        .collect()
}

/// Cover thumbnail for one comic.
fn thumbnail_one(
    backend: &impl ImageBackend,
    job: &ThumbJob,
    config: &ProcessConfig,
) -> Result<ThumbOutcome, JobError> {
    debug!(id = job.id, path = %job.path.display(), "thumbnailing");
    let mut reader = archive::open(&job.path)?;
    let (pages, cover) = archive::read_cover(reader.as_mut())?;
    let rendered = render_cover(
        backend,
        config.hook.as_ref(),
        &cover,
        &job.targets,
        &config.thumbnails,
    )?;
    Ok(ThumbOutcome::Ok {
        pages,
        width: rendered.source.width,
        height: rendered.source.height,
        path: rendered.path,
    })
}

fn apply_outcome(
    catalog: &Catalog,
    job: &ThumbJob,
    outcome: &ThumbOutcome,
    report: &mut ProcessReport,
) -> Result<(), CatalogError> {
    match outcome {
        ThumbOutcome::Ok {
            pages,
            width,
            height,
            path,
        } => {
            // Metadata first: the thumbnail path is what marks the comic done.
            catalog.update_meta(job.id, &describe(catalog, &job.path, *pages)?)?;
            catalog.set_thumbnail(job.id, &path.to_string_lossy(), *width, *height)?;
            report.thumbnailed += 1;
        }
        ThumbOutcome::Err { reason } => {
            warn!(id = job.id, path = %job.path.display(), %reason, "thumbnail failed");
            catalog.set_error(job.id, reason)?;
            report.errored += 1;
        }
    }
    Ok(())
}

fn describe(catalog: &Catalog, path: &Path, pages: usize) -> Result<ComicMeta, CatalogError> {
    let description = metadata::describe(path);
    let series_id = match &description.series {
        Some(name) => catalog.find_or_create_series(name)?,
        None => UNKNOWN_SERIES_ID,
    };
    Ok(ComicMeta {
        page_count: u32::try_from(pages).unwrap_or(u32::MAX),
        series_id,
        issue: description.issue,
        volume: description.volume,
    })
}
