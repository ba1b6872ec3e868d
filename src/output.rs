//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Every comic is shown by what it is (series, volume, issue) before where
//! it lives. Paths, sizes and thumbnail state follow as indented context
//! lines, so a listing reads as an inventory while still pointing back to
//! files on disk.
//!
//! # Output Format
//!
//! ## Listing
//!
//! ```text
//! Page 1 of 3
//!     12 Saga v1 #3
//!       Source: /comics/Image/Saga v01 003.cbz
//!       24 pages, 48.20 MiB, added 2024-05-01T10:00:00Z
//!       Thumbnail: /data/cache/0/12-300x400.jpg
//! ```
//!
//! ## Cycle
//!
//! ```text
//! Library
//!     +3 comics, -1 comics, +1 directories, -0 directories
//!     1 cached rendition removed
//! Thumbnails
//!     3 thumbnailed, 0 errored in 1 batch
//! ```
//!
//! # Architecture
//!
//! Each report has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::cache::InvalidationStats;
use crate::catalog::{CatalogStats, ComicListing};
use crate::library::CycleReport;
use crate::process::ProcessReport;
use crate::scan::ReconcileReport;
use crate::scheduler::ScanStatus;
use std::path::{Path, PathBuf};

// ============================================================================
// Shared helpers
// ============================================================================

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `1 batch`, `2 batches`.
fn plural(n: usize, one: &str, many: &str) -> String {
    format!("{} {}", n, if n == 1 { one } else { many })
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{}", line);
    }
}

// ============================================================================
// Listings
// ============================================================================

/// Header line for one comic: right-aligned id, then title.
fn comic_header(comic: &ComicListing) -> String {
    let title = if comic.title.is_empty() {
        Path::new(&comic.path)
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| comic.path.clone())
    } else {
        comic.title.clone()
    };
    format!("{:>6} {}", comic.id, title)
}

/// Display lines for one comic.
pub fn format_comic(comic: &ComicListing) -> Vec<String> {
    let mut lines = vec![comic_header(comic)];
    lines.push(format!("{}  Source: {}", indent(1), comic.path));

    let mut facts = Vec::new();
    if let Some(pages) = comic.pages {
        facts.push(plural(pages as usize, "page", "pages"));
    }
    facts.push(comic.size.clone());
    facts.push(format!("added {}", comic.added_at));
    lines.push(format!("{}  {}", indent(1), facts.join(", ")));

    let state = match (&comic.thumbnail, &comic.error) {
        (Some(path), _) => format!("Thumbnail: {}", path),
        (None, Some(reason)) => format!("Error: {}", reason),
        (None, None) => "Thumbnail: pending".to_string(),
    };
    lines.push(format!("{}  {}", indent(1), state));
    lines
}

/// One page of a listing.
pub fn format_listing(comics: &[ComicListing], page: u32, pages: u64) -> Vec<String> {
    if comics.is_empty() {
        return vec!["No comics".to_string()];
    }
    let mut lines = vec![format!("Page {} of {}", page, pages.max(1))];
    for comic in comics {
        lines.extend(format_comic(comic));
    }
    lines
}

pub fn print_listing(comics: &[ComicListing], page: u32, pages: u64) {
    print_lines(format_listing(comics, page, pages));
}

// ============================================================================
// Background work
// ============================================================================

pub fn format_reconcile_report(report: &ReconcileReport) -> Vec<String> {
    let mut lines = vec!["Library".to_string(), format!("{}{}", indent(1), report)];
    if report.cache_files_removed > 0 {
        lines.push(format!(
            "{}{} removed",
            indent(1),
            plural(
                report.cache_files_removed,
                "cached rendition",
                "cached renditions"
            )
        ));
    }
    lines
}

pub fn format_process_report(report: &ProcessReport) -> Vec<String> {
    let body = if report.processed() == 0 {
        "nothing pending".to_string()
    } else {
        format!(
            "{} thumbnailed, {} errored in {}",
            report.thumbnailed,
            report.errored,
            plural(report.batches, "batch", "batches")
        )
    };
    vec!["Thumbnails".to_string(), format!("{}{}", indent(1), body)]
}

pub fn format_cycle_report(report: &CycleReport) -> Vec<String> {
    let mut lines = format_reconcile_report(&report.reconcile);
    lines.extend(format_process_report(&report.thumbnails));
    if report.books_removed > 0 {
        lines.push("Reader".to_string());
        lines.push(format!(
            "{}{} removed",
            indent(1),
            plural(report.books_removed, "old book", "old books")
        ));
    }
    lines
}

pub fn print_cycle_report(report: &CycleReport) {
    print_lines(format_cycle_report(report));
}

pub fn format_invalidation(stats: Option<&InvalidationStats>) -> Vec<String> {
    match stats {
        Some(stats) => vec![stats.to_string()],
        None => vec!["Invalidation skipped, a sweep ran recently".to_string()],
    }
}

// ============================================================================
// Status
// ============================================================================

pub fn format_status(status: &ScanStatus, stats: &CatalogStats) -> Vec<String> {
    let state = if status.is_running() {
        format!("scanning for {}s", status.elapsed_secs)
    } else {
        "idle".to_string()
    };
    vec![
        format!("Status: {}", state),
        format!(
            "{}{} of {} comics processed ({:.0}%)",
            indent(1),
            status.total.saturating_sub(status.pending),
            status.total,
            status.fraction * 100.0
        ),
        format!("{}{} pending, {} errored", indent(1), stats.pending, stats.errored),
        format!("{}{} added recently", indent(1), stats.recent),
        format!("{}Library size: {}", indent(1), stats.total_size()),
    ]
}

pub fn print_status(status: &ScanStatus, stats: &CatalogStats) {
    print_lines(format_status(status, stats));
}

// ============================================================================
// Reader
// ============================================================================

pub fn format_book(pages: &[PathBuf]) -> Vec<String> {
    let mut lines = vec![plural(pages.len(), "page", "pages")];
    lines.extend(
        pages
            .iter()
            .map(|p| format!("{}{}", indent(1), p.display())),
    );
    lines
}

pub fn print_book(pages: &[PathBuf]) {
    print_lines(format_book(pages));
}
