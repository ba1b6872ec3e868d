//! # panelvault
//!
//! A comic library indexer. Point it at a tree of `.cbz`/`.cbr` archives and it
//! keeps a SQLite catalog in step with the tree, renders one cover thumbnail
//! per comic, and guesses series, volume and issue from filenames.
//!
//! # Architecture: Reconcile, Then Thumbnail
//!
//! Background work runs as one cycle, over and over:
//!
//! ```text
//! 1. Reconcile   library tree  →  catalog rows      (existence only)
//! 2. Thumbnail   pending rows  →  cache/ + metadata (worker pool)
//! 3. Tidy        Books/<user>/ →  newest N kept
//! ```
//!
//! The reconciler owns whether a directory or comic *exists*; the thumbnail
//! pipeline owns everything it learns by opening the archive. Neither writes
//! the other's columns, so the two never need to coordinate beyond running
//! one after the other.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`archive`] | Format sniffing and a uniform reader over zip and rar containers |
//! | [`naming`] | Ordered filename rules: series, volume, issue from a basename |
//! | [`metadata`] | Applies [`naming`] to a comic path; series-key normalization |
//! | [`imaging`] | Resize policy, rotation, JPEG output, external pad hook |
//! | [`cache`] | Sharded on-disk layout of cover renditions, invalidation cooldown |
//! | [`catalog`] | SQLite store: schema migrations, thumbnail state machine, listings |
//! | [`scan`] | Reconciler: stale sweep then tree walk |
//! | [`process`] | Thumbnail pipeline: claimed batches on a rayon pool |
//! | [`library`] | Read/trigger facade used by front ends and the CLI |
//! | [`scheduler`] | Non-reentrant background loop with coalesced rescan requests |
//! | [`config`] | `panelvault.toml` loading, defaults and validation |
//! | [`output`] | CLI output formatting |
//! | [`types`] | Shared value types |
//!
//! # Design Decisions
//!
//! ## One Catalog Writer
//!
//! Workers never touch the catalog. Each one takes a self-contained job (id,
//! archive path, output paths) and hands back a self-contained outcome; the
//! orchestrating thread applies outcomes one short statement at a time. The
//! SQLite connection lives behind a mutex and no transaction spans more than
//! one comic.
//!
//! ## Crash-Safe Thumbnail State
//!
//! `image_cache_ref` is the whole state machine: `NULL` pending, `''` claimed,
//! `error: …` failed, anything else a cache path. Claims left behind by a
//! crash are released when the catalog is next opened.
//!
//! ## Filenames Are the Only Metadata
//!
//! No ComicInfo.xml, no network lookups. The parser is deliberately lossy:
//! an unparseable name costs a comic its series grouping, nothing more.

pub mod archive;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod imaging;
pub mod library;
pub mod metadata;
pub mod naming;
pub mod output;
pub mod process;
pub mod scan;
pub mod scheduler;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
