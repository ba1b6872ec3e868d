//! Catalog store — persisted directories, comics, and series.
//!
//! A single SQLite file under the data directory. Three tables:
//!
//! | Table | Owned by | Notes |
//! |---|---|---|
//! | `directories` | reconciler | unique absolute `path`, tree via `parent_id` |
//! | `comics` | reconciler (existence), pipeline (image + metadata) | unique `(directory_id, filename)`, filename `COLLATE NOCASE` |
//! | `series` | pipeline | find-or-create by `normalized_key`; id 1 is the `Unknown` sentinel |
//!
//! ## Thumbnail state
//!
//! `comics.image_cache_ref` doubles as the per-comic state machine, see
//! [`ThumbState`]. The empty string is a transient in-progress marker; any
//! left behind by a crash are reset to pending when the catalog is opened.
//!
//! ## Concurrency
//!
//! One connection behind a mutex. Every public method takes the lock for a
//! single statement or one short transaction, so no transaction ever spans
//! more than one worker result.

mod listing;
mod schema;
mod store;

pub use listing::{
    CatalogStats, ComicListing, ListFilter, Neighbours, PageWindow, format_issue, human_size,
};
pub use schema::MIGRATIONS;

use crate::types::Token;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Id of the sentinel series every unparsed comic belongs to.
pub const UNKNOWN_SERIES_ID: i64 = 1;

/// Prefix of the error marker stored in `image_cache_ref`.
pub const ERROR_MARKER: &str = "error: ";

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Comic not found: {0}")]
    NotFound(i64),
    #[error("Catalog schema version {found} is newer than this build supports ({supported})")]
    SchemaTooNew { found: i64, supported: i64 },
}

/// Thumbnail state of one comic, decoded from `image_cache_ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbState {
    /// `NULL` — waiting for the pipeline.
    Pending,
    /// `''` — claimed by a running batch.
    InProgress,
    /// `error: <reason>` — terminal until reset by an operator.
    Errored(String),
    /// Path of the cached thumbnail.
    Ready(String),
}

impl ThumbState {
    pub fn from_ref(image_ref: Option<&str>) -> Self {
        match image_ref {
            None => ThumbState::Pending,
            Some("") => ThumbState::InProgress,
            Some(s) => match s.strip_prefix(ERROR_MARKER) {
                Some(reason) => ThumbState::Errored(reason.to_string()),
                None => ThumbState::Ready(s.to_string()),
            },
        }
    }
}

/// A directory row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRow {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub path: String,
}

/// A comic as the reconciler sees it: identity only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComicEntry {
    pub id: i64,
    pub directory_id: i64,
    pub filename: String,
}

/// A comic waiting for a thumbnail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingComic {
    pub id: i64,
    pub path: String,
}

/// Metadata the pipeline writes back after a successful thumbnail.
#[derive(Debug, Clone, PartialEq)]
pub struct ComicMeta {
    pub page_count: u32,
    pub series_id: i64,
    pub issue: Option<Token>,
    pub volume: Option<Token>,
}

// Issues and volumes keep SQLite's dynamic typing: integers stay INTEGER,
// everything else is TEXT.
impl ToSql for Token {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Token::Number(n) => Ok(ToSqlOutput::from(*n as i64)),
            Token::Text(s) => Ok(ToSqlOutput::from(s.as_str())),
        }
    }
}

impl FromSql for Token {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(n) => u32::try_from(n)
                .map(Token::Number)
                .map_err(|_| FromSqlError::OutOfRange(n)),
            ValueRef::Text(_) => value.as_str().map(|s| Token::Text(s.to_string())),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// SQLite-backed catalog.
pub struct Catalog {
    conn: Mutex<Connection>,
}

impl Catalog {
    /// Open (creating if needed) the catalog file and bring its schema up to date.
    ///
    /// Any in-progress markers left by a previous crash are reset to pending.
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        let catalog = Self::from_connection(conn)?;
        info!(path = %path.display(), "catalog opened");
        Ok(catalog)
    }

    /// In-memory catalog (tests and dry runs).
    pub fn in_memory() -> Result<Self, CatalogError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, CatalogError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        schema::migrate(&mut conn)?;

        let catalog = Self {
            conn: Mutex::new(conn),
        };
        let reset = catalog.reset_in_progress()?;
        if reset > 0 {
            warn!(reset, "reset thumbnails left in progress by an earlier run");
        }
        Ok(catalog)
    }

    /// Lock the connection. A poisoned lock is recovered: every write is a
    /// single statement or transaction, so the connection is never left
    /// half-updated.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumb_state_decoding() {
        assert_eq!(ThumbState::from_ref(None), ThumbState::Pending);
        assert_eq!(ThumbState::from_ref(Some("")), ThumbState::InProgress);
        assert_eq!(
            ThumbState::from_ref(Some("error: no images")),
            ThumbState::Errored("no images".into())
        );
        assert_eq!(
            ThumbState::from_ref(Some("/data/cache/0/7-300x400.jpg")),
            ThumbState::Ready("/data/cache/0/7-300x400.jpg".into())
        );
    }

    #[test]
    fn open_file_catalog_twice_keeps_schema() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("catalog.db");

        let first = Catalog::open(&path).unwrap();
        let dir = first.ensure_directory("/comics", None).unwrap();
        drop(first);

        let second = Catalog::open(&path).unwrap();
        assert_eq!(second.ensure_directory("/comics", None).unwrap(), dir);
        assert_eq!(second.schema_version().unwrap(), MIGRATIONS.len() as i64);
    }

    #[test]
    fn reopen_resets_in_progress_markers() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("catalog.db");

        let catalog = Catalog::open(&path).unwrap();
        let dir = catalog.ensure_directory("/comics", None).unwrap();
        let id = catalog.insert_comic(dir, "a.cbz", 10).unwrap().unwrap();
        catalog.mark_in_progress(&[id]).unwrap();
        assert_eq!(catalog.thumb_state(id).unwrap(), ThumbState::InProgress);
        drop(catalog);

        let catalog = Catalog::open(&path).unwrap();
        assert_eq!(catalog.thumb_state(id).unwrap(), ThumbState::Pending);
    }

    #[test]
    fn token_round_trips_through_sqlite_types() {
        let catalog = Catalog::in_memory().unwrap();
        let conn = catalog.conn();
        let n: Token = conn
            .query_row("SELECT ?1", [Token::Number(23)], |r| r.get(0))
            .unwrap();
        let t: Token = conn
            .query_row("SELECT ?1", [Token::Text("Annual".into())], |r| r.get(0))
            .unwrap();
        assert_eq!(n, Token::Number(23));
        assert_eq!(t, Token::Text("Annual".into()));
    }
}
