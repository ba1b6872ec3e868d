//! Catalog schema and forward-only migrations.
//!
//! The schema version lives in SQLite's `user_version` pragma. Opening a
//! catalog applies every migration above the stored version, in order, each
//! in its own transaction. There is no downgrade path: a catalog written by
//! a newer build is refused.

use super::{Catalog, CatalogError};
use rusqlite::Connection;
use tracing::info;

/// Ordered migrations; entry `i` upgrades the schema to version `i + 1`.
pub const MIGRATIONS: &[&str] = &[
    // 1: base tables and the Unknown series sentinel
    r#"
    CREATE TABLE directories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER REFERENCES directories(id) ON DELETE SET NULL,
        path TEXT NOT NULL UNIQUE
    );

    CREATE TABLE series (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        normalized_key TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL
    );

    INSERT INTO series (id, normalized_key, display_name) VALUES (1, 'unknown', 'Unknown');

    CREATE TABLE comics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        directory_id INTEGER NOT NULL REFERENCES directories(id) ON DELETE CASCADE,
        filename TEXT NOT NULL COLLATE NOCASE,
        file_size INTEGER NOT NULL DEFAULT 0,
        page_count INTEGER,
        image_cache_ref TEXT,
        series_id INTEGER NOT NULL DEFAULT 1 REFERENCES series(id),
        issue,
        volume,
        width INTEGER,
        height INTEGER,
        aspect_ratio REAL,
        added_at TEXT NOT NULL,
        UNIQUE (directory_id, filename)
    );

    CREATE INDEX idx_comics_image ON comics(image_cache_ref);
    CREATE INDEX idx_comics_added ON comics(added_at);
    "#,
    // 2: lookups used by listings and the reconciler
    r#"
    CREATE INDEX idx_comics_series ON comics(series_id);
    CREATE INDEX idx_comics_filename ON comics(filename);
    CREATE INDEX idx_directories_parent ON directories(parent_id);
    "#,
];

pub(super) fn current_version(conn: &Connection) -> Result<i64, CatalogError> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Apply pending migrations. Returns the resulting version.
pub(super) fn migrate(conn: &mut Connection) -> Result<i64, CatalogError> {
    let supported = MIGRATIONS.len() as i64;
    let found = current_version(conn)?;
    if found > supported {
        return Err(CatalogError::SchemaTooNew { found, supported });
    }

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(found as usize) {
        let version = index as i64 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        info!(version, "applied catalog migration");
    }

    Ok(supported)
}

impl Catalog {
    pub fn schema_version(&self) -> Result<i64, CatalogError> {
        current_version(&self.conn())
    }
}
