//! Catalog writes: reconciler-owned existence, pipeline-owned state.

use super::{
    Catalog, CatalogError, ComicEntry, ComicMeta, DirectoryRow, ERROR_MARKER, PendingComic,
    ThumbState, UNKNOWN_SERIES_ID,
};
use crate::metadata::normalize_series_key;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{OptionalExtension, params};

pub(super) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl Catalog {
    // =========================================================================
    // Directories
    // =========================================================================

    /// Id of the directory at `path`, inserting it if unseen.
    ///
    /// A concurrent insert of the same path is absorbed: the existing row wins.
    pub fn ensure_directory(
        &self,
        path: &str,
        parent_id: Option<i64>,
    ) -> Result<i64, CatalogError> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO directories (path, parent_id) VALUES (?1, ?2)",
            params![path, parent_id],
        )?;
        Ok(conn.query_row(
            "SELECT id FROM directories WHERE path = ?1",
            params![path],
            |row| row.get(0),
        )?)
    }

    pub fn set_directory_parent(&self, id: i64, parent_id: Option<i64>) -> Result<(), CatalogError> {
        self.conn().execute(
            "UPDATE directories SET parent_id = ?2 WHERE id = ?1",
            params![id, parent_id],
        )?;
        Ok(())
    }

    pub fn directories(&self) -> Result<Vec<DirectoryRow>, CatalogError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, parent_id, path FROM directories ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(DirectoryRow {
                id: row.get(0)?,
                parent_id: row.get(1)?,
                path: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Delete a directory row; its comics go with it.
    pub fn delete_directory(&self, id: i64) -> Result<bool, CatalogError> {
        Ok(self
            .conn()
            .execute("DELETE FROM directories WHERE id = ?1", params![id])?
            > 0)
    }

    // =========================================================================
    // Comics: existence
    // =========================================================================

    /// Insert a newly discovered comic with its size only.
    ///
    /// Returns `None` when a comic with the same (case-insensitive) filename
    /// already exists in the directory.
    pub fn insert_comic(
        &self,
        directory_id: i64,
        filename: &str,
        file_size: u64,
    ) -> Result<Option<i64>, CatalogError> {
        self.insert_comic_at(directory_id, filename, file_size, Utc::now())
    }

    pub fn insert_comic_at(
        &self,
        directory_id: i64,
        filename: &str,
        file_size: u64,
        added_at: DateTime<Utc>,
    ) -> Result<Option<i64>, CatalogError> {
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO comics (directory_id, filename, file_size, added_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![directory_id, filename, file_size as i64, timestamp(added_at)],
        )?;
        Ok((inserted > 0).then(|| conn.last_insert_rowid()))
    }

    pub fn comics(&self) -> Result<Vec<ComicEntry>, CatalogError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, directory_id, filename FROM comics ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(ComicEntry {
                id: row.get(0)?,
                directory_id: row.get(1)?,
                filename: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn delete_comic(&self, id: i64) -> Result<bool, CatalogError> {
        Ok(self
            .conn()
            .execute("DELETE FROM comics WHERE id = ?1", params![id])?
            > 0)
    }

    // =========================================================================
    // Comics: thumbnail state machine
    // =========================================================================

    /// Up to `limit` pending comics with their absolute paths, oldest first.
    pub fn pending_batch(&self, limit: usize) -> Result<Vec<PendingComic>, CatalogError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT c.id, d.path, c.filename
             FROM comics c JOIN directories d ON c.directory_id = d.id
             WHERE c.image_cache_ref IS NULL
             ORDER BY c.id
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let dir: String = row.get(1)?;
            let filename: String = row.get(2)?;
            Ok(PendingComic {
                id: row.get(0)?,
                path: join_path(&dir, &filename),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Claim comics for a running batch.
    pub fn mark_in_progress(&self, ids: &[i64]) -> Result<usize, CatalogError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut claimed = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE comics SET image_cache_ref = '' WHERE id = ?1 AND image_cache_ref IS NULL",
            )?;
            for id in ids {
                claimed += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(claimed)
    }

    /// Record a finished thumbnail and the source cover geometry.
    pub fn set_thumbnail(
        &self,
        id: i64,
        path: &str,
        width: u32,
        height: u32,
    ) -> Result<(), CatalogError> {
        let aspect = if height > 0 {
            Some(width as f64 / height as f64)
        } else {
            None
        };
        self.conn().execute(
            "UPDATE comics SET image_cache_ref = ?2, width = ?3, height = ?4, aspect_ratio = ?5
             WHERE id = ?1",
            params![id, path, width, height, aspect],
        )?;
        Ok(())
    }

    /// Mark a comic as errored. Width and height are set to -1.
    pub fn set_error(&self, id: i64, reason: &str) -> Result<(), CatalogError> {
        self.conn().execute(
            "UPDATE comics SET image_cache_ref = ?2, width = -1, height = -1, aspect_ratio = NULL
             WHERE id = ?1",
            params![id, format!("{}{}", ERROR_MARKER, reason)],
        )?;
        Ok(())
    }

    pub fn update_meta(&self, id: i64, meta: &ComicMeta) -> Result<(), CatalogError> {
        self.conn().execute(
            "UPDATE comics SET page_count = ?2, series_id = ?3, issue = ?4, volume = ?5
             WHERE id = ?1",
            params![id, meta.page_count, meta.series_id, meta.issue, meta.volume],
        )?;
        Ok(())
    }

    pub fn thumb_state(&self, id: i64) -> Result<ThumbState, CatalogError> {
        let image_ref: Option<Option<String>> = self
            .conn()
            .query_row(
                "SELECT image_cache_ref FROM comics WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match image_ref {
            Some(r) => Ok(ThumbState::from_ref(r.as_deref())),
            None => Err(CatalogError::NotFound(id)),
        }
    }

    /// Return every in-progress comic to pending.
    pub fn reset_in_progress(&self) -> Result<usize, CatalogError> {
        Ok(self.conn().execute(
            "UPDATE comics SET image_cache_ref = NULL WHERE image_cache_ref = ''",
            [],
        )?)
    }

    /// Give back claims on comics that were never written. Comics already
    /// thumbnailed or errored are left alone.
    pub fn release_claims(&self, ids: &[i64]) -> Result<usize, CatalogError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut released = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE comics SET image_cache_ref = NULL WHERE id = ?1 AND image_cache_ref = ''",
            )?;
            for id in ids {
                released += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(released)
    }

    /// Return every errored comic to pending.
    pub fn reset_errored(&self) -> Result<usize, CatalogError> {
        Ok(self.conn().execute(
            "UPDATE comics SET image_cache_ref = NULL, width = NULL, height = NULL
             WHERE substr(image_cache_ref, 1, ?1) = ?2",
            params![ERROR_MARKER.len() as i64, ERROR_MARKER],
        )?)
    }

    /// Ids of every comic with a finished thumbnail.
    pub fn thumbnailed_ids(&self) -> Result<Vec<i64>, CatalogError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id FROM comics
             WHERE image_cache_ref IS NOT NULL AND image_cache_ref != ''
               AND substr(image_cache_ref, 1, ?1) != ?2
             ORDER BY id",
        )?;
        let rows = stmt.query_map(
            params![ERROR_MARKER.len() as i64, ERROR_MARKER],
            |row| row.get(0),
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Send the given comics back to pending.
    pub fn reset_thumbnails(&self, ids: &[i64]) -> Result<usize, CatalogError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut reset = 0;
        {
            let mut stmt =
                tx.prepare("UPDATE comics SET image_cache_ref = NULL WHERE id = ?1")?;
            for id in ids {
                reset += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(reset)
    }

    // =========================================================================
    // Series
    // =========================================================================

    /// Series id for a display name, creating the series on first sight.
    ///
    /// Names are deduplicated by normalized key; the first display name seen
    /// is kept. Names with no alphanumerics resolve to the Unknown sentinel.
    pub fn find_or_create_series(&self, display_name: &str) -> Result<i64, CatalogError> {
        let key = normalize_series_key(display_name);
        if key.is_empty() {
            return Ok(UNKNOWN_SERIES_ID);
        }

        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO series (normalized_key, display_name) VALUES (?1, ?2)",
            params![key, display_name.trim()],
        )?;
        Ok(conn.query_row(
            "SELECT id FROM series WHERE normalized_key = ?1",
            params![key],
            |row| row.get(0),
        )?)
    }

    pub fn series_name(&self, id: i64) -> Result<Option<String>, CatalogError> {
        Ok(self
            .conn()
            .query_row(
                "SELECT display_name FROM series WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?)
    }
}

/// Absolute comic path from its directory and filename.
pub(super) fn join_path(dir: &str, filename: &str) -> String {
    std::path::Path::new(dir)
        .join(filename)
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_with_dir() -> (Catalog, i64) {
        let catalog = Catalog::in_memory().unwrap();
        let dir = catalog.ensure_directory("/comics", None).unwrap();
        (catalog, dir)
    }

    // =========================================================================
    // Existence
    // =========================================================================

    #[test]
    fn ensure_directory_reuses_existing_row() {
        let catalog = Catalog::in_memory().unwrap();
        let a = catalog.ensure_directory("/comics", None).unwrap();
        let b = catalog.ensure_directory("/comics/Saga", Some(a)).unwrap();
        assert_ne!(a, b);
        assert_eq!(catalog.ensure_directory("/comics", None).unwrap(), a);
        assert_eq!(catalog.directories().unwrap().len(), 2);
    }

    #[test]
    fn insert_comic_is_case_insensitive() {
        let (catalog, dir) = catalog_with_dir();
        assert!(catalog.insert_comic(dir, "Saga 01.cbz", 10).unwrap().is_some());
        assert_eq!(catalog.insert_comic(dir, "SAGA 01.CBZ", 10).unwrap(), None);
        assert_eq!(catalog.comics().unwrap().len(), 1);
    }

    #[test]
    fn same_filename_in_other_directory_is_distinct() {
        let (catalog, dir) = catalog_with_dir();
        let other = catalog.ensure_directory("/other", None).unwrap();
        assert!(catalog.insert_comic(dir, "a.cbz", 1).unwrap().is_some());
        assert!(catalog.insert_comic(other, "a.cbz", 1).unwrap().is_some());
    }

    #[test]
    fn delete_directory_cascades_to_comics() {
        let (catalog, dir) = catalog_with_dir();
        catalog.insert_comic(dir, "a.cbz", 1).unwrap();
        catalog.insert_comic(dir, "b.cbz", 1).unwrap();

        assert!(catalog.delete_directory(dir).unwrap());
        assert!(catalog.comics().unwrap().is_empty());
    }

    // =========================================================================
    // Thumbnail state machine
    // =========================================================================

    #[test]
    fn pending_batch_respects_limit_and_claims() {
        let (catalog, dir) = catalog_with_dir();
        for i in 0..5 {
            catalog
                .insert_comic(dir, &format!("{:02}.cbz", i), 1)
                .unwrap();
        }

        let batch = catalog.pending_batch(3).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].path, "/comics/00.cbz");

        let ids: Vec<i64> = batch.iter().map(|c| c.id).collect();
        assert_eq!(catalog.mark_in_progress(&ids).unwrap(), 3);

        let rest = catalog.pending_batch(10).unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn release_claims_only_touches_unwritten_claims() {
        let (catalog, dir) = catalog_with_dir();
        let done = catalog.insert_comic(dir, "done.cbz", 1).unwrap().unwrap();
        let claimed = catalog.insert_comic(dir, "claimed.cbz", 1).unwrap().unwrap();
        catalog.mark_in_progress(&[done, claimed]).unwrap();
        catalog.set_thumbnail(done, "/cache/0/1-300x400.jpg", 600, 800).unwrap();

        assert_eq!(catalog.release_claims(&[done, claimed]).unwrap(), 1);
        assert!(matches!(catalog.thumb_state(done).unwrap(), ThumbState::Ready(_)));
        assert_eq!(catalog.thumb_state(claimed).unwrap(), ThumbState::Pending);
    }

    #[test]
    fn thumbnail_and_error_transitions() {
        let (catalog, dir) = catalog_with_dir();
        let ok = catalog.insert_comic(dir, "ok.cbz", 1).unwrap().unwrap();
        let bad = catalog.insert_comic(dir, "bad.cbz", 1).unwrap().unwrap();

        catalog.set_thumbnail(ok, "/cache/0/1-300x400.jpg", 600, 800).unwrap();
        catalog.set_error(bad, "Unrecognized archive format").unwrap();

        assert_eq!(
            catalog.thumb_state(ok).unwrap(),
            ThumbState::Ready("/cache/0/1-300x400.jpg".into())
        );
        assert_eq!(
            catalog.thumb_state(bad).unwrap(),
            ThumbState::Errored("Unrecognized archive format".into())
        );
        assert!(catalog.pending_batch(10).unwrap().is_empty());
        assert_eq!(catalog.thumbnailed_ids().unwrap(), vec![ok]);
    }

    #[test]
    fn reset_errored_only_touches_errors() {
        let (catalog, dir) = catalog_with_dir();
        let ok = catalog.insert_comic(dir, "ok.cbz", 1).unwrap().unwrap();
        let bad = catalog.insert_comic(dir, "bad.cbz", 1).unwrap().unwrap();
        catalog.set_thumbnail(ok, "/t.jpg", 1, 1).unwrap();
        catalog.set_error(bad, "corrupt").unwrap();

        assert_eq!(catalog.reset_errored().unwrap(), 1);
        assert_eq!(catalog.thumb_state(bad).unwrap(), ThumbState::Pending);
        assert!(matches!(catalog.thumb_state(ok).unwrap(), ThumbState::Ready(_)));
    }

    #[test]
    fn reset_thumbnails_returns_to_pending() {
        let (catalog, dir) = catalog_with_dir();
        let id = catalog.insert_comic(dir, "a.cbz", 1).unwrap().unwrap();
        catalog.set_thumbnail(id, "/t.jpg", 1, 1).unwrap();

        assert_eq!(catalog.reset_thumbnails(&[id]).unwrap(), 1);
        assert_eq!(catalog.thumb_state(id).unwrap(), ThumbState::Pending);
    }

    #[test]
    fn thumb_state_of_missing_comic() {
        let catalog = Catalog::in_memory().unwrap();
        assert!(matches!(
            catalog.thumb_state(42),
            Err(CatalogError::NotFound(42))
        ));
    }

    // =========================================================================
    // Series
    // =========================================================================

    #[test]
    fn series_dedup_keeps_first_display_name() {
        let catalog = Catalog::in_memory().unwrap();
        let a = catalog.find_or_create_series("X-Men").unwrap();
        let b = catalog.find_or_create_series("x men").unwrap();
        assert_eq!(a, b);
        assert_eq!(catalog.series_name(a).unwrap().as_deref(), Some("X-Men"));
    }

    #[test]
    fn empty_series_is_unknown() {
        let catalog = Catalog::in_memory().unwrap();
        assert_eq!(
            catalog.find_or_create_series(" -- ").unwrap(),
            UNKNOWN_SERIES_ID
        );
        assert_eq!(
            catalog.series_name(UNKNOWN_SERIES_ID).unwrap().as_deref(),
            Some("Unknown")
        );
    }

    #[test]
    fn update_meta_stores_tokens() {
        let (catalog, dir) = catalog_with_dir();
        let id = catalog.insert_comic(dir, "a.cbz", 1).unwrap().unwrap();
        let series = catalog.find_or_create_series("Saga").unwrap();
        catalog
            .update_meta(
                id,
                &ComicMeta {
                    page_count: 24,
                    series_id: series,
                    issue: Some(crate::types::Token::Number(7)),
                    volume: None,
                },
            )
            .unwrap();

        let listing = catalog.comic_listing(id).unwrap();
        assert_eq!(listing.series, "Saga");
        assert_eq!(listing.issue, "#7");
        assert_eq!(listing.pages, Some(24));
    }
}
