//! Read APIs used by the web layer and the CLI.
//!
//! Rows come back with display fields already derived: human-readable size,
//! issue normalized to `#N`, and a title assembled from series, volume and
//! issue. Nothing here writes.

use super::store::{join_path, timestamp};
use super::{Catalog, CatalogError, ThumbState};
use crate::metadata::normalize_series_key;
use crate::types::Token;
use chrono::{Duration, Utc};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};
use serde::Serialize;

/// Which comics a listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFilter {
    /// Added within the last `days`, newest first.
    Recent { days: u32 },
    /// Everything, ordered by filename.
    All,
}

/// One page of results, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: u32,
    pub per_page: u32,
}

impl PageWindow {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.max(1),
        }
    }

    fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.per_page as i64
    }
}

/// A comic row with derived display fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComicListing {
    pub id: i64,
    pub series: String,
    pub title: String,
    /// `#N` for numeric issues, raw text otherwise, empty when unknown.
    pub issue: String,
    pub volume: Option<Token>,
    /// Cached thumbnail path, once generated.
    pub thumbnail: Option<String>,
    /// Error text shown in place of the thumbnail.
    pub error: Option<String>,
    pub path: String,
    pub added_at: String,
    pub size: String,
    pub size_bytes: u64,
    pub pages: Option<u32>,
}

/// Previous/next comic ids around one comic, plus its display title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Neighbours {
    pub prev: Option<i64>,
    pub next: Option<i64>,
    pub title: String,
    pub pages: Option<u32>,
}

/// Library-wide counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub total: u64,
    pub recent: u64,
    pub pending: u64,
    pub errored: u64,
    pub total_bytes: u64,
}

impl CatalogStats {
    pub fn total_size(&self) -> String {
        human_size(self.total_bytes)
    }
}

const UNITS: &[&str] = &["B", "kiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

/// Binary-prefixed size with two decimals: `"1.50 MiB"`. Zero is `"0B"`.
pub fn human_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0B".to_string();
    }
    let mut exponent = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && exponent < UNITS.len() - 1 {
        value /= 1024.0;
        exponent += 1;
    }
    format!("{:.2} {}", value, UNITS[exponent])
}

/// Issue for display: numeric-looking issues get a `#`.
pub fn format_issue(issue: Option<&Token>) -> String {
    match issue {
        None => String::new(),
        Some(Token::Text(s)) if s.is_empty() => String::new(),
        Some(t) if t.is_numeric_like() => format!("#{}", t),
        Some(t) => t.to_string(),
    }
}

/// `"Saga v2 #7"`: series, then volume, then issue, skipping what is unknown.
pub fn format_title(series: &str, volume: Option<&Token>, issue: Option<&Token>) -> String {
    let mut parts = vec![series.to_string()];
    if let Some(v) = volume {
        parts.push(format!("v{}", v));
    }
    let issue = format_issue(issue);
    if !issue.is_empty() {
        parts.push(issue);
    }
    parts.join(" ")
}

const LISTING_COLUMNS: &str = "c.id, s.display_name, c.issue, c.volume, c.image_cache_ref, \
     d.path, c.filename, c.added_at, c.file_size, c.page_count
     FROM comics c
     JOIN directories d ON c.directory_id = d.id
     JOIN series s ON c.series_id = s.id";

fn row_to_listing(row: &Row) -> rusqlite::Result<ComicListing> {
    let series: String = row.get(1)?;
    let issue: Option<Token> = row.get(2)?;
    let volume: Option<Token> = row.get(3)?;
    let image_ref: Option<String> = row.get(4)?;
    let dir: String = row.get(5)?;
    let filename: String = row.get(6)?;
    let size_bytes = row.get::<_, i64>(8)?.max(0) as u64;

    let (thumbnail, error) = match ThumbState::from_ref(image_ref.as_deref()) {
        ThumbState::Ready(path) => (Some(path), None),
        ThumbState::Errored(reason) => (None, Some(reason)),
        ThumbState::Pending | ThumbState::InProgress => (None, None),
    };

    Ok(ComicListing {
        id: row.get(0)?,
        title: format_title(&series, volume.as_ref(), issue.as_ref()),
        issue: format_issue(issue.as_ref()),
        series,
        volume,
        thumbnail,
        error,
        path: join_path(&dir, &filename),
        added_at: row.get(7)?,
        size: human_size(size_bytes),
        size_bytes,
        pages: row.get(9)?,
    })
}

impl Catalog {
    /// Absolute path of a comic's archive.
    pub fn get_comic_path(&self, id: i64) -> Result<String, CatalogError> {
        self.conn()
            .query_row(
                "SELECT d.path, c.filename FROM comics c
                 JOIN directories d ON c.directory_id = d.id
                 WHERE c.id = ?1",
                params![id],
                |row| {
                    let dir: String = row.get(0)?;
                    let filename: String = row.get(1)?;
                    Ok(join_path(&dir, &filename))
                },
            )
            .optional()?
            .ok_or(CatalogError::NotFound(id))
    }

    pub fn comic_listing(&self, id: i64) -> Result<ComicListing, CatalogError> {
        self.conn()
            .query_row(
                &format!("SELECT {} WHERE c.id = ?1", LISTING_COLUMNS),
                params![id],
                row_to_listing,
            )
            .optional()?
            .ok_or(CatalogError::NotFound(id))
    }

    /// One page of comics matching `filter`, optionally narrowed to a series.
    ///
    /// The series filter is compared by normalized key, so `"x men"` finds
    /// `"X-Men"`.
    pub fn list_comics(
        &self,
        filter: ListFilter,
        series: Option<&str>,
        window: PageWindow,
    ) -> Result<Vec<ComicListing>, CatalogError> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let ListFilter::Recent { days } = filter {
            values.push(Value::Text(recent_cutoff(days)));
            clauses.push(format!("c.added_at >= ?{}", values.len()));
        }
        if let Some(name) = series {
            values.push(Value::Text(normalize_series_key(name)));
            clauses.push(format!("s.normalized_key = ?{}", values.len()));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let order = match filter {
            ListFilter::Recent { .. } => "c.added_at DESC, c.id DESC",
            ListFilter::All => "c.filename ASC, c.id ASC",
        };

        values.push(Value::Integer(window.per_page as i64));
        let limit = values.len();
        values.push(Value::Integer(window.offset()));
        let offset = values.len();

        let sql = format!(
            "SELECT {} {} ORDER BY {} LIMIT ?{} OFFSET ?{}",
            LISTING_COLUMNS, where_clause, order, limit, offset
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), row_to_listing)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Previous and next comic in the order [`Catalog::list_comics`] shows
    /// them: newest first inside the recent window, or by filename.
    pub fn neighbours(&self, id: i64, filter: ListFilter) -> Result<Neighbours, CatalogError> {
        let listing = self.comic_listing(id)?;

        let (prev_sql, next_sql, values) = match filter {
            ListFilter::Recent { days } => (
                "SELECT c.id FROM comics c, comics me WHERE me.id = ?1 AND c.added_at >= ?2
                   AND (c.added_at > me.added_at OR (c.added_at = me.added_at AND c.id > me.id))
                 ORDER BY c.added_at ASC, c.id ASC LIMIT 1",
                "SELECT c.id FROM comics c, comics me WHERE me.id = ?1 AND c.added_at >= ?2
                   AND (c.added_at < me.added_at OR (c.added_at = me.added_at AND c.id < me.id))
                 ORDER BY c.added_at DESC, c.id DESC LIMIT 1",
                vec![Value::Integer(id), Value::Text(recent_cutoff(days))],
            ),
            ListFilter::All => (
                "SELECT c.id FROM comics c, comics me WHERE me.id = ?1
                   AND (c.filename < me.filename OR (c.filename = me.filename AND c.id < me.id))
                 ORDER BY c.filename DESC, c.id DESC LIMIT 1",
                "SELECT c.id FROM comics c, comics me WHERE me.id = ?1
                   AND (c.filename > me.filename OR (c.filename = me.filename AND c.id > me.id))
                 ORDER BY c.filename ASC, c.id ASC LIMIT 1",
                vec![Value::Integer(id)],
            ),
        };

        let conn = self.conn();
        let lookup = |sql: &str| -> Result<Option<i64>, CatalogError> {
            Ok(conn
                .query_row(sql, params_from_iter(values.iter()), |row| row.get(0))
                .optional()?)
        };

        Ok(Neighbours {
            prev: lookup(prev_sql)?,
            next: lookup(next_sql)?,
            title: listing.title,
            pages: listing.pages,
        })
    }

    pub fn count_comics(&self, filter: ListFilter) -> Result<u64, CatalogError> {
        let conn = self.conn();
        let count: i64 = match filter {
            ListFilter::All => conn.query_row("SELECT COUNT(*) FROM comics", [], |r| r.get(0))?,
            ListFilter::Recent { days } => conn.query_row(
                "SELECT COUNT(*) FROM comics WHERE added_at >= ?1",
                params![recent_cutoff(days)],
                |r| r.get(0),
            )?,
        };
        Ok(count as u64)
    }

    /// Comics still waiting for a thumbnail, in progress included.
    pub fn pending_count(&self) -> Result<u64, CatalogError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM comics WHERE image_cache_ref IS NULL OR image_cache_ref = ''",
            [],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn catalog_stats(&self, recent_days: u32) -> Result<CatalogStats, CatalogError> {
        let (total, total_bytes, errored): (i64, i64, i64) = self.conn().query_row(
            "SELECT COUNT(*), COALESCE(SUM(file_size), 0),
                    COALESCE(SUM(substr(image_cache_ref, 1, ?1) = ?2), 0)
             FROM comics",
            params![super::ERROR_MARKER.len() as i64, super::ERROR_MARKER],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;

        Ok(CatalogStats {
            total: total as u64,
            recent: self.count_comics(ListFilter::Recent { days: recent_days })?,
            pending: self.pending_count()?,
            errored: errored as u64,
            total_bytes: total_bytes.max(0) as u64,
        })
    }
}

fn recent_cutoff(days: u32) -> String {
    timestamp(Utc::now() - Duration::days(days as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ComicMeta;

    fn seeded() -> (Catalog, Vec<i64>) {
        let catalog = Catalog::in_memory().unwrap();
        let dir = catalog.ensure_directory("/comics", None).unwrap();
        let old = Utc::now() - Duration::days(30);
        let mut ids = Vec::new();
        for (name, size, added) in [
            ("Batman 023.cbz", 2048u64, old),
            ("Saga v02.cbz", 1_572_864, Utc::now()),
            ("annual.cbz", 0, Utc::now()),
        ] {
            ids.push(
                catalog
                    .insert_comic_at(dir, name, size, added)
                    .unwrap()
                    .unwrap(),
            );
        }
        let batman = catalog.find_or_create_series("Batman").unwrap();
        catalog
            .update_meta(
                ids[0],
                &ComicMeta {
                    page_count: 22,
                    series_id: batman,
                    issue: Some(Token::Number(23)),
                    volume: None,
                },
            )
            .unwrap();
        let saga = catalog.find_or_create_series("Saga").unwrap();
        catalog
            .update_meta(
                ids[1],
                &ComicMeta {
                    page_count: 160,
                    series_id: saga,
                    issue: None,
                    volume: Some(Token::Number(2)),
                },
            )
            .unwrap();
        (catalog, ids)
    }

    // =========================================================================
    // Display helpers
    // =========================================================================

    #[test]
    fn human_size_units() {
        assert_eq!(human_size(0), "0B");
        assert_eq!(human_size(512), "512.00 B");
        assert_eq!(human_size(2048), "2.00 kiB");
        assert_eq!(human_size(1_572_864), "1.50 MiB");
        assert_eq!(human_size(5 * 1024 * 1024 * 1024), "5.00 GiB");
    }

    #[test]
    fn issue_formatting() {
        assert_eq!(format_issue(None), "");
        assert_eq!(format_issue(Some(&Token::Number(23))), "#23");
        assert_eq!(format_issue(Some(&Token::Text("1.5".into()))), "#1.5");
        assert_eq!(format_issue(Some(&Token::Text("Annual".into()))), "Annual");
    }

    #[test]
    fn title_formatting() {
        assert_eq!(
            format_title("Saga", Some(&Token::Number(2)), Some(&Token::Number(7))),
            "Saga v2 #7"
        );
        assert_eq!(format_title("Batman", None, Some(&Token::Number(23))), "Batman #23");
        assert_eq!(format_title("Maus", None, None), "Maus");
    }

    // =========================================================================
    // Queries
    // =========================================================================

    #[test]
    fn get_comic_path_joins_directory() {
        let (catalog, ids) = seeded();
        assert_eq!(
            catalog.get_comic_path(ids[1]).unwrap(),
            "/comics/Saga v02.cbz"
        );
        assert!(matches!(
            catalog.get_comic_path(999),
            Err(CatalogError::NotFound(999))
        ));
    }

    #[test]
    fn list_all_orders_by_filename_case_insensitively() {
        let (catalog, _) = seeded();
        let rows = catalog
            .list_comics(ListFilter::All, None, PageWindow::new(1, 10))
            .unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(names, vec!["Unknown", "Batman #23", "Saga v2"]);
        assert_eq!(rows[1].size, "2.00 kiB");
        assert_eq!(rows[1].pages, Some(22));
    }

    #[test]
    fn list_recent_excludes_old_comics() {
        let (catalog, ids) = seeded();
        let rows = catalog
            .list_comics(ListFilter::Recent { days: 7 }, None, PageWindow::new(1, 10))
            .unwrap();
        let got: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(got, vec![ids[2], ids[1]]);
    }

    #[test]
    fn list_pages_through_results() {
        let (catalog, _) = seeded();
        let first = catalog
            .list_comics(ListFilter::All, None, PageWindow::new(1, 2))
            .unwrap();
        let second = catalog
            .list_comics(ListFilter::All, None, PageWindow::new(2, 2))
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].series, "Saga");
    }

    #[test]
    fn list_filters_by_series_key() {
        let (catalog, ids) = seeded();
        let rows = catalog
            .list_comics(ListFilter::All, Some("  batman "), PageWindow::new(1, 10))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, ids[0]);
    }

    #[test]
    fn listing_exposes_thumbnail_and_error() {
        let (catalog, ids) = seeded();
        catalog.set_thumbnail(ids[0], "/cache/0/1-300x400.jpg", 600, 800).unwrap();
        catalog.set_error(ids[2], "This archive has no image files").unwrap();

        let ok = catalog.comic_listing(ids[0]).unwrap();
        assert_eq!(ok.thumbnail.as_deref(), Some("/cache/0/1-300x400.jpg"));
        let bad = catalog.comic_listing(ids[2]).unwrap();
        assert_eq!(bad.thumbnail, None);
        assert_eq!(bad.error.as_deref(), Some("This archive has no image files"));
    }

    #[test]
    fn neighbours_follow_listing_order() {
        let (catalog, ids) = seeded();
        let recent = ListFilter::Recent { days: 7 };

        // Recent listing shows ids[2], ids[1]; ids[0] is outside the window.
        let newest = catalog.neighbours(ids[2], recent).unwrap();
        assert_eq!((newest.prev, newest.next), (None, Some(ids[1])));
        let last = catalog.neighbours(ids[1], recent).unwrap();
        assert_eq!((last.prev, last.next), (Some(ids[2]), None));
        assert_eq!(last.title, "Saga v2");
        assert_eq!(last.pages, Some(160));

        // Filename order: annual, Batman, Saga
        let by_name = catalog.neighbours(ids[0], ListFilter::All).unwrap();
        assert_eq!((by_name.prev, by_name.next), (Some(ids[2]), Some(ids[1])));

        let first = catalog.neighbours(ids[2], ListFilter::All).unwrap();
        assert_eq!(first.prev, None);
    }

    #[test]
    fn recent_neighbours_match_the_listing() {
        let catalog = Catalog::in_memory().unwrap();
        let dir = catalog.ensure_directory("/comics", None).unwrap();
        let now = Utc::now();
        // Inserted out of age order, so id order and listing order differ.
        let added = [
            ("b.cbz", now - Duration::hours(2)),
            ("old.cbz", now - Duration::days(30)),
            ("c.cbz", now - Duration::hours(1)),
            ("a.cbz", now - Duration::hours(3)),
        ];
        for (name, at) in added {
            catalog.insert_comic_at(dir, name, 1, at).unwrap();
        }

        let filter = ListFilter::Recent { days: 7 };
        let listed: Vec<i64> = catalog
            .list_comics(filter, None, PageWindow::new(1, 10))
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(listed.len(), 3);

        for (i, id) in listed.iter().enumerate() {
            let n = catalog.neighbours(*id, filter).unwrap();
            assert_eq!(n.prev, i.checked_sub(1).map(|p| listed[p]));
            assert_eq!(n.next, listed.get(i + 1).copied());
        }
    }

    #[test]
    fn stats_count_everything() {
        let (catalog, ids) = seeded();
        catalog.set_error(ids[2], "corrupt").unwrap();

        let stats = catalog.catalog_stats(7).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.recent, 2);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.errored, 1);
        assert_eq!(stats.total_bytes, 2048 + 1_572_864);
        assert_eq!(stats.total_size(), "1.50 MiB");
    }
}
