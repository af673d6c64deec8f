//! SQLite schema and statements for the offline index.

use std::collections::HashMap;

use rusqlite::{Connection, params};

use crate::DblpError;

/// Metadata keys. The table holds exactly these three rows after a build.
pub const KEY_BUILD_DATE: &str = "build_date";
pub const KEY_TRIPLE_COUNT: &str = "triple_count";
pub const KEY_PUBLICATION_COUNT: &str = "publication_count";

/// A publication row as written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationRow {
    pub uri: String,
    pub title: String,
    /// Resolved author names joined with `"; "`.
    pub authors: String,
    pub url: String,
}

/// Create the schema on a fresh connection.
///
/// The FTS5 table is external-content over `publications` and stays empty
/// until [`rebuild_fts_index`] runs. The exact-title index is created
/// separately by [`create_title_index`] once all rows are in.
pub fn init_database(conn: &Connection) -> Result<(), DblpError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS publications (
            id INTEGER PRIMARY KEY,
            uri TEXT UNIQUE NOT NULL,
            title TEXT NOT NULL,
            authors TEXT NOT NULL DEFAULT '',
            url TEXT NOT NULL
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS publications_fts USING fts5(
            title,
            content='publications',
            content_rowid='id'
        );

        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT
        );
        "#,
    )?;

    Ok(())
}

/// Configure pragmas for a throwaway bulk load.
///
/// No journal and no fsync: the file is built off to the side and only
/// published once complete, so a crash simply leaves garbage to discard.
/// `page_size` must be set before any table exists.
pub fn begin_bulk_load(conn: &Connection) -> Result<(), DblpError> {
    conn.pragma_update(None, "page_size", 8192)?;
    conn.pragma_update_and_check(None, "journal_mode", "OFF", |row| row.get::<_, String>(0))?;
    conn.execute_batch(
        "PRAGMA synchronous = OFF; \
         PRAGMA temp_store = MEMORY; \
         PRAGMA cache_size = -64000;",
    )?;
    Ok(())
}

/// Insert one batch of rows in a single transaction.
pub fn insert_publications(conn: &Connection, rows: &[PublicationRow]) -> Result<(), DblpError> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO publications (uri, title, authors, url) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for row in rows {
            stmt.execute(params![row.uri, row.title, row.authors, row.url])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Rebuild the FTS5 index from the publications table in one pass.
pub fn rebuild_fts_index(conn: &Connection) -> Result<(), DblpError> {
    conn.execute(
        "INSERT INTO publications_fts(publications_fts) VALUES('rebuild')",
        [],
    )?;
    Ok(())
}

/// Secondary index for exact-title lookups.
pub fn create_title_index(conn: &Connection) -> Result<(), DblpError> {
    conn.execute_batch("CREATE INDEX IF NOT EXISTS idx_title ON publications(title);")?;
    Ok(())
}

/// Replace the whole metadata table with the given rows.
pub fn replace_metadata(conn: &Connection, entries: &[(&str, String)]) -> Result<(), DblpError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM metadata", [])?;
    {
        let mut stmt = tx.prepare_cached("INSERT INTO metadata (key, value) VALUES (?1, ?2)")?;
        for (key, value) in entries {
            stmt.execute(params![key, value])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Get a metadata value by key.
pub fn get_metadata(conn: &Connection, key: &str) -> Result<Option<String>, DblpError> {
    let mut stmt = conn.prepare_cached("SELECT value FROM metadata WHERE key = ?1")?;
    let mut rows = stmt.query(params![key])?;
    match rows.next()? {
        Some(row) => Ok(row.get::<_, Option<String>>(0)?),
        None => Ok(None),
    }
}

/// All metadata rows.
pub fn get_all_metadata(conn: &Connection) -> Result<HashMap<String, String>, DblpError> {
    let mut stmt = conn.prepare_cached("SELECT key, value FROM metadata")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
    })?;
    let mut out = HashMap::new();
    for row in rows {
        let (key, value) = row?;
        if let Some(value) = value {
            out.insert(key, value);
        }
    }
    Ok(out)
}

/// Whether a table with this name exists.
pub fn table_exists(conn: &Connection, name: &str) -> Result<bool, DblpError> {
    let exists = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub fn count_publications(conn: &Connection) -> Result<i64, DblpError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM publications", [], |row| row.get(0))?)
}

/// Full-text candidates for an FTS5 MATCH expression, in rowid order.
pub fn search_titles(
    conn: &Connection,
    fts_query: &str,
    limit: usize,
) -> Result<Vec<PublicationRow>, DblpError> {
    let mut stmt = conn.prepare_cached(
        "SELECT p.uri, p.title, p.authors, p.url \
         FROM publications_fts fts JOIN publications p ON fts.rowid = p.id \
         WHERE publications_fts MATCH ?1 \
         ORDER BY fts.rowid \
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![fts_query, limit as i64], row_to_publication)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Rows whose title equals `title` exactly.
pub fn find_by_title(conn: &Connection, title: &str) -> Result<Vec<PublicationRow>, DblpError> {
    let mut stmt = conn.prepare_cached(
        "SELECT uri, title, authors, url FROM publications WHERE title = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![title], row_to_publication)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_publication(conn: &Connection, uri: &str) -> Result<Option<PublicationRow>, DblpError> {
    let mut stmt =
        conn.prepare_cached("SELECT uri, title, authors, url FROM publications WHERE uri = ?1")?;
    let mut rows = stmt.query(params![uri])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_publication(row)?)),
        None => Ok(None),
    }
}

fn row_to_publication(row: &rusqlite::Row<'_>) -> rusqlite::Result<PublicationRow> {
    Ok(PublicationRow {
        uri: row.get(0)?,
        title: row.get(1)?,
        authors: row.get(2)?,
        url: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_database(&conn).unwrap();
        conn
    }

    fn row(uri: &str, title: &str, authors: &str) -> PublicationRow {
        PublicationRow {
            uri: uri.into(),
            title: title.into(),
            authors: authors.into(),
            url: uri.into(),
        }
    }

    #[test]
    fn test_init_creates_tables() {
        let conn = setup_db();
        assert!(table_exists(&conn, "publications").unwrap());
        assert!(table_exists(&conn, "metadata").unwrap());
        assert!(table_exists(&conn, "publications_fts").unwrap());
        assert!(!table_exists(&conn, "authors").unwrap());
        assert_eq!(count_publications(&conn).unwrap(), 0);
    }

    #[test]
    fn test_insert_and_get() {
        let conn = setup_db();
        insert_publications(
            &conn,
            &[
                row("rec/1", "Test Paper Title", "Alice Smith; Bob Jones"),
                row("rec/2", "Another Paper", ""),
            ],
        )
        .unwrap();

        assert_eq!(count_publications(&conn).unwrap(), 2);
        let found = get_publication(&conn, "rec/1").unwrap().unwrap();
        assert_eq!(found.authors, "Alice Smith; Bob Jones");
        assert!(get_publication(&conn, "rec/9").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_uri_is_rejected() {
        let conn = setup_db();
        insert_publications(&conn, &[row("rec/1", "A", "")]).unwrap();
        assert!(insert_publications(&conn, &[row("rec/1", "B", "")]).is_err());
    }

    #[test]
    fn test_metadata_replaced_wholesale() {
        let conn = setup_db();
        assert_eq!(get_metadata(&conn, KEY_BUILD_DATE).unwrap(), None);

        replace_metadata(
            &conn,
            &[
                (KEY_BUILD_DATE, "2024-01-01T00:00:00+00:00".into()),
                ("stray", "x".into()),
            ],
        )
        .unwrap();
        replace_metadata(
            &conn,
            &[
                (KEY_BUILD_DATE, "2024-02-01T00:00:00+00:00".into()),
                (KEY_TRIPLE_COUNT, "10".into()),
                (KEY_PUBLICATION_COUNT, "2".into()),
            ],
        )
        .unwrap();

        let all = get_all_metadata(&conn).unwrap();
        assert_eq!(all.len(), 3);
        assert!(!all.contains_key("stray"));
        assert_eq!(
            get_metadata(&conn, KEY_BUILD_DATE).unwrap().as_deref(),
            Some("2024-02-01T00:00:00+00:00")
        );
    }

    #[test]
    fn test_fts_rebuild_and_search() {
        let conn = setup_db();
        insert_publications(
            &conn,
            &[
                row("rec/1", "Attention is All you Need", "A; B"),
                row("rec/2", "BERT Pre-training", ""),
            ],
        )
        .unwrap();

        // External-content FTS is empty until rebuilt.
        assert!(search_titles(&conn, "\"attention\"", 20).unwrap().is_empty());

        rebuild_fts_index(&conn).unwrap();
        let results = search_titles(&conn, "\"Attention\" \"Need\"", 20).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].uri, "rec/1");

        assert!(search_titles(&conn, "\"attention\" \"bert\"", 20).unwrap().is_empty());
    }

    #[test]
    fn test_find_by_title_uses_exact_match() {
        let conn = setup_db();
        insert_publications(
            &conn,
            &[
                row("rec/1", "Exact Title", ""),
                row("rec/2", "Exact Title.", ""),
            ],
        )
        .unwrap();
        create_title_index(&conn).unwrap();

        let found = find_by_title(&conn, "Exact Title").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].uri, "rec/1");
    }
}
