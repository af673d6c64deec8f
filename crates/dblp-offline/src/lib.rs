//! Offline DBLP index builder and title lookup.
//!
//! Builds a single-file SQLite store with an FTS5 title index from the DBLP
//! N-Triples dump, then resolves noisy free-text titles against it with
//! conservative query-term selection and fuzzy confirmation via rapidfuzz.

mod builder;
pub mod config_file;
mod db;
pub mod ingest;
pub mod parser;
mod query;
pub mod staleness;
pub mod terms;

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

// Re-export for convenience
pub use builder::{
    AUTHOR_SEPARATOR, BuildConfig, BuildSummary, DEFAULT_BATCH_SIZE, DEFAULT_DBLP_URL,
    DEFAULT_PROGRESS_INTERVAL,
};
pub use ingest::Predicates;
pub use query::{
    DEFAULT_CANDIDATE_LIMIT, DEFAULT_THRESHOLD, FuzzyComparator, LookupConfig, TitleComparator,
    split_authors, strip_disambiguation_suffix,
};
pub use staleness::{
    DEFAULT_STALENESS_DAYS, Staleness, age_days, check_staleness, staleness_warning,
};
pub use terms::{QueryConfig, QueryTermSelector};

#[derive(Error, Debug)]
pub enum DblpError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("download error: {0}")]
    Download(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no offline DBLP database at {}", .0.display())]
    NotFound(PathBuf),
    #[error("{} is not an offline DBLP database", .0.display())]
    InvalidStore(PathBuf),
    #[error("metadata error: {0}")]
    Metadata(String),
    #[error("background task failed: {0}")]
    Task(String),
}

/// A publication record from the offline DBLP database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DblpRecord {
    pub title: String,
    /// Author display names in DBLP order.
    pub authors: Vec<String>,
    /// The publication's DBLP URI.
    pub url: String,
}

/// Query result with fuzzy match score.
#[derive(Debug, Clone)]
pub struct DblpQueryResult {
    pub record: DblpRecord,
    /// Similarity on a 0..=1 scale.
    pub score: f64,
}

/// Metadata recorded by the last build.
#[derive(Debug, Clone)]
pub struct DatabaseInfo {
    pub path: PathBuf,
    pub build_date: Option<String>,
    pub triple_count: Option<u64>,
    pub publication_count: Option<u64>,
    /// Rows actually present in the publications table.
    pub stored_records: u64,
}

/// Progress events emitted during database building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildProgress {
    Downloading {
        bytes_downloaded: u64,
        /// `None` when the server sends no content length.
        total_bytes: Option<u64>,
    },
    Parsing {
        lines_processed: u64,
        triples_parsed: u64,
        /// Distinct publications with a title so far.
        publications_found: u64,
        /// Raw (possibly compressed) bytes consumed from the dump file.
        bytes_read: u64,
        bytes_total: Option<u64>,
    },
    Writing {
        records_written: u64,
        records_total: u64,
    },
    RebuildingIndex,
    Complete {
        publications: u64,
        triples: u64,
    },
}

/// Open a store read-only. A missing file is reported instead of created.
pub(crate) fn open_read_only(path: &Path) -> Result<Connection, DblpError> {
    if !path.is_file() {
        return Err(DblpError::NotFound(path.to_path_buf()));
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok(conn)
}

/// Handle to an opened offline DBLP database.
pub struct DblpDatabase {
    conn: Connection,
    path: PathBuf,
    selector: QueryTermSelector,
    lookup_config: LookupConfig,
}

impl DblpDatabase {
    /// Open an existing offline DBLP database, read-only.
    ///
    /// Verifies that the schema tables exist.
    pub fn open(path: &Path) -> Result<Self, DblpError> {
        let conn = open_read_only(path)?;

        let has_schema = |conn: &Connection| -> Result<bool, DblpError> {
            Ok(db::table_exists(conn, "publications")? && db::table_exists(conn, "metadata")?)
        };
        if !has_schema(&conn).unwrap_or(false) {
            return Err(DblpError::InvalidStore(path.to_path_buf()));
        }

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            selector: QueryTermSelector::default(),
            lookup_config: LookupConfig::default(),
        })
    }

    pub fn with_selector(mut self, selector: QueryTermSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_lookup_config(mut self, config: LookupConfig) -> Self {
        self.lookup_config = config;
        self
    }

    /// Look up a free-text title, returning the first candidate whose fuzzy
    /// score reaches the threshold.
    pub fn lookup(&self, title: &str) -> Result<Option<DblpQueryResult>, DblpError> {
        self.lookup_with(title, &FuzzyComparator)
    }

    /// Look up with a custom comparator.
    pub fn lookup_with(
        &self,
        title: &str,
        comparator: &impl TitleComparator,
    ) -> Result<Option<DblpQueryResult>, DblpError> {
        query::lookup(
            &self.conn,
            title,
            &self.selector,
            comparator,
            &self.lookup_config,
        )
    }

    /// Records whose stored title is exactly `title`.
    pub fn find_exact(&self, title: &str) -> Result<Vec<DblpRecord>, DblpError> {
        query::find_exact(&self.conn, title)
    }

    /// The record for a DBLP publication URI.
    pub fn get(&self, uri: &str) -> Result<Option<DblpRecord>, DblpError> {
        Ok(db::get_publication(&self.conn, uri)?.map(query::into_record))
    }

    /// Get database metadata/info.
    pub fn info(&self) -> Result<DatabaseInfo, DblpError> {
        let meta = db::get_all_metadata(&self.conn)?;
        let count = |key: &str| meta.get(key).and_then(|v| v.parse().ok());
        Ok(DatabaseInfo {
            path: self.path.clone(),
            build_date: meta.get(db::KEY_BUILD_DATE).cloned(),
            triple_count: count(db::KEY_TRIPLE_COUNT),
            publication_count: count(db::KEY_PUBLICATION_COUNT),
            stored_records: db::count_publications(&self.conn)? as u64,
        })
    }

    /// Whole days since the store was built.
    pub fn age_days(&self) -> Result<u64, DblpError> {
        staleness::build_age_days(&self.conn, Utc::now())
    }

    /// Check if the database is older than `threshold_days`.
    pub fn staleness(&self, threshold_days: u64) -> Staleness {
        Staleness::classify(self.age_days(), threshold_days)
    }

    /// Get the path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Download the dump from `config.url` and build (or rebuild) the store at
/// `db_path`.
pub async fn build_database(
    db_path: &Path,
    config: &BuildConfig,
    progress: impl FnMut(BuildProgress),
) -> Result<BuildSummary, DblpError> {
    builder::build(db_path, config, progress).await
}

/// Build the store from a local dump, gzip-compressed or plain.
pub fn build_database_from_file(
    db_path: &Path,
    dump_path: &Path,
    config: &BuildConfig,
    progress: impl FnMut(BuildProgress),
) -> Result<BuildSummary, DblpError> {
    builder::build_from_file(db_path, dump_path, config, progress)
}

/// Build the store from an in-memory or already-open N-Triples stream.
pub fn build_database_from_reader<R: std::io::BufRead>(
    db_path: &Path,
    reader: R,
    config: &BuildConfig,
    progress: impl FnMut(BuildProgress),
) -> Result<BuildSummary, DblpError> {
    builder::build_from_reader(db_path, reader, config, progress)
}
