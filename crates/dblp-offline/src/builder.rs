//! Download and build pipeline for the offline DBLP index.
//!
//! The dump is streamed once through the ingester, the three relations are
//! joined in memory, and a brand-new SQLite file is written next to the
//! destination. The file only replaces the destination (atomic rename) after
//! the metadata rows, the last write of a build, are in place.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::Utc;
use futures_util::StreamExt;
use rusqlite::Connection;

use crate::db::{self, PublicationRow};
use crate::ingest::{self, Accumulators, DumpIngester, IngestStats, Predicates};
use crate::{BuildProgress, DblpError};

/// Default DBLP RDF dump URL (several GB compressed).
pub const DEFAULT_DBLP_URL: &str = "https://dblp.org/rdf/dblp.nt.gz";

/// Rows per insert transaction.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Lines between parsing progress reports.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1_000_000;

/// Separator between resolved author names in the stored `authors` column.
pub const AUTHOR_SEPARATOR: &str = "; ";

/// Knobs for a build. `Default` targets the public DBLP dump.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub url: String,
    pub predicates: Predicates,
    pub batch_size: usize,
    pub progress_interval: u64,
    /// Keep the downloaded dump at this path instead of a temp directory.
    pub keep_download: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DBLP_URL.to_string(),
            predicates: Predicates::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            keep_download: None,
        }
    }
}

/// Counts recorded in the metadata of a finished build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSummary {
    pub triples: u64,
    pub publications: u64,
}

/// Materializes [`Accumulators`] into a persisted store.
pub struct IndexBuilder {
    batch_size: usize,
}

impl IndexBuilder {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Build a fresh store at `db_path`, replacing any existing one.
    ///
    /// Everything is written to a temporary file in the same directory and
    /// renamed over `db_path` only on success. On error the temporary file
    /// is removed and the previous store is left as it was.
    pub fn build(
        &self,
        db_path: &Path,
        acc: Accumulators,
        progress: &mut impl FnMut(BuildProgress),
    ) -> Result<BuildSummary, DblpError> {
        let db_dir = parent_dir(db_path);
        std::fs::create_dir_all(db_dir)?;

        let tmp = tempfile::Builder::new()
            .prefix(".dblp-build-")
            .suffix(".db")
            .tempfile_in(db_dir)?;

        let conn = Connection::open(tmp.path())?;
        db::begin_bulk_load(&conn)?;
        db::init_database(&conn)?;
        let summary = self.write(&conn, acc, progress)?;
        conn.close().map_err(|(_, e)| DblpError::Database(e))?;

        tmp.as_file().sync_all()?;
        remove_sidecars(db_path);
        tmp.persist(db_path).map_err(|e| DblpError::Io(e.error))?;

        tracing::info!(
            path = %db_path.display(),
            publications = summary.publications,
            triples = summary.triples,
            "store published"
        );
        Ok(summary)
    }

    /// Write records, both indexes and the metadata into an initialized
    /// connection.
    ///
    /// Records are written in URI order so identical input yields identical
    /// rowids, and therefore identical full-text ranking order.
    pub fn write(
        &self,
        conn: &Connection,
        acc: Accumulators,
        progress: &mut impl FnMut(BuildProgress),
    ) -> Result<BuildSummary, DblpError> {
        let Accumulators {
            titles,
            authors,
            names,
            triple_count,
            ..
        } = acc;

        let mut titles: Vec<(String, String)> = titles.into_iter().collect();
        titles.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        let records_total = titles.len() as u64;

        let mut batch = Vec::with_capacity(self.batch_size.min(titles.len()));
        let mut records_written: u64 = 0;

        for (uri, title) in titles {
            let joined = join_author_names(authors.get(&uri).map(Vec::as_slice), &names);
            batch.push(PublicationRow {
                url: uri.clone(),
                uri,
                title,
                authors: joined,
            });

            if batch.len() >= self.batch_size {
                db::insert_publications(conn, &batch)?;
                records_written += batch.len() as u64;
                batch.clear();
                progress(BuildProgress::Writing {
                    records_written,
                    records_total,
                });
            }
        }

        if !batch.is_empty() {
            db::insert_publications(conn, &batch)?;
            records_written += batch.len() as u64;
        }
        progress(BuildProgress::Writing {
            records_written,
            records_total,
        });
        tracing::info!(records = records_written, "publications written");

        progress(BuildProgress::RebuildingIndex);
        db::rebuild_fts_index(conn)?;
        db::create_title_index(conn)?;
        tracing::info!("search indexes built");

        db::replace_metadata(
            conn,
            &[
                (db::KEY_BUILD_DATE, Utc::now().to_rfc3339()),
                (db::KEY_TRIPLE_COUNT, triple_count.to_string()),
                (db::KEY_PUBLICATION_COUNT, records_total.to_string()),
            ],
        )?;

        Ok(BuildSummary {
            triples: triple_count,
            publications: records_total,
        })
    }
}

/// Resolve author URIs to names and join them. Unresolved (or empty) names
/// are dropped; order and duplicates are preserved.
fn join_author_names(author_uris: Option<&[String]>, names: &HashMap<String, String>) -> String {
    author_uris
        .unwrap_or_default()
        .iter()
        .filter_map(|uri| names.get(uri))
        .filter(|name| !name.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(AUTHOR_SEPARATOR)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// Remove journal files left behind by an older store at `db_path`; they
/// would otherwise be replayed against the new file.
fn remove_sidecars(db_path: &Path) {
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut name = OsString::from(db_path.as_os_str());
        name.push(suffix);
        let sidecar = PathBuf::from(name);
        if sidecar.exists()
            && let Err(e) = std::fs::remove_file(&sidecar)
        {
            tracing::warn!(path = %sidecar.display(), error = %e, "could not remove stale sidecar");
        }
    }
}

fn parsing_event(stats: IngestStats, bytes_read: u64, bytes_total: Option<u64>) -> BuildProgress {
    BuildProgress::Parsing {
        lines_processed: stats.lines_processed,
        triples_parsed: stats.triples_parsed,
        publications_found: stats.publications_found,
        bytes_read,
        bytes_total,
    }
}

/// Build the store from an already-open line reader.
pub fn build_from_reader<R: BufRead>(
    db_path: &Path,
    reader: R,
    config: &BuildConfig,
    mut progress: impl FnMut(BuildProgress),
) -> Result<BuildSummary, DblpError> {
    let ingester = DumpIngester::new(&config.predicates, config.progress_interval);
    let acc = ingester.ingest(reader, |stats| progress(parsing_event(stats, 0, None)))?;
    finish(db_path, acc, config, &mut progress)
}

/// Build the store from a local dump file, gzip-compressed or plain.
pub fn build_from_file(
    db_path: &Path,
    dump_path: &Path,
    config: &BuildConfig,
    mut progress: impl FnMut(BuildProgress),
) -> Result<BuildSummary, DblpError> {
    let source = ingest::open_dump(dump_path)?;
    let bytes_read = Rc::clone(&source.bytes_read);
    let bytes_total = source.total_bytes;
    tracing::info!(
        path = %dump_path.display(),
        compressed = source.compressed,
        "ingesting dump"
    );

    progress(parsing_event(IngestStats::default(), 0, bytes_total));

    let ingester = DumpIngester::new(&config.predicates, config.progress_interval);
    let acc = ingester.ingest(source.reader, |stats| {
        progress(parsing_event(stats, bytes_read.get(), bytes_total))
    })?;
    finish(db_path, acc, config, &mut progress)
}

fn finish(
    db_path: &Path,
    acc: Accumulators,
    config: &BuildConfig,
    progress: &mut impl FnMut(BuildProgress),
) -> Result<BuildSummary, DblpError> {
    let summary = IndexBuilder::new(config.batch_size).build(db_path, acc, progress)?;
    progress(BuildProgress::Complete {
        publications: summary.publications,
        triples: summary.triples,
    });
    Ok(summary)
}

/// Download the dump and build the store.
///
/// Phase 1 streams the HTTP body to disk with progress reporting (the total
/// is unknown when the server sends no content-length). Phase 2 runs the
/// blocking ingest and build on a worker thread and forwards its progress.
pub async fn build(
    db_path: &Path,
    config: &BuildConfig,
    mut progress: impl FnMut(BuildProgress),
) -> Result<BuildSummary, DblpError> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("dblp-offline/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| DblpError::Download(e.to_string()))?;

    let response = client
        .get(&config.url)
        .send()
        .await
        .map_err(|e| DblpError::Download(e.to_string()))?;

    if !response.status().is_success() {
        return Err(DblpError::Download(format!(
            "HTTP error: {}",
            response.status()
        )));
    }

    let total_bytes = response.content_length();
    let db_dir = parent_dir(db_path);
    std::fs::create_dir_all(db_dir)?;

    let (dump_path, tmp_dir) = match &config.keep_download {
        Some(path) => (path.clone(), None),
        None => {
            let tmp_dir = tempfile::TempDir::new_in(db_dir)?;
            (tmp_dir.path().join("dblp.nt.gz"), Some(tmp_dir))
        }
    };
    tracing::info!(url = %config.url, to = %dump_path.display(), "downloading dump");

    progress(BuildProgress::Downloading {
        bytes_downloaded: 0,
        total_bytes,
    });

    {
        let mut out = File::create(&dump_path)?;
        let mut stream = response.bytes_stream();
        let mut bytes_downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DblpError::Download(e.to_string()))?;
            out.write_all(&chunk)?;
            bytes_downloaded += chunk.len() as u64;

            progress(BuildProgress::Downloading {
                bytes_downloaded,
                total_bytes,
            });
        }
        out.flush()?;
    }

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel::<BuildProgress>(64);
    let db_path = db_path.to_path_buf();
    let config = config.clone();

    let build_handle = tokio::task::spawn_blocking(move || {
        let _tmp_dir = tmp_dir; // keep the temp directory alive until the build is done
        build_from_file(&db_path, &dump_path, &config, |evt| {
            let _ = progress_tx.blocking_send(evt);
        })
    });

    while let Some(evt) = progress_rx.recv().await {
        progress(evt);
    }

    build_handle
        .await
        .map_err(|e| DblpError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"<https://dblp.org/rec/conf/test/Paper1> <https://dblp.org/rdf/schema#title> "Test Paper One" .
<https://dblp.org/rec/conf/test/Paper2> <https://dblp.org/rdf/schema#title> "Another Test Paper" .
<https://dblp.org/rec/conf/test/Paper3> <https://dblp.org/rdf/schema#title> "Lonely Paper Without Authors" .
<https://dblp.org/pid/00/1> <https://dblp.org/rdf/schema#primaryCreatorName> "Alice Smith" .
<https://dblp.org/pid/00/2> <https://dblp.org/rdf/schema#primaryCreatorName> "Bob Jones" .
<https://dblp.org/rec/conf/test/Paper1> <https://dblp.org/rdf/schema#authoredBy> <https://dblp.org/pid/00/2> .
<https://dblp.org/rec/conf/test/Paper1> <https://dblp.org/rdf/schema#authoredBy> <https://dblp.org/pid/00/1> .
<https://dblp.org/rec/conf/test/Paper2> <https://dblp.org/rdf/schema#authoredBy> <https://dblp.org/pid/99/9> .
<https://dblp.org/rec/conf/test/Paper2> <https://dblp.org/rdf/schema#authoredBy> <https://dblp.org/pid/00/1> .
<https://dblp.org/rec/conf/test/NoTitle> <https://dblp.org/rdf/schema#authoredBy> <https://dblp.org/pid/00/1> .
# This is a comment
"#;

    fn ingest(data: &str) -> Accumulators {
        let predicates = Predicates::default();
        DumpIngester::new(&predicates, 100)
            .ingest(data.as_bytes(), |_| {})
            .unwrap()
    }

    fn write_in_memory(data: &str, batch_size: usize) -> (Connection, BuildSummary) {
        let conn = Connection::open_in_memory().unwrap();
        db::init_database(&conn).unwrap();
        let summary = IndexBuilder::new(batch_size)
            .write(&conn, ingest(data), &mut |_| {})
            .unwrap();
        (conn, summary)
    }

    #[test]
    fn test_join_author_names() {
        let names: HashMap<String, String> = [
            ("a".to_string(), "Alice".to_string()),
            ("b".to_string(), "Bob".to_string()),
            ("e".to_string(), String::new()),
        ]
        .into_iter()
        .collect();
        let uris: Vec<String> = ["b", "x", "a", "e", "b"].map(String::from).to_vec();
        assert_eq!(
            join_author_names(Some(uris.as_slice()), &names),
            "Bob; Alice; Bob"
        );
        assert_eq!(join_author_names(None, &names), "");
    }

    #[test]
    fn test_write_resolves_authors() {
        let (conn, summary) = write_in_memory(DUMP, 2);
        assert_eq!(summary.publications, 3);
        assert_eq!(summary.triples, 10);

        let paper1 = db::get_publication(&conn, "https://dblp.org/rec/conf/test/Paper1")
            .unwrap()
            .unwrap();
        assert_eq!(paper1.authors, "Bob Jones; Alice Smith");
        assert_eq!(paper1.url, paper1.uri);

        // Unresolvable author dropped, record kept.
        let paper2 = db::get_publication(&conn, "https://dblp.org/rec/conf/test/Paper2")
            .unwrap()
            .unwrap();
        assert_eq!(paper2.authors, "Alice Smith");

        // No authoredBy triple at all.
        let paper3 = db::get_publication(&conn, "https://dblp.org/rec/conf/test/Paper3")
            .unwrap()
            .unwrap();
        assert_eq!(paper3.authors, "");

        // Authors without a title never become records.
        assert!(
            db::get_publication(&conn, "https://dblp.org/rec/conf/test/NoTitle")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_write_metadata_and_indexes() {
        let (conn, _) = write_in_memory(DUMP, 10_000);
        let meta = db::get_all_metadata(&conn).unwrap();
        assert_eq!(meta.len(), 3);
        assert_eq!(meta[db::KEY_TRIPLE_COUNT], "10");
        assert_eq!(meta[db::KEY_PUBLICATION_COUNT], "3");
        assert!(chrono::DateTime::parse_from_rfc3339(&meta[db::KEY_BUILD_DATE]).is_ok());

        assert_eq!(db::search_titles(&conn, "\"paper\"", 20).unwrap().len(), 3);
        assert_eq!(db::find_by_title(&conn, "Another Test Paper").unwrap().len(), 1);
    }

    #[test]
    fn test_batch_size_does_not_change_content() {
        let (small, _) = write_in_memory(DUMP, 1);
        let (large, _) = write_in_memory(DUMP, 10_000);
        let dump = |conn: &Connection| {
            let mut stmt = conn
                .prepare("SELECT id, uri, title, authors, url FROM publications ORDER BY id")
                .unwrap();
            stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
        };
        assert_eq!(dump(&small), dump(&large));
    }

    #[test]
    fn test_build_from_gz_file() {
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(DUMP.as_bytes()).unwrap();
        let gz_data = encoder.finish().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let nt_gz_path = dir.path().join("test.nt.gz");
        let db_path = dir.path().join("test.db");
        std::fs::write(&nt_gz_path, &gz_data).unwrap();

        let mut progress_events = Vec::new();
        let summary = build_from_file(&db_path, &nt_gz_path, &BuildConfig::default(), |evt| {
            progress_events.push(evt);
        })
        .unwrap();
        assert_eq!(summary.publications, 3);

        let conn = Connection::open(&db_path).unwrap();
        assert_eq!(db::count_publications(&conn).unwrap(), 3);
        assert!(matches!(
            progress_events.last(),
            Some(BuildProgress::Complete {
                publications: 3,
                triples: 10
            })
        ));
        assert!(
            progress_events
                .iter()
                .any(|e| matches!(e, BuildProgress::RebuildingIndex))
        );

        // Only the dump and the published store remain in the directory.
        let mut entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        entries.sort();
        assert_eq!(entries, vec!["test.db", "test.nt.gz"]);
    }

    #[test]
    fn test_rebuild_replaces_existing_store() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("dblp.db");
        let config = BuildConfig::default();

        build_from_reader(&db_path, DUMP.as_bytes(), &config, |_| {}).unwrap();
        let smaller = r#"<https://dblp.org/rec/x> <https://dblp.org/rdf/schema#title> "Only One" .
"#;
        build_from_reader(&db_path, smaller.as_bytes(), &config, |_| {}).unwrap();

        let conn = Connection::open(&db_path).unwrap();
        assert_eq!(db::count_publications(&conn).unwrap(), 1);
        assert_eq!(
            db::get_metadata(&conn, db::KEY_PUBLICATION_COUNT)
                .unwrap()
                .as_deref(),
            Some("1")
        );
    }

    #[test]
    fn test_truncated_dump_aborts_and_keeps_previous_store() {
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("dblp.db");
        let config = BuildConfig::default();
        build_from_reader(&db_path, DUMP.as_bytes(), &config, |_| {}).unwrap();
        let before = {
            let conn = Connection::open(&db_path).unwrap();
            db::get_all_metadata(&conn).unwrap()
        };

        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(DUMP.repeat(200).as_bytes()).unwrap();
        let gz_data = encoder.finish().unwrap();
        let dump_path = dir.path().join("truncated.nt.gz");
        std::fs::write(&dump_path, &gz_data[..gz_data.len() / 2]).unwrap();

        let result = build_from_file(&db_path, &dump_path, &config, |_| {});
        assert!(matches!(result, Err(DblpError::Io(_))));

        let conn = Connection::open(&db_path).unwrap();
        assert_eq!(db::count_publications(&conn).unwrap(), 3);
        assert_eq!(db::get_all_metadata(&conn).unwrap(), before);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|name| name.starts_with(".dblp-build-"))
            .collect();
        assert!(leftovers.is_empty(), "temporary build files left: {leftovers:?}");
    }

    #[test]
    fn test_failed_build_leaves_previous_store() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("dblp.db");
        let config = BuildConfig::default();
        build_from_reader(&db_path, DUMP.as_bytes(), &config, |_| {}).unwrap();

        let missing = dir.path().join("does-not-exist.nt.gz");
        assert!(build_from_file(&db_path, &missing, &config, |_| {}).is_err());

        let conn = Connection::open(&db_path).unwrap();
        assert_eq!(db::count_publications(&conn).unwrap(), 3);
    }
}
