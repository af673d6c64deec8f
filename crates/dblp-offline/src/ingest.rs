//! Streaming ingestion of the N-Triples dump.
//!
//! One forward pass routes every triple whose predicate is on the allow-list
//! into one of three in-memory maps. Peak memory is proportional to the
//! number of distinct publications and authors, not to the dump size.

use std::cell::Cell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::rc::Rc;

use flate2::read::MultiGzDecoder;

use crate::DblpError;
use crate::parser::{self, Triple};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const READ_BUFFER: usize = 1024 * 1024;

/// The predicate allow-list. Triples with any other predicate are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicates {
    /// Publication → title literal.
    pub title: String,
    /// Publication → author URI, one triple per author, in author order.
    pub authored_by: String,
    /// Author → display name literal.
    pub creator_name: String,
}

impl Default for Predicates {
    fn default() -> Self {
        Self {
            title: parser::TITLE.to_string(),
            authored_by: parser::AUTHORED_BY.to_string(),
            creator_name: parser::PRIMARY_CREATOR_NAME.to_string(),
        }
    }
}

/// The three relations collected during ingestion.
#[derive(Debug, Default)]
pub struct Accumulators {
    /// Publication URI → title. Later triples overwrite earlier ones.
    pub titles: HashMap<String, String>,
    /// Publication URI → author URIs in dump order, duplicates kept.
    pub authors: HashMap<String, Vec<String>>,
    /// Author URI → name. Later triples overwrite earlier ones.
    pub names: HashMap<String, String>,
    /// Every successfully parsed triple, whatever its predicate.
    pub triple_count: u64,
    pub lines_processed: u64,
}

impl Accumulators {
    pub fn stats(&self) -> IngestStats {
        IngestStats {
            lines_processed: self.lines_processed,
            triples_parsed: self.triple_count,
            publications_found: self.titles.len() as u64,
        }
    }
}

/// Counters reported to the progress sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub lines_processed: u64,
    pub triples_parsed: u64,
    pub publications_found: u64,
}

/// Routes a triple stream into [`Accumulators`].
pub struct DumpIngester<'a> {
    predicates: &'a Predicates,
    progress_interval: u64,
}

impl<'a> DumpIngester<'a> {
    /// `progress_interval` is the number of lines between progress reports.
    pub fn new(predicates: &'a Predicates, progress_interval: u64) -> Self {
        Self {
            predicates,
            progress_interval: progress_interval.max(1),
        }
    }

    /// Scan `reader` to the end.
    ///
    /// Malformed lines are skipped. Invalid UTF-8 is replaced rather than
    /// rejected. Any read or decompression error aborts the scan.
    pub fn ingest<R: BufRead>(
        &self,
        mut reader: R,
        mut progress: impl FnMut(IngestStats),
    ) -> Result<Accumulators, DblpError> {
        let mut acc = Accumulators::default();
        let mut buf = Vec::with_capacity(4096);

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            acc.lines_processed += 1;

            let line = String::from_utf8_lossy(&buf);
            if let Some(triple) = parser::parse_line(&line) {
                acc.triple_count += 1;
                self.route(&mut acc, triple);
            }

            if acc.lines_processed % self.progress_interval == 0 {
                progress(acc.stats());
            }
        }

        progress(acc.stats());
        tracing::info!(
            lines = acc.lines_processed,
            triples = acc.triple_count,
            publications = acc.titles.len(),
            authors = acc.names.len(),
            "dump ingested"
        );
        Ok(acc)
    }

    /// Titles and names must be literals and authors must be URIs; a triple
    /// with the wrong object kind is dropped.
    fn route(&self, acc: &mut Accumulators, triple: Triple<'_>) {
        let predicates = self.predicates;
        let is_uri = triple.object.is_uri();
        if triple.predicate == predicates.title {
            if !is_uri {
                acc.titles
                    .insert(triple.subject.to_string(), triple.object.into_string());
            }
        } else if triple.predicate == predicates.authored_by {
            if !is_uri {
                return;
            }
            let author = triple.object.into_string();
            match acc.authors.get_mut(triple.subject) {
                Some(list) => list.push(author),
                None => {
                    acc.authors.insert(triple.subject.to_string(), vec![author]);
                }
            }
        } else if triple.predicate == predicates.creator_name && !is_uri {
            acc.names
                .insert(triple.subject.to_string(), triple.object.into_string());
        }
    }
}

/// Wrapper around a `Read` that tracks how many bytes have been consumed.
struct CountingReader<R> {
    inner: R,
    bytes_read: Rc<Cell<u64>>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes_read.set(self.bytes_read.get() + n as u64);
        Ok(n)
    }
}

/// An opened dump file, decompressed on the fly when it is gzip-framed.
pub struct DumpSource {
    pub reader: Box<dyn BufRead>,
    /// Raw (possibly compressed) bytes consumed so far.
    pub bytes_read: Rc<Cell<u64>>,
    pub total_bytes: Option<u64>,
    pub compressed: bool,
}

/// Open a dump, detecting gzip by its magic bytes rather than the extension.
pub fn open_dump(path: &Path) -> Result<DumpSource, DblpError> {
    let file = File::open(path)?;
    let total_bytes = file.metadata().map(|m| m.len()).ok();
    let bytes_read = Rc::new(Cell::new(0u64));

    let mut raw = BufReader::with_capacity(
        READ_BUFFER,
        CountingReader {
            inner: file,
            bytes_read: Rc::clone(&bytes_read),
        },
    );
    let compressed = raw.fill_buf()?.starts_with(&GZIP_MAGIC);

    let reader: Box<dyn BufRead> = if compressed {
        Box::new(BufReader::with_capacity(
            READ_BUFFER,
            MultiGzDecoder::new(raw),
        ))
    } else {
        Box::new(raw)
    };

    Ok(DumpSource {
        reader,
        bytes_read,
        total_bytes,
        compressed,
    })
}
