//! FTS5 search and fuzzy confirmation for offline title lookups.

use rusqlite::Connection;
use unicode_normalization::UnicodeNormalization;

use crate::db;
use crate::terms::QueryTermSelector;
use crate::{DblpError, DblpQueryResult, DblpRecord};

/// Default similarity threshold for fuzzy title matching, on a 0..=1 scale.
pub const DEFAULT_THRESHOLD: f64 = 0.95;

/// Maximum number of full-text candidates considered per lookup.
pub const DEFAULT_CANDIDATE_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LookupConfig {
    pub threshold: f64,
    pub candidate_limit: usize,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
        }
    }
}

/// Decides whether a full-text candidate really is the queried title.
///
/// `similarity` receives raw titles and returns a score in `0.0..=1.0`.
pub trait TitleComparator {
    fn similarity(&self, query: &str, candidate: &str) -> f64;
}

/// Normalized-title comparison with an edit-distance ratio.
///
/// Both titles are decomposed (NFKD), reduced to ASCII letters and digits
/// and lowercased before comparison, so case, punctuation, whitespace and
/// diacritics never affect the score. A title that normalizes to nothing
/// scores zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct FuzzyComparator;

impl FuzzyComparator {
    pub fn normalize(title: &str) -> String {
        title
            .nfkd()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect()
    }
}

impl TitleComparator for FuzzyComparator {
    fn similarity(&self, query: &str, candidate: &str) -> f64 {
        let a = Self::normalize(query);
        let b = Self::normalize(candidate);
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        rapidfuzz::fuzz::ratio(a.chars(), b.chars())
    }
}

/// Look up a free-text title.
///
/// The selector turns the title into an FTS5 query, at most
/// `candidate_limit` rows come back in index order, and the first one the
/// comparator scores at or above the threshold wins. Later candidates are
/// never compared, even if one of them would score higher.
pub fn lookup(
    conn: &Connection,
    title: &str,
    selector: &QueryTermSelector,
    comparator: &impl TitleComparator,
    config: &LookupConfig,
) -> Result<Option<DblpQueryResult>, DblpError> {
    let Some(fts_query) = selector.select_terms(title) else {
        tracing::debug!(title, "no usable query terms");
        return Ok(None);
    };

    let candidates = db::search_titles(conn, &fts_query, config.candidate_limit)?;
    tracing::debug!(query = %fts_query, candidates = candidates.len(), "fts search");

    for candidate in candidates {
        let score = comparator.similarity(title, &candidate.title);
        if score >= config.threshold {
            return Ok(Some(DblpQueryResult {
                record: into_record(candidate),
                score,
            }));
        }
    }

    Ok(None)
}

/// Rows whose stored title equals `title` byte for byte.
pub fn find_exact(conn: &Connection, title: &str) -> Result<Vec<DblpRecord>, DblpError> {
    Ok(db::find_by_title(conn, title)?
        .into_iter()
        .map(into_record)
        .collect())
}

pub(crate) fn into_record(row: db::PublicationRow) -> DblpRecord {
    DblpRecord {
        title: row.title,
        authors: split_authors(&row.authors),
        url: row.url,
    }
}

/// Split a stored author string back into names.
pub fn split_authors(joined: &str) -> Vec<String> {
    joined
        .split(';')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

/// Strip DBLP's homonym disambiguation suffix from an author name.
///
/// DBLP appends a space and a 4-digit number to tell apart authors sharing
/// a name (`"Wei Wang 0001"`). Only an exact 4-digit suffix is removed.
pub fn strip_disambiguation_suffix(name: &str) -> &str {
    match name.rsplit_once(' ') {
        Some((base, suffix))
            if !base.is_empty()
                && suffix.len() == 4
                && suffix.bytes().all(|b| b.is_ascii_digit()) =>
        {
            base
        }
        _ => name,
    }
}
