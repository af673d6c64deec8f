//! FTS5 query-term selection for noisy titles.
//!
//! FTS5 ANDs every term of a query, so a single term that never occurs in
//! the index turns the whole lookup into zero results. Titles coming out of
//! PDF extraction are full of such terms: hyphens dropped (`C-FLAT` becomes
//! `CFLAT`) or compounds fused (`Cross-Privilege` becomes `Crossprivilege`).
//! The selector drops tokens that look like those artifacts and keeps only
//! the few most distinctive remaining words.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// Letter groups joined by single hyphens, e.g. `control-flow`.
static HYPHENATED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z]+(?:-[a-zA-Z]+)+").unwrap());

/// Plain letter runs.
static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z]+").unwrap());

/// Common function words that carry no search value.
pub const DEFAULT_STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "that", "this", "have", "are", "was", "were", "been",
    "being", "has", "had", "does", "did", "will", "would", "could", "should", "may", "might",
    "must", "shall", "can", "not", "but", "its", "our", "their", "your", "into", "over", "under",
    "about", "between", "through", "during", "before", "after", "above", "below", "each",
    "every", "both", "few", "more", "most", "other", "some", "such", "only", "than", "too",
    "very",
];

/// Thresholds and weights for term selection.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Lowercase stop words.
    pub stop_words: HashSet<String>,
    /// Shorter tokens are dropped.
    pub min_word_length: usize,
    /// Longer tokens are assumed to be fused compounds and dropped.
    pub max_word_length: usize,
    /// All-caps tokens longer than this are assumed to be fused acronyms.
    pub max_acronym_length: usize,
    /// Number of terms in the final query.
    pub max_terms: usize,
    pub capitalized_bonus: f64,
    pub acronym_bonus: f64,
    /// Subtracted per position of the token in the title.
    pub position_penalty: f64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
            min_word_length: 3,
            max_word_length: 12,
            max_acronym_length: 4,
            max_terms: 4,
            capitalized_bonus: 10.0,
            acronym_bonus: 5.0,
            position_penalty: 0.5,
        }
    }
}

/// Turns a raw title into a boolean-AND FTS5 query.
#[derive(Debug, Clone, Default)]
pub struct QueryTermSelector {
    config: QueryConfig,
}

impl QueryTermSelector {
    pub fn new(config: QueryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Build the FTS5 MATCH expression for `title`, or `None` when no usable
    /// term survives filtering.
    pub fn select_terms(&self, title: &str) -> Option<String> {
        let words = self.candidate_terms(title);
        let top = self.top_terms(&words);
        if top.is_empty() {
            return None;
        }
        Some(
            top.iter()
                .map(|w| quote_fts5_term(w))
                .collect::<Vec<_>>()
                .join(" "),
        )
    }

    /// Every usable token of `title`, deduplicated case-insensitively.
    ///
    /// Parts of hyphenated runs (within the length bounds) come first, in
    /// title order, followed by the remaining plain words. A plain word that
    /// also appeared as a hyphen part is skipped. The index in the returned
    /// list is the position used for scoring.
    pub fn candidate_terms(&self, title: &str) -> Vec<String> {
        let cfg = &self.config;
        let part_len = cfg.min_word_length..=cfg.max_word_length;

        let mut pool: Vec<&str> = Vec::new();
        let mut split_words: HashSet<String> = HashSet::new();

        for m in HYPHENATED_RE.find_iter(title) {
            for part in m.as_str().split('-') {
                if part_len.contains(&part.len()) {
                    split_words.insert(part.to_ascii_lowercase());
                    pool.push(part);
                }
            }
        }

        pool.extend(
            WORD_RE
                .find_iter(title)
                .map(|m| m.as_str())
                .filter(|word| !split_words.contains(&word.to_ascii_lowercase())),
        );

        let mut seen = HashSet::new();
        let mut words = Vec::new();
        for word in pool {
            if self.is_excluded(word) {
                continue;
            }
            if seen.insert(word.to_ascii_lowercase()) {
                words.push(word.to_string());
            }
        }
        words
    }

    /// The `max_terms` highest-scoring words. A word's position is its index
    /// in `words`; ties keep their original order.
    pub fn top_terms(&self, words: &[String]) -> Vec<String> {
        let mut scored: Vec<(f64, &String)> = words
            .iter()
            .enumerate()
            .map(|(position, word)| (self.score(word, position), word))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored
            .into_iter()
            .take(self.config.max_terms)
            .map(|(_, word)| word.clone())
            .collect()
    }

    /// Distinctiveness of a word: its length, plus a bonus when capitalized
    /// and another for short acronyms, minus a penalty for later positions.
    pub fn score(&self, word: &str, position: usize) -> f64 {
        let cfg = &self.config;
        let len = word.chars().count();
        let mut score = len as f64;

        if word.chars().next().is_some_and(char::is_uppercase) {
            score += cfg.capitalized_bonus;
        }
        if is_all_caps(word) && (cfg.min_word_length..=cfg.max_acronym_length).contains(&len) {
            score += cfg.acronym_bonus;
        }

        score - position as f64 * cfg.position_penalty
    }

    fn is_excluded(&self, word: &str) -> bool {
        let cfg = &self.config;
        let len = word.chars().count();
        len < cfg.min_word_length
            || len > cfg.max_word_length
            || cfg.stop_words.contains(&word.to_lowercase())
            || (is_all_caps(word) && len > cfg.max_acronym_length)
    }
}

fn is_all_caps(word: &str) -> bool {
    !word.is_empty() && word.chars().all(char::is_uppercase)
}

/// Quote a term for FTS5 so it is never read as an operator; embedded
/// double quotes are doubled.
pub fn quote_fts5_term(word: &str) -> String {
    format!("\"{}\"", word.replace('"', "\"\""))
}
