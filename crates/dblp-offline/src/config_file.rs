use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::builder::BuildConfig;
use crate::query::LookupConfig;
use crate::terms::QueryConfig;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: Option<DatabaseSection>,
    pub build: Option<BuildSection>,
    pub lookup: Option<LookupSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub path: Option<String>,
    pub stale_after_days: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildSection {
    pub url: Option<String>,
    pub batch_size: Option<usize>,
    pub progress_interval: Option<u64>,
    pub keep_download: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupSection {
    pub threshold: Option<f64>,
    pub candidate_limit: Option<usize>,
    pub max_terms: Option<usize>,
    pub min_word_length: Option<usize>,
    pub max_word_length: Option<usize>,
    pub max_acronym_length: Option<usize>,
    /// Added to the built-in stop words, never replacing them.
    pub extra_stop_words: Option<Vec<String>>,
}

/// Platform config directory path: `<config_dir>/dblp-offline/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dblp-offline").join("config.toml"))
}

/// Default store location: `<data_dir>/dblp-offline/dblp.db`.
pub fn default_db_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("dblp-offline").join("dblp.db"))
}

/// Load config by cascading CWD `.dblp-offline.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".dblp-offline.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config");
            None
        }
    }
}

/// Take `field` from `overlay` when set, otherwise from `base`.
macro_rules! pick {
    ($base:expr, $overlay:expr, $field:ident) => {
        $overlay
            .as_ref()
            .and_then(|s| s.$field.clone())
            .or_else(|| $base.as_ref().and_then(|s| s.$field.clone()))
    };
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        database: Some(DatabaseSection {
            path: pick!(base.database, overlay.database, path),
            stale_after_days: pick!(base.database, overlay.database, stale_after_days),
        }),
        build: Some(BuildSection {
            url: pick!(base.build, overlay.build, url),
            batch_size: pick!(base.build, overlay.build, batch_size),
            progress_interval: pick!(base.build, overlay.build, progress_interval),
            keep_download: pick!(base.build, overlay.build, keep_download),
        }),
        lookup: Some(LookupSection {
            threshold: pick!(base.lookup, overlay.lookup, threshold),
            candidate_limit: pick!(base.lookup, overlay.lookup, candidate_limit),
            max_terms: pick!(base.lookup, overlay.lookup, max_terms),
            min_word_length: pick!(base.lookup, overlay.lookup, min_word_length),
            max_word_length: pick!(base.lookup, overlay.lookup, max_word_length),
            max_acronym_length: pick!(base.lookup, overlay.lookup, max_acronym_length),
            extra_stop_words: pick!(base.lookup, overlay.lookup, extra_stop_words),
        }),
    }
}

impl ConfigFile {
    /// Store path from the config file, if any.
    pub fn db_path(&self) -> Option<PathBuf> {
        self.database
            .as_ref()
            .and_then(|d| d.path.as_deref())
            .map(PathBuf::from)
    }

    pub fn stale_after_days(&self) -> u64 {
        self.database
            .as_ref()
            .and_then(|d| d.stale_after_days)
            .unwrap_or(crate::DEFAULT_STALENESS_DAYS)
    }

    /// Defaults overridden by whatever the `[build]` table sets.
    pub fn build_config(&self) -> BuildConfig {
        let mut config = BuildConfig::default();
        if let Some(build) = &self.build {
            if let Some(url) = &build.url {
                config.url = url.clone();
            }
            if let Some(batch_size) = build.batch_size {
                config.batch_size = batch_size;
            }
            if let Some(interval) = build.progress_interval {
                config.progress_interval = interval;
            }
            config.keep_download = build.keep_download.as_deref().map(PathBuf::from);
        }
        config
    }

    /// Defaults overridden by whatever the `[lookup]` table sets.
    pub fn query_config(&self) -> QueryConfig {
        let mut config = QueryConfig::default();
        let Some(lookup) = &self.lookup else {
            return config;
        };
        if let Some(n) = lookup.max_terms {
            config.max_terms = n;
        }
        if let Some(n) = lookup.min_word_length {
            config.min_word_length = n;
        }
        if let Some(n) = lookup.max_word_length {
            config.max_word_length = n;
        }
        if let Some(n) = lookup.max_acronym_length {
            config.max_acronym_length = n;
        }
        for word in lookup.extra_stop_words.iter().flatten() {
            config.stop_words.insert(word.to_lowercase());
        }
        config
    }

    pub fn lookup_config(&self) -> LookupConfig {
        let mut config = LookupConfig::default();
        if let Some(lookup) = &self.lookup {
            if let Some(threshold) = lookup.threshold {
                config.threshold = threshold;
            }
            if let Some(limit) = lookup.candidate_limit {
                config.candidate_limit = limit;
            }
        }
        config
    }
}
