//! Age of a built store and whether it is due for a rebuild.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::{DblpError, db};

/// Stores older than this many days are reported as stale.
pub const DEFAULT_STALENESS_DAYS: u64 = 30;

const SECONDS_PER_DAY: i64 = 86_400;

/// Outcome of a staleness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    Fresh { age_days: u64 },
    Stale { age_days: u64 },
    /// The age could not be determined: missing store, missing or
    /// unparseable build date, unreadable file.
    Unknown { reason: String },
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        matches!(self, Staleness::Stale { .. })
    }

    pub fn age_days(&self) -> Option<u64> {
        match self {
            Staleness::Fresh { age_days } | Staleness::Stale { age_days } => Some(*age_days),
            Staleness::Unknown { .. } => None,
        }
    }

    /// Human-readable warning, only for a stale store.
    pub fn warning(&self, db_path: &Path) -> Option<String> {
        match self {
            Staleness::Stale { age_days } => Some(format!(
                "Offline DBLP database at {} is {} days old. Run `dblp-offline update` to refresh it.",
                db_path.display(),
                age_days
            )),
            _ => None,
        }
    }

    pub(crate) fn classify(age: Result<u64, DblpError>, threshold_days: u64) -> Self {
        match age {
            Ok(age_days) if age_days > threshold_days => Staleness::Stale { age_days },
            Ok(age_days) => Staleness::Fresh { age_days },
            Err(e) => Staleness::Unknown {
                reason: e.to_string(),
            },
        }
    }
}

/// Parse a stored build date: RFC 3339, or integer unix seconds as written
/// by older builds.
pub fn parse_build_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    value
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// Whole days between `build_date` and `now`, rounded down. A build date in
/// the future counts as zero days old.
pub fn whole_days_between(build_date: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let secs = (now - build_date).num_seconds();
    if secs <= 0 {
        0
    } else {
        (secs / SECONDS_PER_DAY) as u64
    }
}

/// Age in days of the store behind an open connection.
pub fn build_age_days(conn: &Connection, now: DateTime<Utc>) -> Result<u64, DblpError> {
    let raw = db::get_metadata(conn, db::KEY_BUILD_DATE)?
        .ok_or_else(|| DblpError::Metadata("build date not recorded".into()))?;
    let build_date = parse_build_date(&raw)
        .ok_or_else(|| DblpError::Metadata(format!("unparseable build date: {raw}")))?;
    Ok(whole_days_between(build_date, now))
}

/// Age in days of the store at `db_path`.
pub fn age_days(db_path: &Path) -> Result<u64, DblpError> {
    age_days_at(db_path, Utc::now())
}

pub fn age_days_at(db_path: &Path, now: DateTime<Utc>) -> Result<u64, DblpError> {
    let conn = crate::open_read_only(db_path)?;
    build_age_days(&conn, now)
}

/// Classify the store at `db_path` against `threshold_days`. Stale means
/// strictly older than the threshold.
pub fn check_staleness(db_path: &Path, threshold_days: u64) -> Staleness {
    check_staleness_at(db_path, threshold_days, Utc::now())
}

pub fn check_staleness_at(db_path: &Path, threshold_days: u64, now: DateTime<Utc>) -> Staleness {
    Staleness::classify(age_days_at(db_path, now), threshold_days)
}

/// Warning for a store older than [`DEFAULT_STALENESS_DAYS`]; `None` when it
/// is fresh or its age cannot be determined.
pub fn staleness_warning(db_path: &Path) -> Option<String> {
    let staleness = check_staleness(db_path, DEFAULT_STALENESS_DAYS);
    if let Staleness::Unknown { reason } = &staleness {
        tracing::debug!(path = %db_path.display(), reason = %reason, "store age unknown");
    }
    staleness.warning(db_path)
}
