use std::io::Write;
use std::path::Path;

use dblp_offline::{DatabaseInfo, DblpQueryResult, Staleness, strip_disambiguation_suffix};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Print a matched record.
pub fn print_result(
    w: &mut dyn Write,
    result: &DblpQueryResult,
    color: ColorMode,
) -> std::io::Result<()> {
    let record = &result.record;
    let authors = record
        .authors
        .iter()
        .map(|a| strip_disambiguation_suffix(a))
        .collect::<Vec<_>>()
        .join(", ");

    if color.enabled() {
        writeln!(w, "{}", record.title.bold())?;
    } else {
        writeln!(w, "{}", record.title)?;
    }
    if authors.is_empty() {
        writeln!(w, "  Authors: (none listed)")?;
    } else {
        writeln!(w, "  Authors: {}", authors)?;
    }
    writeln!(w, "  URL:     {}", record.url)?;
    writeln!(w, "  Score:   {:.1}%", result.score * 100.0)?;
    Ok(())
}

pub fn print_not_found(w: &mut dyn Write, title: &str, color: ColorMode) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "{} {}", "Not found:".red().bold(), title)
    } else {
        writeln!(w, "Not found: {}", title)
    }
}

/// Warn about a stale store, or note that its age is unknown. Silent when
/// the store is fresh.
pub fn print_staleness(
    w: &mut dyn Write,
    staleness: &Staleness,
    db_path: &Path,
    color: ColorMode,
) -> std::io::Result<()> {
    if let Some(msg) = staleness.warning(db_path) {
        if color.enabled() {
            writeln!(w, "{}", msg.yellow())?;
        } else {
            writeln!(w, "{}", msg)?;
        }
    } else if let Staleness::Unknown { reason } = staleness {
        let msg = format!("Could not determine database age: {}", reason);
        if color.enabled() {
            writeln!(w, "{}", msg.dimmed())?;
        } else {
            writeln!(w, "{}", msg)?;
        }
    }
    Ok(())
}

pub fn print_info(
    w: &mut dyn Write,
    info: &DatabaseInfo,
    staleness: &Staleness,
    color: ColorMode,
) -> std::io::Result<()> {
    let or_unknown = |v: Option<String>| v.unwrap_or_else(|| "unknown".to_string());

    writeln!(w, "Database:     {}", info.path.display())?;
    writeln!(w, "Built:        {}", or_unknown(info.build_date.clone()))?;
    writeln!(
        w,
        "Publications: {}",
        or_unknown(info.publication_count.map(|n| n.to_string()))
    )?;
    writeln!(w, "Stored rows:  {}", info.stored_records)?;
    writeln!(
        w,
        "Triples:      {}",
        or_unknown(info.triple_count.map(|n| n.to_string()))
    )?;
    writeln!(
        w,
        "Age:          {}",
        or_unknown(staleness.age_days().map(|d| format!("{} days", d)))
    )?;
    print_staleness(w, staleness, &info.path, color)
}

/// Print the FTS5 query built for a title, optionally with every candidate
/// term and its score.
pub fn print_terms(
    w: &mut dyn Write,
    query: Option<&str>,
    scored: &[(String, f64)],
    color: ColorMode,
) -> std::io::Result<()> {
    match query {
        Some(q) => writeln!(w, "{}", q)?,
        None if color.enabled() => writeln!(w, "{}", "(no query terms)".dimmed())?,
        None => writeln!(w, "(no query terms)")?,
    }
    for (word, score) in scored {
        writeln!(w, "  {:>6.1}  {}", score, word)?;
    }
    Ok(())
}
