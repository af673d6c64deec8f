use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use dblp_offline::config_file::{self, ConfigFile};
use dblp_offline::{DblpDatabase, QueryTermSelector};
use tracing_subscriber::EnvFilter;

mod output;
mod progress;

use output::ColorMode;
use progress::BuildBars;

/// Offline DBLP index: build it from the RDF dump and look up titles in it
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the database from a local N-Triples dump (.nt or .nt.gz)
    Build {
        /// Path to the dump file
        dump: PathBuf,

        /// Where to write the SQLite database
        db: Option<PathBuf>,

        /// Rows per insert transaction
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Download the DBLP dump and (re)build the database
    Update {
        /// Where to write the SQLite database
        db: Option<PathBuf>,

        /// Keep the downloaded dump at this path
        #[arg(long)]
        keep_download: Option<PathBuf>,

        /// Dump URL
        #[arg(long)]
        url: Option<String>,
    },

    /// Look up a title in the offline database
    Lookup {
        /// Path to the SQLite database
        #[arg(long)]
        db: Option<PathBuf>,

        /// The title to look up
        #[arg(required = true)]
        title: Vec<String>,
    },

    /// Show the full-text query a title would produce
    Terms {
        /// Also list every candidate term with its score
        #[arg(long)]
        explain: bool,

        /// The title to analyse
        #[arg(required = true)]
        title: Vec<String>,
    },

    /// Show build metadata and age of the database
    Info {
        /// Path to the SQLite database
        db: Option<PathBuf>,
    },
}

fn init_tracing(verbose: u8) {
    let filter = if let Ok(env) = std::env::var("DBLP_OFFLINE_LOG") {
        EnvFilter::new(env)
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve the database path: CLI flag > env var > config file > default.
fn resolve_db_path(flag: Option<PathBuf>, config: &ConfigFile) -> anyhow::Result<PathBuf> {
    flag.or_else(|| std::env::var("DBLP_OFFLINE_PATH").ok().map(PathBuf::from))
        .or_else(|| config.db_path())
        .or_else(config_file::default_db_path)
        .context("Could not determine a default database location; pass a path explicitly")
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = config_file::load_config();
    tracing::debug!(?config, "loaded configuration");
    let color = ColorMode(!cli.no_color && std::io::stdout().is_terminal());

    match cli.command {
        Command::Build {
            dump,
            db,
            batch_size,
        } => {
            let db_path = resolve_db_path(db, &config)?;
            build(&dump, &db_path, batch_size, &config)?;
        }
        Command::Update {
            db,
            keep_download,
            url,
        } => {
            let db_path = resolve_db_path(db, &config)?;
            update(&db_path, keep_download, url, &config).await?;
        }
        Command::Lookup { db, title } => {
            let db_path = resolve_db_path(db, &config)?;
            let found = lookup(&db_path, &title.join(" "), &config, color)?;
            if !found {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Terms { explain, title } => terms(&title.join(" "), explain, &config, color)?,
        Command::Info { db } => {
            let db_path = resolve_db_path(db, &config)?;
            info(&db_path, &config, color)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn build(
    dump: &Path,
    db_path: &Path,
    batch_size: Option<usize>,
    config: &ConfigFile,
) -> anyhow::Result<()> {
    if !dump.exists() {
        anyhow::bail!("Dump file not found: {}", dump.display());
    }
    let mut build_config = config.build_config();
    if let Some(batch_size) = batch_size {
        build_config.batch_size = batch_size;
    }

    let bars = BuildBars::new(false)?;
    let result =
        dblp_offline::build_database_from_file(db_path, dump, &build_config, |e| bars.handle(e));
    if result.is_err() {
        bars.abandon();
    }
    result.with_context(|| format!("Failed to build database from {}", dump.display()))?;

    let canonical = std::fs::canonicalize(db_path).unwrap_or_else(|_| db_path.to_path_buf());
    println!("DBLP database saved to: {}", canonical.display());
    Ok(())
}

async fn update(
    db_path: &Path,
    keep_download: Option<PathBuf>,
    url: Option<String>,
    config: &ConfigFile,
) -> anyhow::Result<()> {
    let mut build_config = config.build_config();
    if let Some(url) = url {
        build_config.url = url;
    }
    if keep_download.is_some() {
        build_config.keep_download = keep_download;
    }

    let bars = BuildBars::new(true)?;
    let result = dblp_offline::build_database(db_path, &build_config, |e| bars.handle(e)).await;
    if result.is_err() {
        bars.abandon();
    }
    result.with_context(|| format!("Failed to update database from {}", build_config.url))?;

    let canonical = std::fs::canonicalize(db_path).unwrap_or_else(|_| db_path.to_path_buf());
    println!("DBLP database saved to: {}", canonical.display());
    Ok(())
}

fn open_database(db_path: &Path, config: &ConfigFile) -> anyhow::Result<DblpDatabase> {
    if !db_path.exists() {
        anyhow::bail!(
            "Offline DBLP database not found at {}. Build it with: dblp-offline update {}",
            db_path.display(),
            db_path.display()
        );
    }
    tracing::debug!(path = %db_path.display(), "opening database");
    let db = DblpDatabase::open(db_path)?
        .with_selector(QueryTermSelector::new(config.query_config()))
        .with_lookup_config(config.lookup_config());
    Ok(db)
}

/// Returns whether the title was found.
fn lookup(
    db_path: &Path,
    title: &str,
    config: &ConfigFile,
    color: ColorMode,
) -> anyhow::Result<bool> {
    let db = open_database(db_path, config)?;

    let staleness = db.staleness(config.stale_after_days());
    output::print_staleness(&mut std::io::stderr(), &staleness, db_path, color)?;

    let mut stdout = std::io::stdout().lock();
    match db.lookup(title)? {
        Some(result) => {
            output::print_result(&mut stdout, &result, color)?;
            Ok(true)
        }
        None => {
            output::print_not_found(&mut stdout, title, color)?;
            Ok(false)
        }
    }
}

fn terms(title: &str, explain: bool, config: &ConfigFile, color: ColorMode) -> anyhow::Result<()> {
    let selector = QueryTermSelector::new(config.query_config());
    let query = selector.select_terms(title);

    let scored: Vec<(String, f64)> = if explain {
        selector
            .candidate_terms(title)
            .into_iter()
            .enumerate()
            .map(|(position, word)| {
                let score = selector.score(&word, position);
                (word, score)
            })
            .collect()
    } else {
        Vec::new()
    };

    let mut stdout = std::io::stdout().lock();
    output::print_terms(&mut stdout, query.as_deref(), &scored, color)?;
    stdout.flush()?;
    Ok(())
}

fn info(db_path: &Path, config: &ConfigFile, color: ColorMode) -> anyhow::Result<()> {
    let db = open_database(db_path, config)?;
    let info = db.info()?;
    let staleness = db.staleness(config.stale_after_days());

    let mut stdout = std::io::stdout().lock();
    output::print_info(&mut stdout, &info, &staleness, color)?;
    Ok(())
}
