//! casegraph - prefix extraction and active-case queries over graph event logs
//!
//! Imports graph files and event logs into the database, derives the prefix table and the
//! reconciled timeline, and answers "which cases were active, and how far had
//! they got" for a time window.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/casegraph/casegraph.db (~/.local/share/casegraph/casegraph.db)
//! - Output: $XDG_DATA_HOME/casegraph/output/ (prefixes.csv, timeline.csv)
//! - Logs: $XDG_STATE_HOME/casegraph/casegraph.*.log
//! - Config: $XDG_CONFIG_HOME/casegraph/config.toml (~/.config/casegraph/config.toml)

use casegraph_core::format::{format_timestamp, parse_timestamp};
use casegraph_core::ingest::{ImportResult, IngestCoordinator};
use casegraph_core::pipeline::{self, PrefixRunResult, TimelineRunResult};
use casegraph_core::{
    export, maximal_prefixes, ActiveCaseIndex, ActivePrefix, Config, Database, PrefixBuilder,
    RunRecord, WindowFilter,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "casegraph")]
#[command(about = "Prefix extraction and active-case queries for graph event logs")]
#[command(version)]
struct Args {
    /// Config file (defaults to $XDG_CONFIG_HOME/casegraph/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the database and output files
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbose output (-v lists warnings and skipped cases)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import graph files and event logs into the database
    Import {
        /// Graph file or event log paths, or glob patterns
        #[arg(required = true)]
        patterns: Vec<String>,
    },

    /// Build the prefix table from imported cases
    Prefixes,

    /// Reconcile the active timeline of imported cases
    Timeline,

    /// List the cases active in a time window with their maximal prefixes
    Active {
        /// Window start
        #[arg(long, value_parser = parse_time)]
        start: DateTime<Utc>,

        /// Window finish
        #[arg(long, value_parser = parse_time)]
        finish: DateTime<Utc>,

        /// How timeline rows are matched against the window
        #[arg(long)]
        filter: Option<WindowFilter>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Also write the active prefixes as a prefix table file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import, then build prefixes and timeline in one step
    Run {
        /// Graph file or event log paths, or glob patterns
        #[arg(required = true)]
        patterns: Vec<String>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_time(text: &str) -> std::result::Result<DateTime<Utc>, String> {
    parse_timestamp(text).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };

    // Initialize logging
    let _log_guard =
        casegraph_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("casegraph starting");

    let db_path = match &args.data_dir {
        Some(dir) => {
            if config.output.dir.is_none() {
                config.output.dir = Some(dir.join("output"));
            }
            dir.join("casegraph.db")
        }
        None => Config::database_path(),
    };

    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    match &args.command {
        Command::Import { patterns } => {
            print_locations(&db_path);
            run_import(&db, patterns, args.verbose)?;
        }
        Command::Prefixes => run_prefixes(&db, &config, args.verbose)?,
        Command::Timeline => run_timeline(&db, &config, args.verbose)?,
        Command::Active {
            start,
            finish,
            filter,
            format,
            output,
        } => {
            let filter = (*filter).unwrap_or(config.query.window_filter);
            run_active(&db, *start, *finish, filter, *format, output.as_deref())?;
        }
        Command::Run { patterns } => {
            print_locations(&db_path);
            run_import(&db, patterns, args.verbose)?;
            run_prefixes(&db, &config, args.verbose)?;
            run_timeline(&db, &config, args.verbose)?;
        }
    }

    tracing::info!("casegraph complete");

    Ok(())
}

fn print_locations(db_path: &Path) {
    println!("Database: {}", db_path.display());
    println!("Logs:     {}", Config::state_dir().display());
}

/// Progress bar shared by the batch commands
fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

fn tick(pb: &ProgressBar, current: usize, total: usize, message: String) {
    if current == 0 {
        pb.set_length(total as u64);
    }
    pb.set_position(current as u64);
    pb.set_message(message);
}

/// Import input files with a progress bar
fn run_import(db: &Database, patterns: &[String], verbose: u8) -> Result<()> {
    let pb = progress_bar()?;

    let result = IngestCoordinator::new(db)
        .import_all_with_progress(patterns, |current, total, path| {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("...")
                .to_string();
            tick(&pb, current, total, name);
        })
        .context("import failed")?;

    pb.finish_and_clear();

    print_import_result(&result, verbose);

    tracing::info!(
        files_imported = result.files_imported,
        events_inserted = result.events_inserted,
        "Import complete"
    );

    Ok(())
}

/// Build, store and write the prefix table
fn run_prefixes(db: &Database, config: &Config, verbose: u8) -> Result<()> {
    let pb = progress_bar()?;
    let builder = PrefixBuilder::with_max_length(config.prefix.max_length);

    let run = pipeline::build_prefix_table_with_progress(db, &builder, |current, total, track| {
        tick(&pb, current, total, track.to_string());
    })
    .context("prefix build failed")?;

    pb.finish_and_clear();

    let path = config.output.prefix_path();
    let record = run
        .persist(db, &path)
        .with_context(|| format!("failed to store prefix table at {}", path.display()))?;

    print_prefix_result(&run, &record, &path, verbose);
    Ok(())
}

/// Reconcile, store and write the timeline
fn run_timeline(db: &Database, config: &Config, verbose: u8) -> Result<()> {
    let pb = progress_bar()?;

    let run = pipeline::reconcile_timeline_with_progress(db, |current, total, track| {
        tick(&pb, current, total, track.to_string());
    })
    .context("timeline reconciliation failed")?;

    pb.finish_and_clear();

    let path = config.output.timeline_path();
    let record = run
        .persist(db, &path)
        .with_context(|| format!("failed to store timeline at {}", path.display()))?;

    print_timeline_result(&run, &record, &path, verbose);
    Ok(())
}

/// Query the stored timeline and join against the stored prefix table
fn run_active(
    db: &Database,
    start: DateTime<Utc>,
    finish: DateTime<Utc>,
    filter: WindowFilter,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<()> {
    let timeline = db.load_timeline().context("failed to load timeline")?;
    if timeline.is_empty() {
        println!("No reconciled timeline found in database.");
        println!("Run 'casegraph timeline' first.");
        return Ok(());
    }

    let records = ActiveCaseIndex::new(&timeline)
        .with_filter(filter)
        .query(start, finish)
        .context("active-case query failed")?;

    let table = db
        .load_prefix_table()
        .context("failed to load prefix table")?;
    let active = maximal_prefixes(records, &table);

    match format {
        OutputFormat::Json => println!("{}", export::active_json(&active)?),
        OutputFormat::Text => print_active(&active, start, finish, filter),
    }

    if let Some(path) = output {
        export::write_active_prefixes(path, &active)
            .with_context(|| format!("failed to write {}", path.display()))?;
        if format == OutputFormat::Text {
            println!("\nWrote active prefixes to {}", path.display());
        }
    }

    Ok(())
}

/// Print import result summary
fn print_import_result(result: &ImportResult, verbose: u8) {
    println!("\nImport complete:");
    println!("  Files imported:  {}", result.files_imported);
    println!("  Files skipped:   {}", result.files_skipped);
    println!("  Events inserted: {}", result.events_inserted);
    println!("  Edges inserted:  {}", result.edges_inserted);

    if !result.warnings.is_empty() {
        if verbose >= 1 {
            println!("\nWarnings ({}):", result.warnings.len());
            for warning in &result.warnings {
                println!("  {}", warning);
            }
        } else {
            println!("  Warnings:        {} (use -v to list)", result.warnings.len());
        }
    }

    if !result.errors.is_empty() {
        println!("\nErrors ({}):", result.errors.len());
        for (path, err) in &result.errors {
            println!("  {}: {}", path.display(), err);
        }
    }
}

fn print_prefix_result(run: &PrefixRunResult, record: &RunRecord, path: &Path, verbose: u8) {
    println!("\nPrefix table built:");
    println!("  Cases processed: {}", run.cases_processed);
    println!("  Cases skipped:   {}", run.skipped.len());
    println!("  Prefixes:        {}", run.table.prefix_count());
    println!("  Rows:            {}", record.rows);
    println!("  Written to:      {}", path.display());
    print_skipped(&run.skipped, verbose);
}

fn print_timeline_result(run: &TimelineRunResult, record: &RunRecord, path: &Path, verbose: u8) {
    println!("\nTimeline reconciled:");
    println!("  Cases processed: {}", run.cases_processed);
    println!("  Cases skipped:   {}", run.skipped.len());
    println!("  Rows:            {}", record.rows);
    println!("  Written to:      {}", path.display());
    print_skipped(&run.skipped, verbose);
}

fn print_skipped(skipped: &[(String, String)], verbose: u8) {
    if verbose >= 1 && !skipped.is_empty() {
        println!("\nSkipped cases ({}):", skipped.len());
        for (track_id, err) in skipped {
            println!("  {}: {}", track_id, err);
        }
    }
}

fn print_active(
    active: &[ActivePrefix],
    start: DateTime<Utc>,
    finish: DateTime<Utc>,
    filter: WindowFilter,
) {
    println!(
        "Active cases in [{}, {}] ({}):",
        format_timestamp(start),
        format_timestamp(finish),
        filter
    );

    if active.is_empty() {
        println!("  (none)");
        return;
    }

    for entry in active {
        let status = if entry.is_in_progress() {
            "in progress"
        } else {
            "complete"
        };
        println!(
            "  {}  activity {}  prefix {}  finished {}  ({})",
            entry.record.track_id,
            entry.record.activity_id,
            entry.record.prefix_id,
            format_timestamp(entry.record.effective_finish),
            status
        );
    }

    let in_progress = active.iter().filter(|a| a.is_in_progress()).count();
    println!("\n{} case(s), {} in progress", active.len(), in_progress);
}
