//! `epirecall-cli` – episodic recall over clip embeddings.
//!
//! The `epirecall` binary runs one complete matching invocation:
//!
//! 1. Loads run settings from an optional TOML file plus `EPIRECALL_*`
//!    environment overrides.
//! 2. Loads the memory database and the query set from two SQLite stores.
//! 3. Trains the classifier, fits both projections and ranks the top-K
//!    matches for every query.
//! 4. Prints the ranked matches (and the held-out accuracy figures when a
//!    genuine train/test split was configured).
//! 5. Optionally copies matched clip media into a per-run export tree.

mod config;

use colored::Colorize;
use std::path::Path;
use std::process::ExitCode;
use tracing::info;

use epirecall_match::export::MatchExporter;
use epirecall_match::pipeline::{BatchReport, MatchPipeline};
use epirecall_store::ClipStore;

fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // Initialise tracing-subscriber using RUST_LOG (defaults to "info").
    // Set EPIRECALL_LOG_FORMAT=json to emit newline-delimited JSON logs.
    // User-facing output still uses println! for UX consistency.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("EPIRECALL_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}: {}", "error".red().bold(), message);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (memory_path, query_path, settings_path) = match args.as_slice() {
        [memory, query] => (memory.clone(), query.clone(), None),
        [memory, query, settings] => (memory.clone(), query.clone(), Some(settings.clone())),
        _ => {
            return Err("usage: epirecall <memory-db> <query-db> [settings.toml]".to_string());
        }
    };

    let settings = match &settings_path {
        Some(path) => config::load_from(Path::new(path))?,
        None => config::load_default(),
    };

    let memory_store = ClipStore::open(&memory_path)
        .map_err(|e| format!("Failed to open memory database {}: {}", memory_path, e))?;
    let query_store = ClipStore::open(&query_path)
        .map_err(|e| format!("Failed to open query database {}: {}", query_path, e))?;

    let database = memory_store
        .load_all()
        .map_err(|e| format!("Failed to load memory records: {}", e))?;
    let queries = query_store
        .load_all()
        .map_err(|e| format!("Failed to load query records: {}", e))?;

    println!(
        "  Memory: {} clips   Queries: {} clips",
        database.len().to_string().bold(),
        queries.len().to_string().bold()
    );

    let pipeline = MatchPipeline::new(settings.matching.clone()).map_err(|e| e.to_string())?;
    let report = pipeline.run(&database, &queries).map_err(|e| e.to_string())?;

    print_report(&report);

    if let Some(export) = &settings.export {
        let target = Path::new(&export.target_dir).join(MatchExporter::run_dir_name(pipeline.config()));
        let exporter = MatchExporter::new(&export.media_base_dir, &target);
        let exported = exporter.export(&report);
        info!(exported, target = %target.display(), "media export finished");
        println!("\n  Exported {} match directories to {}", exported, target.display());
    }

    Ok(())
}

fn print_report(report: &BatchReport) {
    if let (Some(accuracy), Some(top_k)) = (report.accuracy, report.top_k_accuracy) {
        println!(
            "  Classifier held-out accuracy: {}   top-k: {}",
            format!("{:.3}", accuracy).bold(),
            format!("{:.3}", top_k).bold()
        );
    }

    for outcome in &report.outcomes {
        println!();
        match &outcome.result {
            Ok(matches) => {
                println!(
                    "  {} {} ({})",
                    "query".green().bold(),
                    outcome.query_label.bold(),
                    outcome.query_category
                );
                for (rank, entry) in matches.iter().enumerate() {
                    println!(
                        "    {:>2}. {}  score {:.4}  [{}]",
                        rank + 1,
                        entry.id.bold(),
                        entry.score,
                        entry.category
                    );
                }
            }
            Err(error) => {
                println!(
                    "  {} {} – {}",
                    "query".yellow().bold(),
                    outcome.query_label.bold(),
                    error.to_string().yellow()
                );
            }
        }
    }

    let failed = report.failed().count();
    if failed > 0 {
        println!(
            "\n  {} of {} queries failed; see warnings above.",
            failed.to_string().yellow().bold(),
            report.outcomes.len()
        );
    }
}
