//! Grove CLI
//!
//! Operator-facing entry point for the snapshot tooling: migrate and
//! repair whole-database snapshots, and inspect the effective
//! configuration.

use anyhow::Context;
use clap::{Parser, Subcommand};
use comfy_table::Table;
use grove::config::GroveConfig;
use grove::logging::{init_logging, LoggingConfig};
use grove::migrate::SCHEMA_LATEST;
use grove::repair::{repair, RepairReport};
use grove::snapshot;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "grove", about = "Thought/lexeme snapshot tooling", version)]
struct Cli {
    /// Path to a configuration file (overrides the global config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Set log level to debug
    #[arg(long, global = true)]
    verbose: bool,

    /// Disable logging output
    #[arg(long, global = true)]
    quiet: bool,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format override (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate a snapshot to the current schema version and scan/heal
    /// structural corruption
    Repair {
        /// Snapshot file (JSON)
        snapshot: PathBuf,

        /// Overwrite the input file with the repaired snapshot;
        /// read-only by default
        #[arg(long)]
        write: bool,

        /// Emit the counters report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Migrate a snapshot to the current schema version without repair
    Migrate {
        /// Snapshot file (JSON)
        snapshot: PathBuf,

        /// Overwrite the input file with the migrated snapshot
        #[arg(long)]
        write: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = GroveConfig::load(cli.config.as_deref()).unwrap_or_default();
    let logging = build_logging_config(&cli, &config);
    init_logging(Some(&logging)).context("failed to initialize logging")?;

    match cli.command {
        Commands::Repair {
            snapshot: path,
            write,
            json,
        } => {
            let mut db = snapshot::load(&path)
                .with_context(|| format!("failed to load snapshot {:?}", path))?;
            let report = repair(&mut db).context("repair failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }

            if write {
                snapshot::save(&path, &db)
                    .with_context(|| format!("failed to write snapshot {:?}", path))?;
                info!(path = %path.display(), "repaired snapshot written");
            } else {
                info!("read-only mode; snapshot not modified (pass --write to persist)");
            }
        }
        Commands::Migrate {
            snapshot: path,
            write,
        } => {
            let db = snapshot::load(&path)
                .with_context(|| format!("failed to load snapshot {:?}", path))?;
            println!(
                "snapshot at schema v{} ({} thoughts, {} lexemes)",
                SCHEMA_LATEST,
                db.thought_index.len(),
                db.lexeme_index.len()
            );
            if write {
                snapshot::save(&path, &db)
                    .with_context(|| format!("failed to write snapshot {:?}", path))?;
            }
        }
        Commands::Config => {
            println!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

/// Counters whose nonzero value signals a defect rather than a healed
/// condition; rendered highlighted.
const ANOMALY_COUNTERS: [&str; 2] = ["residualLemmaMismatches", "missingParentsAfterRepair"];

fn print_report(report: &RepairReport) {
    let mut table = Table::new();
    table.set_header(vec!["counter", "value"]);

    let value = serde_json::to_value(report).expect("report serializes");
    if let serde_json::Value::Object(map) = value {
        for (name, count) in map {
            let count = count.as_u64().unwrap_or(0);
            let rendered = if ANOMALY_COUNTERS.contains(&name.as_str()) && count > 0 {
                format!("{}", count.red().bold())
            } else {
                count.to_string()
            };
            table.add_row(vec![name, rendered]);
        }
    }

    println!("{table}");
    if report.has_anomalies() {
        eprintln!(
            "{}",
            "should-never-happen counters are nonzero; manual inspection required".red()
        );
    }
}

fn build_logging_config(cli: &Cli, config: &GroveConfig) -> LoggingConfig {
    let mut logging = config.logging.clone();
    if cli.quiet {
        logging.level = "off".to_string();
    }
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    if let Some(level) = &cli.log_level {
        logging.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        logging.format = format.clone();
    }
    logging
}
