//! Skillgauge - scored evaluation runs for agent skill documents.
//!
//! ## Commands
//!
//! - `run`: Execute a scored run over the scenario catalog and stream progress
//! - `checks`: Print the scored-check vocabulary
//! - `reports`: List persisted report snapshots, newest first

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{warn, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use skillgauge_core::{
    group_checks, CatalogConfig, CellStatus, CliInvoker, ReportWriter, RunEvent, RunManager,
    DEFAULT_CONCURRENCY, DEFAULT_MODELS, GROUPS,
};

#[derive(Parser)]
#[command(name = "skillgauge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Scored evaluation runs for agent skill documents", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a scored run and stream progress until it finishes
    Run {
        /// Restrict the run to these domains (repeatable; default: all)
        #[arg(short, long = "domain")]
        domains: Vec<String>,

        /// Models to evaluate against (repeatable)
        #[arg(short, long = "model")]
        models: Vec<String>,

        /// Maximum concurrent evaluation units
        #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY)]
        concurrency: usize,

        /// Directory of domain scenario YAML files
        #[arg(long, default_value = "scenarios")]
        scenarios_dir: PathBuf,

        /// Skill manifest file
        #[arg(long, default_value = "skills_manifest.yaml")]
        manifest: PathBuf,

        /// Directory for report snapshots
        #[arg(long, default_value = "reports", env = "SKILLGAUGE_REPORTS_DIR")]
        reports_dir: PathBuf,

        /// Model CLI binary to invoke
        #[arg(long, default_value = "claude")]
        binary: String,
    },

    /// Print the scored-check vocabulary
    Checks,

    /// List persisted report snapshots, newest first
    Reports {
        /// Directory of report snapshots
        #[arg(long, default_value = "reports", env = "SKILLGAUGE_REPORTS_DIR")]
        reports_dir: PathBuf,
    },
}

fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            domains,
            models,
            concurrency,
            scenarios_dir,
            manifest,
            reports_dir,
            binary,
        } => {
            cmd_run(
                domains,
                models,
                concurrency,
                scenarios_dir,
                manifest,
                reports_dir,
                binary,
            )
            .await
        }
        Commands::Checks => cmd_checks(),
        Commands::Reports { reports_dir } => cmd_reports(&reports_dir),
    }
}

async fn cmd_run(
    domains: Vec<String>,
    models: Vec<String>,
    concurrency: usize,
    scenarios_dir: PathBuf,
    manifest: PathBuf,
    reports_dir: PathBuf,
    binary: String,
) -> Result<()> {
    let domains = (!domains.is_empty()).then_some(domains);
    let models = if models.is_empty() {
        DEFAULT_MODELS.iter().map(|m| m.to_string()).collect()
    } else {
        models
    };

    let manager = RunManager::new(
        CatalogConfig {
            scenarios_dir,
            manifest_path: manifest,
        },
        Arc::new(CliInvoker::new(binary)),
        ReportWriter::new(reports_dir),
    );
    let started = manager
        .start_scored_run(domains, models, concurrency)
        .context("failed to start scored run")?;
    println!(
        "Run {} started: {} evaluation units",
        started.run_id, started.total_units
    );

    let mut events = started.events;
    let mut failure: Option<String> = None;
    loop {
        match events.recv().await {
            Ok(RunEvent::Started { .. }) => {}
            Ok(RunEvent::Progress {
                scenario_id,
                skill,
                model,
                status,
                duration_secs,
                error,
            }) => match status {
                CellStatus::Running => println!("  .. {scenario_id} / {skill} / {model}"),
                CellStatus::Ok => println!(
                    "  ok {scenario_id} / {skill} / {model} ({:.1}s)",
                    duration_secs.unwrap_or(0.0)
                ),
                CellStatus::Error => println!(
                    "  !! {scenario_id} / {skill} / {model}: {}",
                    error.unwrap_or_default()
                ),
                CellStatus::Pending => {}
            },
            Ok(RunEvent::Completed {
                report,
                total_results,
                ..
            }) => println!("Completed: {total_results} results -> {report}"),
            Ok(RunEvent::Error { message, .. }) => failure = Some(message),
            Ok(RunEvent::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "progress stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    if let Some(message) = failure {
        anyhow::bail!("run failed: {message}");
    }
    Ok(())
}

fn cmd_checks() -> Result<()> {
    for (group, label) in GROUPS {
        println!("{group} - {label}");
        for check in group_checks(group) {
            println!(
                "  {:<6} [{:<8}] {}: {}",
                check.id, check.severity, check.name, check.description
            );
        }
        println!();
    }
    Ok(())
}

fn cmd_reports(reports_dir: &PathBuf) -> Result<()> {
    let writer = ReportWriter::new(reports_dir);
    let reports = writer.load_all();
    if reports.is_empty() {
        println!("No reports in {}", reports_dir.display());
        return Ok(());
    }
    for (path, report) in reports {
        let errored = report.results.iter().filter(|r| r.error.is_some()).count();
        println!(
            "{}  {}  {} results ({} errored)  {}",
            report.run_id,
            report.generated.format("%Y-%m-%d %H:%M:%S"),
            report.result_count,
            errored,
            path.display()
        );
    }
    Ok(())
}
