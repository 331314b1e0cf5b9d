//! firebird-mysql-migrate CLI - Firebird to MySQL schema and data migration.

use clap::Parser;
use firebird_mysql_migrate::config::DEFAULT_CONFIG_PATH;
use firebird_mysql_migrate::{Config, MigrateError, MigrationReport, Orchestrator, RunStatus};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "firebird-mysql-migrate")]
#[command(about = "Migrate a Firebird database (schema and data) to MySQL")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Only migrate these tables (comma-separated); referenced tables follow the config policy
    #[arg(short, long, value_delimiter = ',')]
    tables: Vec<String>,

    /// Create the schema without copying rows
    #[arg(long, conflicts_with = "data_only")]
    structure_only: bool,

    /// Copy rows into an existing schema
    #[arg(long)]
    data_only: bool,

    /// Fold target table and column names to lower case
    #[arg(long)]
    lowercase: bool,

    /// Drop existing target tables before creating them
    #[arg(long)]
    drop_tables: bool,

    /// Override number of parallel table workers
    #[arg(long)]
    workers: Option<usize>,

    /// Override rows per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Output JSON report to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,
}

impl Cli {
    /// Flags win over the file and the environment.
    fn apply(&self, config: &mut Config) {
        let migration = &mut config.migration;
        if !self.tables.is_empty() {
            migration.tables = self
                .tables
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }
        if self.structure_only {
            migration.transfer_structure = true;
            migration.transfer_data = false;
        }
        if self.data_only {
            migration.transfer_structure = false;
            migration.transfer_data = true;
        }
        if self.lowercase {
            migration.lowercase = true;
        }
        if self.drop_tables {
            migration.drop_tables = true;
        }
        if let Some(w) = self.workers {
            migration.workers = Some(w);
        }
        if let Some(b) = self.batch_size {
            migration.batch_size = b;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, MigrateError> {
    let cli = Cli::parse();

    // .env is optional
    let _ = dotenvy::dotenv();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::resolve(&cli.config)?;
    cli.apply(&mut config);
    config.validate()?;
    let config = config.with_auto_tuning();
    info!("Run mode: {}", config.run_mode());

    let cancel_token = setup_signal_handler();

    let orchestrator = Orchestrator::new(config).await?;
    let result = orchestrator.migrate(cancel_token).await;
    orchestrator.close().await;
    let report = result?;

    if cli.output_json {
        println!("{}", report.to_json()?);
    } else {
        print_summary(&report);
    }

    if report.status == RunStatus::Cancelled {
        warn!("Migration cancelled before completion");
    }
    Ok(report.exit_code())
}

fn print_summary(report: &MigrationReport) {
    let headline = match report.status {
        RunStatus::Completed => "Migration completed!",
        RunStatus::CompletedWithErrors => "Migration completed with row failures",
        RunStatus::Failed => "Migration finished with failed tables",
        RunStatus::Cancelled => "Migration cancelled",
    };
    println!("\n{}", headline);
    println!("  Run ID: {}", report.run_id);
    println!("  Mode: {}", report.mode);
    println!("  Duration: {:.2}s", report.duration_seconds);
    println!(
        "  Tables: {}/{} ({} failed, {} skipped, {} cancelled)",
        report.tables_completed,
        report.tables_total,
        report.tables_failed,
        report.tables_skipped,
        report.tables_cancelled
    );
    println!(
        "  Rows: {} transferred, {} failed",
        report.rows_transferred, report.rows_failed
    );
    println!("  Throughput: {} rows/sec", report.rows_per_second);

    if report.has_failures() {
        println!("\nFailures:");
        print!("{}", report.summary());
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the run on SIGINT (Ctrl-C) or SIGTERM.
///
/// In-flight batches finish; tables not yet started are reported as cancelled.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, label) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Finishing in-flight batches...", label);
                    token.cancel();
                });
            }
            Err(e) => warn!("Cannot install {} handler: {}", label, e),
        }
    }

    cancel_token
}

#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing in-flight batches...");
            token.cancel();
        }
    });

    cancel_token
}
