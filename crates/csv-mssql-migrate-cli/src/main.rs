//! csv-mssql-migrate CLI - load delimited files into SQL Server tables.

use clap::{Parser, Subcommand};
use csv_mssql_migrate::{BulkMethod, Config, MigrateError, MigrationReport, Migrator, MssqlConnection};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "csv-mssql-migrate")]
#[command(about = "Load CSV files and zip archives into SQL Server tables")]
#[command(version)]
struct Cli {
    /// Path to YAML migration file
    #[arg(short, long, default_value = "migration.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the migration
    Run {
        /// Only run these sections (comma-separated)
        #[arg(long, value_delimiter = ',')]
        section: Vec<String>,

        /// Stop on the first write failure instead of logging it
        #[arg(long)]
        exit_on_error: bool,

        /// Insert in committed batches
        #[arg(long)]
        bulk: bool,

        /// Rows per committed batch
        #[arg(long)]
        bulk_limit: Option<u64>,

        /// How batches are sent: insert or tds
        #[arg(long)]
        bulk_method: Option<String>,

        /// Columns parsed as YYYY-MM-DD dates in batched mode (comma-separated)
        #[arg(long, value_delimiter = ',')]
        date_columns: Option<Vec<String>>,

        /// Keep only the trailing 20 characters of the max20 columns
        #[arg(long)]
        max20: bool,

        /// Connection timeout in seconds [default: 300]
        #[arg(long)]
        conn_timeout: Option<u64>,
    },

    /// Check the migration file and parse every mapping, without connecting
    Validate,

    /// Test the database connection
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            section,
            exit_on_error,
            bulk,
            bulk_limit,
            bulk_method,
            date_columns,
            max20,
            conn_timeout,
        } => {
            // Flags only ever switch options on; unset flags keep the file's values.
            let options = &mut config.options;
            options.exit_on_error |= exit_on_error;
            options.bulk |= bulk;
            options.max20 |= max20;
            if let Some(limit) = bulk_limit {
                options.bulk_limit = limit;
            }
            if let Some(method) = bulk_method {
                options.bulk_method = parse_bulk_method(&method)?;
            }
            if date_columns.is_some() {
                options.date_columns = date_columns;
            }
            if let Some(secs) = conn_timeout {
                config.database.connection_timeout = secs;
            }

            let migrator = Migrator::for_sections(&config, config.options.clone(), &section)?;
            let mut conn = MssqlConnection::connect(&config.database).await?;
            let outcome = migrator.run(&mut conn).await;
            if let Err(e) = conn.close().await {
                tracing::warn!("Closing connection failed: {}", e);
            }

            // An aborted run still reports what it committed.
            let report = match &outcome {
                Ok(report) => Some(report),
                Err(e) => e.partial_report(),
            };
            if let Some(report) = report {
                if cli.output_json {
                    println!("{}", serde_json::to_string_pretty(report)?);
                } else {
                    print_report(report);
                }
            }
            outcome?;
        }

        Commands::Validate => {
            let migrator = Migrator::new(&config, config.options.clone())?;
            let sections = migrator.section_names();
            if cli.output_json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "valid": true,
                        "sections": sections,
                    }))?
                );
            } else {
                println!("Configuration is valid: {} section(s)", sections.len());
                for name in sections {
                    println!("  {}", name);
                }
            }
        }

        Commands::HealthCheck => {
            let started = Instant::now();
            let checked = async {
                let mut conn = MssqlConnection::connect(&config.database).await?;
                conn.ping().await?;
                conn.close().await
            }
            .await;
            let latency_ms = started.elapsed().as_millis() as u64;

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "healthy": checked.is_ok(),
                        "server": config.database.server,
                        "database": config.database.database,
                        "latency_ms": latency_ms,
                        "error": checked.as_ref().err().map(|e| e.to_string()),
                    }))?
                );
            } else {
                println!("Health Check Results:");
                println!(
                    "  Target (MSSQL {}/{}): {} ({}ms)",
                    config.database.server,
                    config.database.database,
                    if checked.is_ok() { "OK" } else { "FAILED" },
                    latency_ms
                );
            }
            checked?;
        }
    }

    Ok(())
}

fn parse_bulk_method(value: &str) -> Result<BulkMethod, MigrateError> {
    match value.trim().to_lowercase().as_str() {
        "insert" => Ok(BulkMethod::Insert),
        "tds" => Ok(BulkMethod::Tds),
        other => Err(MigrateError::Config(format!(
            "unknown bulk method {:?} (expected insert or tds)",
            other
        ))),
    }
}

fn print_report(report: &MigrationReport) {
    println!("\nMigration {}!", report.status.replace('_', " "));
    println!("  Run ID: {}", report.run_id);
    println!("  Duration: {:.2}s", report.duration_seconds);
    for section in &report.sections {
        println!(
            "  {} -> {}: {} written, {} failed, {} batches",
            section.name,
            section.target,
            section.stats.rows_written,
            section.stats.rows_failed,
            section.stats.batches_committed
        );
    }
    println!(
        "  Rows: {} read, {} written, {} skipped, {} failed",
        report.rows_read, report.rows_written, report.rows_skipped, report.rows_failed
    );
    if !report.failed_sources.is_empty() {
        println!("  Failed sources: {:?}", report.failed_sources);
    }
    if let Some(error) = &report.error {
        println!("  Stopped by: {}", error);
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
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

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format {:?} (expected text or json)", other)),
    }

    Ok(())
}
