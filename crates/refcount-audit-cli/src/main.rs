//! refcount-audit CLI - audit blob reference counters against their referencing tables.

use clap::{Parser, Subcommand};
use refcount_audit::config::MAX_CONCURRENT_RECOUNTS;
use refcount_audit::{
    AuditError, AuditStatus, Config, Mismatch, MismatchSink, Orchestrator,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "refcount-audit")]
#[command(about = "Audit stored blob reference counts against a recount of every referencing table")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output mismatches as JSON lines and the result as JSON
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Timeout in seconds for graceful shutdown (default: 60)
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full audit
    Run {
        /// Override rows per range
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        chunk_size: Option<u64>,

        /// Override number of ranges checked concurrently
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_CONCURRENT_RECOUNTS as u64))]
        concurrent_recounts: Option<u64>,

        /// Dry run: sample the blob table and show the range plan without recounting
        #[arg(long)]
        dry_run: bool,

        /// Exit with an error when any mismatch is found
        #[arg(long)]
        fail_on_mismatch: bool,
    },

    /// Test database connections
    HealthCheck,
}

/// Prints each mismatch to stdout as soon as its range completes.
struct StdoutSink {
    json: bool,
    id_column: String,
    count_column: String,
}

impl MismatchSink for StdoutSink {
    fn report(&self, mismatch: &Mismatch) {
        if self.json {
            match serde_json::to_string(mismatch) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to serialize mismatch {}: {}", mismatch.blob_id, e),
            }
        } else {
            println!("{}", mismatch.report_line(&self.id_column, &self.count_column));
        }
    }
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

async fn run() -> Result<(), AuditError> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli.verbosity, &cli.log_format).map_err(AuditError::Config)?;

    // Load configuration, auto-tuning whatever the file leaves unset
    let mut config = Config::load(&cli.config)?.with_auto_tuning();
    info!("Loaded configuration from {:?}", cli.config);

    // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
    let cancel_token = setup_signal_handler(cli.shutdown_timeout).await?;

    match cli.command {
        Commands::Run {
            chunk_size,
            concurrent_recounts,
            dry_run,
            fail_on_mismatch,
        } => {
            // Apply overrides
            if let Some(size) = chunk_size {
                config.audit.chunk_size = Some(size);
            }
            if let Some(n) = concurrent_recounts {
                config.audit.concurrent_recounts = Some(n as usize);
            }

            let sink = Arc::new(StdoutSink {
                json: cli.output_json,
                id_column: config.blob_table.id_column.clone(),
                count_column: config.blob_table.count_column.clone(),
            });

            let mut orchestrator = Orchestrator::new(config).await?;

            if dry_run {
                let ranges = orchestrator.plan().await?;
                if cli.output_json {
                    let plan = serde_json::json!({
                        "ranges_total": ranges.len(),
                        "ranges": ranges.iter().collect::<Vec<_>>(),
                    });
                    println!("{}", serde_json::to_string_pretty(&plan)?);
                } else {
                    println!("Range plan ({} ranges):", ranges.len());
                    for range in &ranges {
                        println!("  {}", range);
                    }
                }
                orchestrator.close().await;
                return Ok(());
            }

            // Enable progress reporting if requested
            let progress_printer = if cli.progress {
                let (tx, mut rx) = mpsc::channel(64);
                orchestrator = orchestrator.with_progress(tx);
                Some(tokio::spawn(async move {
                    while let Some(update) = rx.recv().await {
                        if let Ok(line) = serde_json::to_string(&update) {
                            eprintln!("{}", line);
                        }
                    }
                }))
            } else {
                None
            };

            let shutdown_timeout = Duration::from_secs(cli.shutdown_timeout);
            let result = tokio::select! {
                result = orchestrator.run(cancel_token.clone(), sink) => result,
                _ = async {
                    cancel_token.cancelled().await;
                    tokio::time::sleep(shutdown_timeout).await;
                } => {
                    warn!("In-flight ranges did not finish within {}s", cli.shutdown_timeout);
                    Err(AuditError::Cancelled)
                }
            };
            orchestrator.close().await;
            drop(orchestrator);
            if let Some(printer) = progress_printer {
                let _ = printer.await;
            }
            let result = result?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("\nAudit {}!", match result.status {
                    AuditStatus::Completed => "completed",
                    AuditStatus::CompletedWithSkips => "completed with skipped ranges",
                    AuditStatus::Cancelled => "cancelled",
                });
                println!("  Run ID: {}", result.run_id);
                println!("  Duration: {:.2}s", result.duration_seconds);
                println!(
                    "  Ranges: {}/{}",
                    result.ranges_checked, result.ranges_total
                );
                println!("  Mismatches: {}", result.mismatches_found);
                if !result.ranges_skipped.is_empty() {
                    println!("  Skipped ranges:");
                    for range in &result.ranges_skipped {
                        println!("    {}", range);
                    }
                }
            }

            if result.status == AuditStatus::Cancelled {
                return Err(AuditError::Cancelled);
            }
            if fail_on_mismatch && result.mismatches_found > 0 {
                return Err(AuditError::MismatchesFound(result.mismatches_found));
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.health_check().await;
            orchestrator.close().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                for db in &result.databases {
                    println!(
                        "  {}: {} ({}ms)",
                        db.database,
                        if db.connected { "OK" } else { "FAILED" },
                        db.latency_ms
                    );
                    if let Some(ref err) = db.error {
                        println!("    Error: {}", err);
                    }
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(AuditError::database(
                    "one or more databases are unreachable",
                    "health check",
                ));
            }
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("unknown verbosity '{}'", other)),
    };

    // Logs go to stderr; stdout carries the mismatch report
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format '{}'", other)),
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
async fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, AuditError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!(
            "\nReceived {}. Finishing in-flight ranges (timeout: {}s)...",
            name, shutdown_timeout
        );
        token.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler(_shutdown_timeout: u64) -> Result<CancellationToken, AuditError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing in-flight ranges...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
