use clap::Parser;
use quibble_core::{InboundMessage, QuibbleConfig};
use quibble_reasoning::SessionOrchestrator;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "QUIBBLE_CONFIG", default_value = "quibble.toml")]
    config: PathBuf,

    /// Override the SQLite database path
    #[arg(long)]
    db: Option<String>,

    /// Override the generative provider ("openai" or "mock")
    #[arg(long)]
    provider: Option<String>,

    /// User id attached to lines read from stdin
    #[arg(long, default_value = "local")]
    user: String,

    /// Display name attached to lines read from stdin
    #[arg(long, default_value = "friend")]
    name: String,

    /// Emit logs as JSON
    #[arg(long, env = "QUIBBLE_LOG_JSON")]
    json_logs: bool,

    /// Also write logs to daily-rotated files in this directory
    #[arg(long, env = "QUIBBLE_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

/// Logs go to stderr so stdout carries only replies. The returned guard
/// must live until exit to flush the file writer.
fn init_logging(json: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "quibble.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if json {
        registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(io::stderr)).init();
    }
    guard
}

/// Write an optional line of output followed by the input prompt.
fn emit(line: Option<&str>) -> io::Result<()> {
    let mut out = io::stdout().lock();
    if let Some(line) = line {
        writeln!(out, "{}", line)?;
    }
    write!(out, "> ")?;
    out.flush()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let _log_guard = init_logging(args.json_logs, args.log_dir.as_deref());

    let mut config = QuibbleConfig::load_or_default(&args.config);
    if let Some(db) = args.db {
        config.storage.db_path = db;
    }
    if let Some(provider) = args.provider {
        config.llm.provider = provider;
    }

    info!("Initializing Quibble...");
    let session = SessionOrchestrator::from_config(&config).await?;
    session.start().await?;

    if let Err(e) = emit(Some(
        "Quibble is online. Type 'quit' to exit, 'stats' for a maintenance report.",
    )) {
        warn!("Stdout unavailable: {}", e);
    }

    // Every exit from the loop falls through to shutdown
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read stdin, shutting down: {}", e);
                        break;
                    }
                };
                let trimmed = line.trim();

                let output = match trimmed {
                    "quit" | "exit" => break,
                    "" => None,
                    "stats" => Some(match session.flush_maintenance().await {
                        Some(report) => format!(
                            "{} interactions, {} throttled, error rate {:.1}%, mood {:.2}",
                            report.metrics.total_interactions,
                            report.metrics.throttled_count,
                            report.metrics.error_rate() * 100.0,
                            report.mood
                        ),
                        None => "Maintenance is not running.".to_string(),
                    }),
                    _ => {
                        let reply = session
                            .handle(InboundMessage::new(&args.user, &args.name, trimmed))
                            .await;
                        Some(format!("\nQuibble: {}\n", reply.text))
                    }
                };
                if let Err(e) = emit(output.as_deref()) {
                    error!("Failed to write to stdout, shutting down: {}", e);
                    break;
                }
            }
        }
    }

    session.shutdown().await?;
    info!("Goodbye");
    Ok(())
}
