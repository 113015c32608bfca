use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::BufReader;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use floodgate::admission::AdmissionController;
use floodgate::clock::SystemClock;
use floodgate::config::{Algorithm, FloodgateConfig};
use floodgate::report::{analyze, Report, RequestLog};
use floodgate::sim::{format_decision, replay, ReplayScript, Session};

/// Rate limiter simulator with abuse detection.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Bucket algorithm, overriding the configuration file
    #[arg(long, global = true)]
    algorithm: Option<Algorithm>,

    /// Diagnostic log format (written to stderr)
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Format of the end-of-run analysis
    #[arg(long, value_enum, default_value_t = ReportFormat::Text, global = true)]
    report_format: ReportFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read entity ids from stdin, one request per line
    Simulate,
    /// Replay a script of `<offset_secs> <entity>` lines on a simulated clock
    Replay {
        /// Path to the script
        script: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Starting Floodgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => FloodgateConfig::from_file(path)?,
        None => FloodgateConfig::default(),
    };
    if let Some(algorithm) = cli.algorithm {
        config.engine.algorithm = algorithm;
    }
    config.validate()?;
    info!(algorithm = %config.engine.algorithm, "Configuration loaded");

    let report = match cli.command {
        Command::Simulate => simulate(config).await?,
        Command::Replay { script } => replay_script(config, &script)?,
    };

    match cli.report_format {
        ReportFormat::Text => println!("\n{}", report),
        ReportFormat::Json => println!("{}", report.to_json()?),
    }

    info!("Floodgate stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn simulate(config: FloodgateConfig) -> anyhow::Result<Report> {
    let controller = AdmissionController::new(config.engine, Arc::new(SystemClock))?;
    let mut session = Session::new(Arc::new(controller), RequestLog::from_config(&config.log));

    println!("Rate Limiter Simulator");
    println!("Type a user id to make a request, or 'exit'");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    session
        .run_with_shutdown(stdin, &mut stdout, shutdown_signal())
        .await?;

    Ok(session.report())
}

fn replay_script(config: FloodgateConfig, path: &Path) -> anyhow::Result<Report> {
    let script = ReplayScript::from_file(path)?;
    let outcome = replay(&script, config.engine, config.log.capacity, chrono::Utc::now())?;

    for (step, decision) in &outcome.decisions {
        println!(
            "[+{:.3}s] {}",
            step.offset.as_secs_f64(),
            format_decision(&step.entity, decision)
        );
    }

    Ok(analyze(&outcome.log))
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, ending session");
        }
        _ = terminate => {
            info!("Received SIGTERM, ending session");
        }
    }
}
