use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::config::{AlgorithmConfig, LogFormat, LoggingConfig, TurnstileConfig};
use turnstile::ratelimit::{Clock, RateLimiter, SystemClock};

/// Admit or deny client keys read from stdin, one per line.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter directive, overriding both `RUST_LOG` and the configured level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TurnstileConfig::from_file(path)?,
        None => TurnstileConfig::default(),
    };

    init_tracing(cli.log_level.as_deref(), &config.logging);

    info!("Starting Turnstile");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(algorithm = ?config.algorithm, "Configuration loaded");

    let limiter = RateLimiter::new(config.registry.ttl(), config.registry.cleanup_interval())?;

    tokio::select! {
        result = admit_lines(&limiter, &config.algorithm) => result?,
        _ = shutdown_signal() => {}
    }

    info!(records = limiter.len(), "Turnstile stopped");
    Ok(())
}

/// Initialize tracing on stderr so stdout only carries decisions.
fn init_tracing(cli_level: Option<&str>, logging: &LoggingConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli_level, logging))
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Fmt => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Pick the log filter: `--log-level`, then `RUST_LOG`, then the config file.
fn log_filter(cli_level: Option<&str>, logging: &LoggingConfig) -> EnvFilter {
    match cli_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&logging.level)),
    }
}

/// Answer each stdin line with `<key>\tallow` or `<key>\tdeny`.
async fn admit_lines(limiter: &RateLimiter, algorithm: &AlgorithmConfig) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let key = line.trim();
        if key.is_empty() {
            continue;
        }

        let allowed = limiter.allow_or_add_with(key, || algorithm.build(Arc::clone(&clock)))?;
        let decision = if allowed { "allow" } else { "deny" };

        stdout
            .write_all(format!("{}\t{}\n", key, decision).as_bytes())
            .await?;
        stdout.flush().await?;
    }

    info!("Input closed");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
