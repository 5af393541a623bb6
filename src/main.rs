use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use drip_limiter::config::{LimiterConfig, RateConfig};
use drip_limiter::{Limiter, TimeUnit};

/// Run a number of throttled acquisitions against a leaky bucket limiter.
#[derive(Debug, Parser)]
#[command(name = "drip", version, about)]
struct Args {
    /// YAML configuration file; overrides the rate flags below
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Namespace for the limiter's buckets
    #[arg(short, long, default_value = "drip")]
    identifier: String,

    /// Rate ceiling such as `5/second` or `1000/hour`; repeatable
    #[arg(short, long = "rate", value_parser = parse_rate, default_value = "5/second")]
    rates: Vec<(f64, TimeUnit)>,

    /// Space admissions out uniformly instead of allowing bursts
    #[arg(long)]
    no_burst: bool,

    /// Number of acquisitions to perform
    #[arg(short = 'n', long, default_value_t = 10)]
    requests: u32,

    /// Cost of each acquisition
    #[arg(long, default_value_t = 1.0)]
    cost: f64,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn parse_rate(value: &str) -> Result<(f64, TimeUnit), String> {
    let (limit, unit) = value
        .split_once('/')
        .ok_or_else(|| format!("expected <limit>/<unit>, got {:?}", value))?;
    let limit: f64 = limit
        .trim()
        .parse()
        .map_err(|e| format!("invalid limit {:?}: {}", limit, e))?;
    let unit = TimeUnit::parse(unit).ok_or_else(|| format!("unknown time unit {:?}", unit))?;
    Ok((limit, unit))
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => LimiterConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => LimiterConfig::new(
            args.identifier.clone(),
            args.rates
                .iter()
                .map(|&(limit, unit)| RateConfig {
                    limit,
                    unit,
                    allow_burst: !args.no_burst,
                })
                .collect(),
        ),
    };

    let limiter = Limiter::from_config(&config)
        .await
        .context("failed to build limiter")?;
    info!("{}", limiter);

    let start = Instant::now();
    let outcome = tokio::select! {
        result = run(&limiter, args.requests, args.cost) => result,
        _ = shutdown_signal() => {
            warn!("Interrupted before all requests were admitted");
            Ok(())
        }
    };

    limiter.close().await;
    outcome?;

    info!(
        requests = args.requests,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Done"
    );
    Ok(())
}

async fn run(limiter: &Limiter, requests: u32, cost: f64) -> anyhow::Result<()> {
    let start = Instant::now();
    for request in 1..=requests {
        limiter.acquire(cost).await?;
        info!(
            request,
            at_ms = start.elapsed().as_millis() as u64,
            "Admitted"
        );
    }
    Ok(())
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
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
