//! Failure-injecting item server for exercising the fetcher.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use clap::builder::TypedValueParser;
use item_fetcher::server::{DEFAULT_ERROR_RATE, DEFAULT_MAX_IN_FLIGHT, ServerConfig, serve};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Serve random item info with rate limiting and injected errors.
#[derive(Parser, Debug)]
#[command(name = "item-server")]
#[command(author, version, about)]
struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    quiet: bool,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Concurrent requests served before answering 429
    #[arg(long, default_value_t = DEFAULT_MAX_IN_FLIGHT, value_parser = clap::value_parser!(u16).range(1..).map(usize::from))]
    max_in_flight: usize,

    /// Fraction of requests answered with 404 (0.0-1.0)
    #[arg(long, default_value_t = DEFAULT_ERROR_RATE, value_parser = parse_rate)]
    error_rate: f64,

    /// Time each request is held before responding, in milliseconds
    #[arg(long, default_value_t = 2000)]
    processing_delay_ms: u64,
}

fn parse_rate(value: &str) -> Result<f64, String> {
    let rate: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(format!("{rate} is not between 0.0 and 1.0"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let address = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    let config = ServerConfig {
        max_in_flight: args.max_in_flight,
        error_rate: args.error_rate,
        processing_delay: Duration::from_millis(args.processing_delay_ms),
    };

    tokio::select! {
        served = serve(listener, config) => served.context("item server failed")?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    Ok(())
}
