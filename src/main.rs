//! CLI entry point for the item fetcher.

use std::io::{self, IsTerminal, Read};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use item_fetcher::{EngineConfig, EngineError, FetchEngine, HttpClient, ItemOutcome, ItemReport};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
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

    // Logs go to stderr; stdout carries item lines or the JSON report
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    debug!(?args, "CLI arguments parsed");

    let keys: Vec<String> = if let Some(count) = args.random_items {
        let mut rng = rand::thread_rng();
        (0..count)
            .map(|_| rng.gen_range(0..args.random_range).to_string())
            .collect()
    } else if !args.keys.is_empty() {
        args.keys.clone()
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        parse_keys(&buffer)
    } else {
        info!("No input provided. Pipe item keys via stdin or pass as arguments.");
        info!("Example: echo '42' | item-fetcher");
        return Ok(());
    };

    if keys.is_empty() {
        info!("No item keys found in input");
        return Ok(());
    }

    let config = EngineConfig::new(
        usize::from(args.concurrency),
        u32::from(args.max_attempts),
        args.backoff_schedule(),
    )?;
    let engine = FetchEngine::new(config, Arc::new(HttpClient::new()))?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling run");
                cancel.cancel();
            }
        }
    });

    info!(keys = keys.len(), base_url = %args.base_url, "Fetching items");

    let mut session = engine.start(&args.base_url, &cancel);

    // Item lines are printed as items finish; --json waits for the full report
    let printer = if args.json {
        None
    } else {
        session
            .take_item_reports()
            .map(|feed| tokio::spawn(print_items(feed)))
    };

    match session.submit_all(keys).await {
        Ok(accepted) => debug!(accepted, "all keys submitted"),
        Err(EngineError::Cancelled) => debug!("submission interrupted by cancellation"),
        Err(e) => return Err(e.into()),
    }
    let report = session.finish().await?;

    if let Some(printer) = printer {
        printer.await.context("item printer failed")?;
    }

    if args.json {
        let json = serde_json::to_string_pretty(&report).context("failed to encode report")?;
        println!("{json}");
    } else {
        for item in report
            .items
            .iter()
            .filter(|item| item.outcome == ItemOutcome::Cancelled)
        {
            debug!(key = %item.key, attempts = item.attempts, "Fetch cancelled");
        }
    }

    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        cancelled = report.cancelled_items(),
        duplicates = report.duplicates,
        retried = report.retried,
        calls = report.calls,
        "Time taken = {:?}",
        report.elapsed
    );

    Ok(())
}

/// One key per non-empty line, surrounding whitespace removed.
fn parse_keys(input: &str) -> Vec<String> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

async fn print_items(mut feed: mpsc::UnboundedReceiver<ItemReport>) {
    while let Some(item) = feed.recv().await {
        match &item.outcome {
            ItemOutcome::Succeeded { body } => {
                println!("Info for item[ {} ] received as [ {} ]", item.key, body);
            }
            ItemOutcome::Failed {
                last_status,
                last_error,
            } => warn!(
                key = %item.key,
                attempts = item.attempts,
                ?last_status,
                ?last_error,
                "Fetch failed"
            ),
            ItemOutcome::Cancelled => debug!(key = %item.key, "Fetch cancelled"),
        }
    }
}
