//! CLI argument definitions using clap derive macros.

use std::time::Duration;

use clap::Parser;

use item_fetcher::{DEFAULT_CONCURRENCY, DEFAULT_MAX_ATTEMPTS};

/// Default item endpoint; matches the bundled `item-server`.
const DEFAULT_BASE_URL: &str = "http://localhost:8080/items/";

/// Fetch info for a list of item keys with bounded concurrency and retries.
///
/// Keys come from the command line, from stdin (one per line), or are
/// generated with --random-items. Repeated keys are fetched once.
#[derive(Parser, Debug)]
#[command(name = "item-fetcher")]
#[command(author, version, about)]
pub struct Args {
    /// Item keys to fetch (reads stdin when omitted)
    #[arg(value_name = "KEY", conflicts_with = "random_items")]
    pub keys: Vec<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// URL prefix; the item key is appended to it
    #[arg(long, env = "ITEM_FETCHER_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Maximum concurrent fetches (1-100)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Network tries per item, including the first (1-10)
    #[arg(short = 'a', long, default_value_t = DEFAULT_MAX_ATTEMPTS as u8, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_attempts: u8,

    /// Delays between tries in milliseconds, comma separated
    #[arg(long, value_delimiter = ',', default_value = "1000,3000,10000")]
    pub backoff_ms: Vec<u64>,

    /// Generate this many random numeric keys instead of reading input
    #[arg(long, value_name = "N")]
    pub random_items: Option<usize>,

    /// Upper bound (exclusive) for generated keys
    #[arg(long, value_name = "R", default_value_t = 380, value_parser = clap::value_parser!(u64).range(1..))]
    pub random_range: u64,

    /// Print the run report as JSON instead of one line per item
    #[arg(long)]
    pub json: bool,
}

impl Args {
    /// Backoff schedule as durations.
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        self.backoff_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }
}
