//! # Main — CLI Entry Point
//!
//! Routes subcommands to the execution functions in `cli.rs`. Handles the
//! shared concerns: `.env` loading, logging setup, and the Rayon thread pool.
//!
//! ## Subcommands
//!
//! - `run <N>`: factor N, resuming an existing job for N if the ledger has one.
//! - `resume --job <uuid>`: continue a specific job.
//! - `jobs`: list unfinished jobs.
//! - `pairs <N>`: enumerate prime pairs `p × q = N`.
//!
//! ## Global Options
//!
//! - `--database-url` / `DATABASE_URL`: PostgreSQL ledger. Without it the
//!   ledger is a local file (`--ledger`).
//! - `--config`: TOML file (default `cofactor.toml` when present).
//! - `--workers`, `--mr-rounds`, `--status-interval`, `--slack`, `--output`:
//!   override the config file.
//! - `--threads`: Rayon thread pool size (0 = all cores).

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(
    name = "cofactor",
    about = "Factor arbitrary-precision integers with a resumable parallel trial-division search"
)]
struct Cli {
    /// PostgreSQL connection URL (or set DATABASE_URL env var)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Ledger backend (defaults to postgres when a database URL is set, else ledger)
    #[arg(long, value_enum)]
    store: Option<StoreKind>,

    /// Path to the factor ledger file
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// Path to a TOML config file (defaults to ./cofactor.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Divisor-search worker threads (default: 2 x available cores)
    #[arg(long)]
    workers: Option<usize>,

    /// Miller-Rabin rounds for primality testing (default: 20)
    #[arg(long)]
    mr_rounds: Option<u32>,

    /// Seconds between progress lines (default: 60)
    #[arg(long)]
    status_interval: Option<u64>,

    /// Stop shortly after the first divisor instead of proving the minimum.
    /// `--slack=N` sets the extra candidates to dispatch (default: 4 x workers)
    #[arg(long, num_args = 0..=1, require_equals = true)]
    slack: Option<Option<u64>>,

    /// File the result line is appended to
    #[arg(long)]
    output: Option<PathBuf>,

    /// Number of rayon worker threads (defaults to all logical cores)
    #[arg(long)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Ledger,
    Memory,
    Postgres,
}

#[derive(Subcommand)]
enum Commands {
    /// Factor a base-10 integer, resuming any unfinished job for it
    Run {
        /// The number to factor
        number: String,
    },
    /// Continue an unfinished job by id
    Resume {
        /// Job id as printed by `jobs`
        #[arg(long)]
        job: uuid::Uuid,
    },
    /// List unfinished jobs and their ledger rows
    Jobs,
    /// Find prime pairs p x q = N with p <= sqrt(N)
    Pairs {
        /// The number to split
        number: String,
        /// Stop after this many prime divisors
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Initialize structured logging: LOG_FORMAT=json for log shipping, human-readable otherwise
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();
    cli::configure_rayon(cli.threads);

    match &cli.command {
        Commands::Run { number } => cli::run_factorize(&cli, number),
        Commands::Resume { job } => cli::run_resume(&cli, *job),
        Commands::Jobs => cli::run_jobs(&cli),
        Commands::Pairs { number, limit } => cli::run_pairs(&cli, number, *limit),
    }
}
