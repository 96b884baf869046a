//! # CLI Execution Functions
//!
//! Extracted from `main.rs` to keep the entry point slim. Contains the
//! execution logic for each subcommand: config resolution, ledger selection,
//! the factorization run with its status reporter, result output, job listing
//! and prime-pair enumeration.

use anyhow::{anyhow, Context, Result};
use cofactor::config::{self, FactorizeConfig, Overrides, SLACK_PER_WORKER};
use cofactor::db::{Database, PgFactorStore};
use cofactor::divisor::DivisorSearch;
use cofactor::factorizer::Factorizer;
use cofactor::ledger::LedgerStore;
use cofactor::pairs::find_prime_pairs;
use cofactor::primality::PrimalityOracle;
use cofactor::progress::Progress;
use cofactor::store::{FactorStore, Job, MemoryStore};
use cofactor::{format_result_line, parse_number, CancellationToken, FactorizeError};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

use super::{Cli, StoreKind};

/// A ledger backend plus the runtime it needs, if any.
struct OpenStore {
    store: Box<dyn FactorStore>,
    // Dropped after `store`: the PostgreSQL adapter borrows its handle
    _rt: Option<tokio::runtime::Runtime>,
}

// ── Setup ───────────────────────────────────────────────────────

fn resolve_config(cli: &Cli) -> Result<FactorizeConfig> {
    let file = config::load_config(cli.config.as_deref())?;
    let flags = Overrides {
        workers: cli.workers,
        mr_rounds: cli.mr_rounds,
        status_interval_secs: cli.status_interval,
        early_stop_slack: cli.slack.flatten(),
        output_path: cli.output.clone(),
        ledger_path: cli.ledger.clone(),
    };
    let mut config = FactorizeConfig::resolve(file, flags)?;
    if let Some(None) = cli.slack {
        config.early_stop_slack = Some(SLACK_PER_WORKER * config.workers as u64);
    }
    Ok(config)
}

fn open_store(cli: &Cli, config: &FactorizeConfig) -> Result<OpenStore> {
    let kind = cli.store.unwrap_or(if cli.database_url.is_some() {
        StoreKind::Postgres
    } else {
        StoreKind::Ledger
    });
    match kind {
        StoreKind::Memory => Ok(OpenStore {
            store: Box::new(MemoryStore::new()),
            _rt: None,
        }),
        StoreKind::Ledger => {
            let store = LedgerStore::open(&config.ledger_path)?;
            info!(path = %config.ledger_path.display(), "Using ledger file");
            Ok(OpenStore {
                store: Box::new(store),
                _rt: None,
            })
        }
        StoreKind::Postgres => {
            let database_url = cli.database_url.as_deref().ok_or_else(|| {
                anyhow!("DATABASE_URL is required (set via --database-url or env)")
            })?;
            let rt = tokio::runtime::Runtime::new()?;
            let db = rt.block_on(async {
                // One connection per worker, the driver, and the held job lock
                let db = Database::connect(database_url, config.workers as u32 + 2).await?;
                db.ensure_schema().await?;
                Ok::<_, anyhow::Error>(db)
            })?;
            info!("Using PostgreSQL ledger");
            let store = PgFactorStore::new(db, rt.handle().clone());
            Ok(OpenStore {
                store: Box::new(store),
                _rt: Some(rt),
            })
        }
    }
}

/// Size the global Rayon pool. `None` or 0 uses all logical cores.
pub fn configure_rayon(threads: Option<usize>) {
    let num_threads = threads.unwrap_or(0);
    if num_threads == 0 {
        return;
    }
    match rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
    {
        Ok(()) => info!(threads = num_threads, "Rayon thread pool configured"),
        Err(e) => warn!(error = %e, "Could not configure rayon thread pool"),
    }
}

/// Convert library errors into a message naming the failure category.
fn user_error(e: FactorizeError) -> anyhow::Error {
    let category = match e.category() {
        "input" => "Invalid input",
        "store" => "Ledger failure",
        "aborted" => "Aborted",
        "busy" => "Job in use",
        _ => "Inconsistent ledger",
    };
    anyhow!("{}: {}", category, e)
}

// ── Factorization ───────────────────────────────────────────────

pub fn run_factorize(cli: &Cli, number: &str) -> Result<()> {
    // Validate before touching the ledger so bad input leaves no state
    let n = parse_number(number).map_err(user_error)?;
    let config = resolve_config(cli)?;
    let opened = open_store(cli, &config)?;
    let store = opened.store.as_ref();

    let job = match store
        .find_job_by_number(&n)
        .map_err(|e| user_error(FactorizeError::Store(e)))?
    {
        Some(job) => {
            info!(job_id = %job.id, "Resuming unfinished job");
            job
        }
        None => store
            .create_job(&n)
            .map_err(|e| user_error(FactorizeError::Store(e)))?,
    };
    factorize_job(store, &job, &config)
}

pub fn run_resume(cli: &Cli, job_id: uuid::Uuid) -> Result<()> {
    let config = resolve_config(cli)?;
    let opened = open_store(cli, &config)?;
    let store = opened.store.as_ref();
    let job = store
        .get_job(job_id)
        .map_err(|e| user_error(FactorizeError::Store(e)))?
        .ok_or_else(|| anyhow!("No unfinished job with id {}", job_id))?;
    factorize_job(store, &job, &config)
}

fn factorize_job(store: &dyn FactorStore, job: &Job, config: &FactorizeConfig) -> Result<()> {
    let start = Instant::now();
    let oracle = PrimalityOracle::new(config.mr_rounds);
    let search = DivisorSearch::new(config.workers, config.stop_policy());

    println!(
        "Factorizing {} ({} bits)",
        job.number,
        job.number.significant_bits()
    );
    info!(
        job_id = %job.id,
        workers = config.workers,
        mr_rounds = config.mr_rounds,
        policy = ?config.stop_policy(),
        "cofactor starting"
    );

    let progress = Progress::new();
    let reporter = progress.start_reporter(config.status_interval());
    let result = Factorizer::new(store, search, oracle, progress.clone()).run(job);
    progress.stop();
    let _ = reporter.join();

    let factors = result.map_err(user_error)?;
    let line = format_result_line(&job.number, &factors);
    println!("{}", line);
    append_output(&config.output_path, &line)?;

    store
        .delete_job(job.id)
        .map_err(|e| user_error(FactorizeError::Store(e)))?;
    println!("Execution time: {:?}", start.elapsed());
    Ok(())
}

fn append_output(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening output file {}", path.display()))?;
    writeln!(file, "{}", line).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

// ── Jobs ────────────────────────────────────────────────────────

pub fn run_jobs(cli: &Cli) -> Result<()> {
    let config = resolve_config(cli)?;
    let opened = open_store(cli, &config)?;
    let store = opened.store.as_ref();
    let jobs = store
        .list_jobs()
        .map_err(|e| user_error(FactorizeError::Store(e)))?;
    if jobs.is_empty() {
        println!("No unfinished jobs");
        return Ok(());
    }
    for job in jobs {
        let rows = store
            .factors(job.id)
            .map_err(|e| user_error(FactorizeError::Store(e)))?;
        let values: Vec<String> = rows.iter().map(|f| f.value.to_string()).collect();
        println!(
            "{}  {}  {}  [{}]",
            job.id,
            job.created_at.format("%Y-%m-%d %H:%M:%S"),
            job.number,
            values.join(",")
        );
    }
    Ok(())
}

// ── Prime pairs ─────────────────────────────────────────────────

pub fn run_pairs(cli: &Cli, number: &str, limit: usize) -> Result<()> {
    let n = parse_number(number).map_err(user_error)?;
    let config = resolve_config(cli)?;
    let opened = open_store(cli, &config)?;
    let store = opened.store.as_ref();
    let oracle = PrimalityOracle::new(config.mr_rounds);

    let job = store
        .create_job(&n)
        .map_err(|e| user_error(FactorizeError::Store(e)))?;
    let result = find_prime_pairs(
        store,
        &job,
        limit,
        config.workers,
        oracle,
        &CancellationToken::new(),
    );
    if let Err(e) = store.delete_job(job.id) {
        warn!(job_id = %job.id, error = %format!("{:#}", e), "Could not delete pair job");
    }
    let pairs = result.map_err(user_error)?;

    if pairs.is_empty() {
        println!("{} : no prime pairs", n);
    }
    for pair in &pairs {
        println!("{} : {}", n, pair.line());
    }
    Ok(())
}
