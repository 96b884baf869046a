//! # Database — PostgreSQL Factor Ledger
//!
//! Async ledger operations over `sqlx::PgPool`, plus [`PgFactorStore`], the
//! synchronous [`FactorStore`](crate::store::FactorStore) adapter the
//! factorizer and worker threads talk to.
//!
//! ## Schema
//!
//! - `factor_jobs`: id (uuid), number (decimal text), created_at
//! - `factors`: id (uuid), job_id → factor_jobs, seq_number, value (decimal text)
//!
//! Values are stored as decimal text: they are arbitrary precision and the
//! ledger never does arithmetic in SQL.
//!
//! ## Module Structure
//!
//! - [`jobs`] — job create/lookup/delete
//! - [`factors`] — append, ordered scan, delete, checkpoint transaction
//!
//! ## Sync Wrapper
//!
//! The search runs on plain OS threads (no Tokio runtime). `PgFactorStore`
//! bridges async sqlx operations into sync contexts via
//! `tokio::runtime::Handle::block_on`. This is safe because those threads are
//! not Tokio tasks — they won't deadlock the executor. The pool hands each
//! concurrently inserting worker its own connection.

mod factors;
mod jobs;

use anyhow::{anyhow, Result};
use rug::Integer;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::store::{Factor, FactorStore, Job, JobLease};
use tracing::warn;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS factor_jobs (
    id UUID PRIMARY KEY,
    number TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE TABLE IF NOT EXISTS factors (
    id UUID PRIMARY KEY,
    job_id UUID NOT NULL REFERENCES factor_jobs(id) ON DELETE CASCADE,
    seq_number BIGINT NOT NULL,
    value TEXT NOT NULL,
    UNIQUE (job_id, seq_number)
);
CREATE INDEX IF NOT EXISTS factor_jobs_number_idx ON factor_jobs (number);
";

#[derive(sqlx::FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub number: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(sqlx::FromRow)]
pub struct FactorRow {
    pub id: Uuid,
    pub job_id: Uuid,
    pub seq_number: i64,
    pub value: String,
}

fn parse_value(raw: &str) -> Result<Integer> {
    Integer::from_str_radix(raw, 10).map_err(|e| anyhow!("invalid stored integer '{}': {}", raw, e))
}

impl TryFrom<JobRow> for Job {
    type Error = anyhow::Error;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Job {
            id: row.id,
            number: parse_value(&row.number)?,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<FactorRow> for Factor {
    type Error = anyhow::Error;

    fn try_from(row: FactorRow) -> Result<Self> {
        Ok(Factor {
            id: row.id,
            job_id: row.job_id,
            seq: row.seq_number,
            value: parse_value(&row.value)?,
        })
    }
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL using the provided database URL.
    ///
    /// The URL is parsed by hand so percent-encoded credentials are decoded
    /// once and passed to sqlx verbatim. Statement caching is off so the pool
    /// also works behind transaction-mode poolers.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let url = url::Url::parse(database_url)?;
        let username = urlencoding::decode(url.username())?.into_owned();
        let password = url
            .password()
            .map(|p| urlencoding::decode(p).map(|s| s.into_owned()))
            .transpose()?;
        let mut opts = PgConnectOptions::new()
            .host(url.host_str().unwrap_or("localhost"))
            .port(url.port().unwrap_or(5432))
            .database(url.path().trim_start_matches('/'))
            .username(&username)
            .statement_cache_capacity(0);
        if let Some(ref pw) = password {
            opts = opts.password(pw);
        }
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(2))
            .connect_with(opts)
            .await?;
        Ok(Database { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the ledger tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Health check: execute `SELECT 1` to verify database connectivity.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

/// Synchronous [`FactorStore`] over a [`Database`] and a Tokio runtime handle.
#[derive(Clone)]
pub struct PgFactorStore {
    db: Database,
    rt: tokio::runtime::Handle,
}

impl PgFactorStore {
    pub fn new(db: Database, rt: tokio::runtime::Handle) -> Self {
        PgFactorStore { db, rt }
    }
}

impl FactorStore for PgFactorStore {
    fn create_job(&self, number: &Integer) -> Result<Job> {
        self.rt.block_on(self.db.create_job(number))
    }

    fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        self.rt.block_on(self.db.get_job(job_id))
    }

    fn find_job_by_number(&self, number: &Integer) -> Result<Option<Job>> {
        self.rt.block_on(self.db.find_job_by_number(number))
    }

    fn list_jobs(&self) -> Result<Vec<Job>> {
        self.rt.block_on(self.db.list_jobs())
    }

    fn delete_job(&self, job_id: Uuid) -> Result<()> {
        self.rt.block_on(self.db.delete_job(job_id))
    }

    fn append_factor(&self, job_id: Uuid, value: &Integer) -> Result<Factor> {
        self.rt.block_on(self.db.append_factor(job_id, value))
    }

    fn get_factor_after(&self, job_id: Uuid, after_seq: i64) -> Result<Option<Factor>> {
        self.rt.block_on(self.db.get_factor_after(job_id, after_seq))
    }

    fn get_most_recent_factor(&self, job_id: Uuid) -> Result<Option<Factor>> {
        self.rt.block_on(self.db.get_most_recent_factor(job_id))
    }

    fn delete_factor(&self, factor_id: Uuid) -> Result<()> {
        self.rt.block_on(self.db.delete_factor(factor_id))
    }

    fn delete_all_factors(&self, job_id: Uuid) -> Result<()> {
        self.rt.block_on(self.db.delete_all_factors(job_id))
    }

    fn split_factor(
        &self,
        job_id: Uuid,
        replaced: Option<&Factor>,
        divisor: &Integer,
        quotient: &Integer,
    ) -> Result<(Factor, Factor)> {
        self.rt.block_on(
            self.db
                .split_factor(job_id, replaced.map(|f| f.id), divisor, quotient),
        )
    }

    fn try_lock_job(&self, job_id: Uuid) -> Result<Option<JobLease>> {
        let Some(conn) = self.rt.block_on(self.db.try_lock_job(job_id))? else {
            return Ok(None);
        };
        let rt = self.rt.clone();
        Ok(Some(JobLease::new(job_id, move || {
            if let Err(e) = rt.block_on(Database::unlock_job(conn, job_id)) {
                warn!(job_id = %job_id, error = %e, "Failed to release job lock");
            }
        })))
    }
}
