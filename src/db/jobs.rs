//! Factorization job rows.
//!
//! A job fixes the number being factored. Its status is implicit: no factor
//! rows means not started, all-prime rows means done. Deleting a job cascades
//! to its factor rows.
//!
//! A driver claims a job with a session-level advisory lock keyed on the job
//! id. The lock lives on one pooled connection, which the claim keeps checked
//! out until it is released. If the process dies the server ends the session
//! and drops the lock with it.

use super::{Database, JobRow};
use crate::store::Job;
use anyhow::Result;
use rug::Integer;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use uuid::Uuid;

/// Advisory lock key for a job: the high 64 bits of its id.
pub fn advisory_key(job_id: Uuid) -> i64 {
    (job_id.as_u128() >> 64) as u64 as i64
}

impl Database {
    pub async fn create_job(&self, number: &Integer) -> Result<Job> {
        let job = Job::new(number);
        sqlx::query("INSERT INTO factor_jobs (id, number, created_at) VALUES ($1, $2, $3)")
            .bind(job.id)
            .bind(job.number.to_string())
            .bind(job.created_at)
            .execute(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT id, number, created_at FROM factor_jobs WHERE id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Job::try_from).transpose()
    }

    /// Oldest unfinished job for `number`, if one exists.
    pub async fn find_job_by_number(&self, number: &Integer) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT id, number, created_at FROM factor_jobs
             WHERE number = $1
             ORDER BY created_at ASC
             LIMIT 1",
        )
        .bind(number.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Job::try_from).transpose()
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT id, number, created_at FROM factor_jobs ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    pub async fn delete_job(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM factor_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Try to take the job's advisory lock. On success the connection holding
    /// the lock is returned; pass it to [`Database::unlock_job`] to release.
    pub async fn try_lock_job(&self, job_id: Uuid) -> Result<Option<PoolConnection<Postgres>>> {
        let mut conn = self.pool.acquire().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(advisory_key(job_id))
            .fetch_one(&mut *conn)
            .await?;
        Ok(acquired.then_some(conn))
    }

    pub async fn unlock_job(mut conn: PoolConnection<Postgres>, job_id: Uuid) -> Result<()> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(advisory_key(job_id))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}
