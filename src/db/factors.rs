//! Factor ledger rows — append, ordered scan, delete, checkpoint.
//!
//! Seq numbers are assigned inside the insert as `MAX(seq_number) + 1` for the
//! job. The job row is locked `FOR UPDATE` first so concurrent appends from
//! several workers serialize per job instead of colliding on the unique key.

use super::{Database, FactorRow};
use crate::store::Factor;
use anyhow::{anyhow, bail, Result};
use rug::Integer;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

async fn append_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    job_id: Uuid,
    value: &Integer,
) -> Result<Factor> {
    let locked: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM factor_jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_optional(&mut **tx)
            .await?;
    if locked.is_none() {
        return Err(anyhow!("unknown job {}", job_id));
    }

    let id = Uuid::new_v4();
    let row = sqlx::query_as::<_, FactorRow>(
        "INSERT INTO factors (id, job_id, seq_number, value)
         SELECT $1, $2, COALESCE(MAX(seq_number), 0) + 1, $3
         FROM factors WHERE job_id = $2
         RETURNING id, job_id, seq_number, value",
    )
    .bind(id)
    .bind(job_id)
    .bind(value.to_string())
    .fetch_one(&mut **tx)
    .await?;
    Factor::try_from(row)
}

impl Database {
    pub async fn append_factor(&self, job_id: Uuid, value: &Integer) -> Result<Factor> {
        let mut tx = self.pool.begin().await?;
        let factor = append_in_tx(&mut tx, job_id, value).await?;
        tx.commit().await?;
        Ok(factor)
    }

    /// The row with the smallest seq number greater than `after_seq`.
    pub async fn get_factor_after(&self, job_id: Uuid, after_seq: i64) -> Result<Option<Factor>> {
        let row = sqlx::query_as::<_, FactorRow>(
            "SELECT id, job_id, seq_number, value FROM factors
             WHERE job_id = $1 AND seq_number > $2
             ORDER BY seq_number ASC
             LIMIT 1",
        )
        .bind(job_id)
        .bind(after_seq)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Factor::try_from).transpose()
    }

    pub async fn get_most_recent_factor(&self, job_id: Uuid) -> Result<Option<Factor>> {
        let row = sqlx::query_as::<_, FactorRow>(
            "SELECT id, job_id, seq_number, value FROM factors
             WHERE job_id = $1
             ORDER BY seq_number DESC
             LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Factor::try_from).transpose()
    }

    pub async fn delete_factor(&self, factor_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM factors WHERE id = $1")
            .bind(factor_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_all_factors(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM factors WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Two-row checkpoint in one transaction: drop the composite row being
    /// split, then append the divisor and the quotient. Rolls back without
    /// writing if the composite row is already gone.
    pub async fn split_factor(
        &self,
        job_id: Uuid,
        replaced: Option<Uuid>,
        divisor: &Integer,
        quotient: &Integer,
    ) -> Result<(Factor, Factor)> {
        let mut tx = self.pool.begin().await?;
        if let Some(factor_id) = replaced {
            let deleted = sqlx::query("DELETE FROM factors WHERE id = $1 AND job_id = $2")
                .bind(factor_id)
                .bind(job_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            if deleted != 1 {
                tx.rollback().await?;
                bail!("factor {} of job {} was already replaced", factor_id, job_id);
            }
        }
        let first = append_in_tx(&mut tx, job_id, divisor).await?;
        let second = append_in_tx(&mut tx, job_id, quotient).await?;
        tx.commit().await?;
        Ok((first, second))
    }
}
