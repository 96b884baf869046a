//! # Store — Factor Ledger Contract
//!
//! The factorizer persists every discovered factor into an append-only ledger
//! keyed by job. The ledger is a working scratchpad: once the caller has read
//! out the final prime list the job and its rows are deleted.
//!
//! ## Contract
//!
//! - `append_factor` assigns `seq = max(seq) + 1` for the job (1 for the first
//!   row). Only the most recent row is ever deleted by the factorizer, so seq
//!   numbers stay gap-free.
//! - `get_factor_after(job, s)` returns the row with the smallest seq > s.
//!   Repeated calls give an ordered scan in discovery order.
//! - `split_factor` is the two-row checkpoint. The provided implementation is a
//!   plain delete + append + append; adapters that can make it atomic override it.
//!   It fails, and writes nothing, when the row being replaced is no longer the
//!   most recent row of the job.
//! - `try_lock_job` claims a job for one driver. `None` means another driver
//!   (thread or process) already holds it. The claim is released when the
//!   returned [`JobLease`] is dropped.
//!
//! All methods are synchronous: the search runs on OS threads, not async tasks.
//!
//! ## Adapters
//!
//! - [`MemoryStore`] — in-process maps, used by tests and `--store memory`.
//! - [`crate::ledger::LedgerStore`] — checksummed JSON ledger file.
//! - [`crate::db::PgFactorStore`] — PostgreSQL via sqlx.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use rug::Integer;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: Uuid,
    pub number: Integer,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(number: &Integer) -> Self {
        Job {
            id: Uuid::new_v4(),
            number: number.clone(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Factor {
    pub id: Uuid,
    pub job_id: Uuid,
    pub seq: i64,
    pub value: Integer,
}

/// Exclusive claim on a job. Dropping it releases the claim.
pub struct JobLease {
    job_id: Uuid,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl JobLease {
    pub fn new(job_id: Uuid, release: impl FnOnce() + Send + 'static) -> Self {
        JobLease {
            job_id,
            release: Some(Box::new(release)),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }
}

impl Drop for JobLease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for JobLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLease").field("job_id", &self.job_id).finish()
    }
}

/// In-process registry of claimed jobs, shared by the memory and file adapters.
#[derive(Debug, Clone, Default)]
pub struct JobLocks {
    held: Arc<Mutex<HashSet<Uuid>>>,
}

impl JobLocks {
    pub fn try_claim(&self, job_id: Uuid) -> Result<Option<JobLease>> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| anyhow!("job lock registry poisoned"))?;
        if !held.insert(job_id) {
            return Ok(None);
        }
        let registry = Arc::clone(&self.held);
        Ok(Some(JobLease::new(job_id, move || {
            let mut held = registry.lock().unwrap_or_else(|p| p.into_inner());
            held.remove(&job_id);
        })))
    }
}

pub trait FactorStore: Send + Sync {
    fn create_job(&self, number: &Integer) -> Result<Job>;
    fn get_job(&self, job_id: Uuid) -> Result<Option<Job>>;
    fn find_job_by_number(&self, number: &Integer) -> Result<Option<Job>>;
    /// All jobs still present in the store, oldest first.
    fn list_jobs(&self) -> Result<Vec<Job>>;
    /// Delete a job together with all of its factor rows.
    fn delete_job(&self, job_id: Uuid) -> Result<()>;

    fn append_factor(&self, job_id: Uuid, value: &Integer) -> Result<Factor>;
    fn get_factor_after(&self, job_id: Uuid, after_seq: i64) -> Result<Option<Factor>>;
    fn get_most_recent_factor(&self, job_id: Uuid) -> Result<Option<Factor>>;
    fn delete_factor(&self, factor_id: Uuid) -> Result<()>;
    fn delete_all_factors(&self, job_id: Uuid) -> Result<()>;

    /// Claim `job_id` for a single driver, or `None` if it is already claimed.
    fn try_lock_job(&self, job_id: Uuid) -> Result<Option<JobLease>>;

    /// Every row of the job in discovery order, via the `get_factor_after` scan.
    fn factors(&self, job_id: Uuid) -> Result<Vec<Factor>> {
        let mut rows = Vec::new();
        let mut last_seq = 0;
        while let Some(factor) = self.get_factor_after(job_id, last_seq)? {
            last_seq = factor.seq;
            rows.push(factor);
        }
        Ok(rows)
    }

    /// Replace `replaced` (if any) by `divisor` and `quotient`, in that order.
    fn split_factor(
        &self,
        job_id: Uuid,
        replaced: Option<&Factor>,
        divisor: &Integer,
        quotient: &Integer,
    ) -> Result<(Factor, Factor)> {
        if let Some(row) = replaced {
            match self.get_most_recent_factor(job_id)? {
                Some(last) if last.id == row.id => self.delete_factor(row.id)?,
                _ => bail!("row seq {} is no longer the most recent row of job {}", row.seq, job_id),
            }
        }
        let first = self.append_factor(job_id, divisor)?;
        let second = self.append_factor(job_id, quotient)?;
        Ok((first, second))
    }
}

impl<T: FactorStore + ?Sized> FactorStore for &T {
    fn create_job(&self, number: &Integer) -> Result<Job> {
        (**self).create_job(number)
    }
    fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        (**self).get_job(job_id)
    }
    fn find_job_by_number(&self, number: &Integer) -> Result<Option<Job>> {
        (**self).find_job_by_number(number)
    }
    fn list_jobs(&self) -> Result<Vec<Job>> {
        (**self).list_jobs()
    }
    fn delete_job(&self, job_id: Uuid) -> Result<()> {
        (**self).delete_job(job_id)
    }
    fn append_factor(&self, job_id: Uuid, value: &Integer) -> Result<Factor> {
        (**self).append_factor(job_id, value)
    }
    fn get_factor_after(&self, job_id: Uuid, after_seq: i64) -> Result<Option<Factor>> {
        (**self).get_factor_after(job_id, after_seq)
    }
    fn get_most_recent_factor(&self, job_id: Uuid) -> Result<Option<Factor>> {
        (**self).get_most_recent_factor(job_id)
    }
    fn delete_factor(&self, factor_id: Uuid) -> Result<()> {
        (**self).delete_factor(factor_id)
    }
    fn delete_all_factors(&self, job_id: Uuid) -> Result<()> {
        (**self).delete_all_factors(job_id)
    }
    fn try_lock_job(&self, job_id: Uuid) -> Result<Option<JobLease>> {
        (**self).try_lock_job(job_id)
    }
    fn split_factor(
        &self,
        job_id: Uuid,
        replaced: Option<&Factor>,
        divisor: &Integer,
        quotient: &Integer,
    ) -> Result<(Factor, Factor)> {
        (**self).split_factor(job_id, replaced, divisor, quotient)
    }
}

// ── In-memory adapter ───────────────────────────────────────────

/// Jobs and rows held in plain vectors. Shared by the ledger file adapter,
/// which persists this same state after every mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerState {
    pub jobs: Vec<Job>,
    pub factors: Vec<Factor>,
}

impl LedgerState {
    pub fn create_job(&mut self, number: &Integer) -> Job {
        let job = Job::new(number);
        self.jobs.push(job.clone());
        job
    }

    pub fn job(&self, job_id: Uuid) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == job_id)
    }

    pub fn delete_job(&mut self, job_id: Uuid) {
        self.jobs.retain(|j| j.id != job_id);
        self.factors.retain(|f| f.job_id != job_id);
    }

    pub fn append_factor(&mut self, job_id: Uuid, value: &Integer) -> Result<Factor> {
        if self.job(job_id).is_none() {
            return Err(anyhow!("unknown job {}", job_id));
        }
        let seq = self
            .factors
            .iter()
            .filter(|f| f.job_id == job_id)
            .map(|f| f.seq)
            .max()
            .unwrap_or(0)
            + 1;
        let factor = Factor {
            id: Uuid::new_v4(),
            job_id,
            seq,
            value: value.clone(),
        };
        self.factors.push(factor.clone());
        Ok(factor)
    }

    pub fn factor_after(&self, job_id: Uuid, after_seq: i64) -> Option<&Factor> {
        self.factors
            .iter()
            .filter(|f| f.job_id == job_id && f.seq > after_seq)
            .min_by_key(|f| f.seq)
    }

    pub fn most_recent(&self, job_id: Uuid) -> Option<&Factor> {
        self.factors
            .iter()
            .filter(|f| f.job_id == job_id)
            .max_by_key(|f| f.seq)
    }

    pub fn delete_factor(&mut self, factor_id: Uuid) {
        self.factors.retain(|f| f.id != factor_id);
    }

    pub fn delete_all_factors(&mut self, job_id: Uuid) {
        self.factors.retain(|f| f.job_id != job_id);
    }

    /// The whole checkpoint against this state. Fails before any change when
    /// `replaced` is gone, so a stale driver cannot append a second copy.
    pub fn split_factor(
        &mut self,
        job_id: Uuid,
        replaced: Option<&Factor>,
        divisor: &Integer,
        quotient: &Integer,
    ) -> Result<(Factor, Factor)> {
        if self.job(job_id).is_none() {
            bail!("unknown job {}", job_id);
        }
        if let Some(row) = replaced {
            let before = self.factors.len();
            self.factors.retain(|f| f.id != row.id);
            if before - self.factors.len() != 1 {
                bail!("row seq {} of job {} was already replaced", row.seq, job_id);
            }
        }
        let first = self.append_factor(job_id, divisor)?;
        let second = self.append_factor(job_id, quotient)?;
        Ok((first, second))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<LedgerState>,
    locks: JobLocks,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut LedgerState) -> Result<T>) -> Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        f(&mut state)
    }
}

impl FactorStore for MemoryStore {
    fn create_job(&self, number: &Integer) -> Result<Job> {
        self.with_state(|s| Ok(s.create_job(number)))
    }

    fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        self.with_state(|s| Ok(s.job(job_id).cloned()))
    }

    fn find_job_by_number(&self, number: &Integer) -> Result<Option<Job>> {
        self.with_state(|s| Ok(s.jobs.iter().find(|j| &j.number == number).cloned()))
    }

    fn list_jobs(&self) -> Result<Vec<Job>> {
        self.with_state(|s| Ok(s.jobs.clone()))
    }

    fn delete_job(&self, job_id: Uuid) -> Result<()> {
        self.with_state(|s| {
            s.delete_job(job_id);
            Ok(())
        })
    }

    fn append_factor(&self, job_id: Uuid, value: &Integer) -> Result<Factor> {
        self.with_state(|s| s.append_factor(job_id, value))
    }

    fn get_factor_after(&self, job_id: Uuid, after_seq: i64) -> Result<Option<Factor>> {
        self.with_state(|s| Ok(s.factor_after(job_id, after_seq).cloned()))
    }

    fn get_most_recent_factor(&self, job_id: Uuid) -> Result<Option<Factor>> {
        self.with_state(|s| Ok(s.most_recent(job_id).cloned()))
    }

    fn delete_factor(&self, factor_id: Uuid) -> Result<()> {
        self.with_state(|s| {
            s.delete_factor(factor_id);
            Ok(())
        })
    }

    fn delete_all_factors(&self, job_id: Uuid) -> Result<()> {
        self.with_state(|s| {
            s.delete_all_factors(job_id);
            Ok(())
        })
    }

    fn split_factor(
        &self,
        job_id: Uuid,
        replaced: Option<&Factor>,
        divisor: &Integer,
        quotient: &Integer,
    ) -> Result<(Factor, Factor)> {
        // Single lock: the checkpoint is atomic for this adapter
        self.with_state(|s| s.split_factor(job_id, replaced, divisor, quotient))
    }

    fn try_lock_job(&self, job_id: Uuid) -> Result<Option<JobLease>> {
        self.locks.try_claim(job_id)
    }
}
