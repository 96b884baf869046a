//! # Factorizer — Resumable Recursive Factorization
//!
//! Drives one job from its persisted ledger to a complete list of prime
//! factors. The driver is an explicit state loop, so stack depth does not grow
//! with the number of factors:
//!
//! ```text
//! Start ──► Searching ──► FactorFound ──► CheckAllPrime ──► Done
//!   ▲           │                              │
//!   │           └──(prime)──► CheckAllPrime    └──(composite)──► Searching
//!   └──── checkpoint write failed (re-derive)
//! ```
//!
//! ## Resume Rule
//!
//! `Start` derives everything from the ledger. With `P` the product of all
//! persisted values and `N` the job's number:
//!
//! - `P == N`: consistent, verify the rows (`CheckAllPrime`).
//! - `P < N` and `P | N`: the cofactor `N / P` was never persisted (an empty
//!   ledger is the `P = 1` case). Search it.
//! - otherwise the most recent row belongs to a partial checkpoint. Discard it
//!   and re-derive.
//!
//! ## Checkpoint
//!
//! A found divisor `d` of cofactor `c` is recorded with
//! [`FactorStore::split_factor`]: delete `c`'s row (if it was persisted), append
//! `d`, append `c / d`. The divisor is always prime and the composite being
//! split is always the last row, so at most the last row is ever unresolved
//! and seq numbers stay gap-free. Every prefix of the checkpoint leaves a
//! ledger the resume rule repairs.
//!
//! ## Ownership
//!
//! `run` claims the job through [`FactorStore::try_lock_job`] and holds the
//! claim until it returns. A job that is already claimed fails fast with
//! [`FactorizeError::Busy`]. The checkpoint itself also refuses to replace a
//! row that is already gone, so a driver working from a stale view fails
//! instead of appending a duplicate split.
//!
//! Write failures during a checkpoint are logged and the state is re-derived
//! from the store, which costs one repeated search. After
//! [`MAX_CHECKPOINT_RETRIES`] consecutive failures the job fails. Read failures
//! fail the job immediately.

use rayon::prelude::*;
use rug::Integer;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::divisor::{DivisorSearch, SearchOutcome, StopPolicy};
use crate::error::{FactorizeError, Result};
use crate::primality::PrimalityOracle;
use crate::progress::Progress;
use crate::store::{Factor, FactorStore, Job};
use crate::{estimate_digits, product};

/// Consecutive failed checkpoint writes tolerated before the job fails.
pub const MAX_CHECKPOINT_RETRIES: u32 = 3;

/// The value under search and the ledger row holding it, if persisted.
#[derive(Debug, Clone)]
struct Target {
    cofactor: Integer,
    row: Option<Factor>,
}

#[derive(Debug)]
enum State {
    Start,
    Searching(Target),
    FactorFound { target: Target, divisor: Integer },
    CheckAllPrime,
    Done(Vec<Factor>),
}

/// Drives one job to completion against a [`FactorStore`].
///
/// Holds no per-job state between calls: every `run` re-derives its position
/// from the ledger, so the same value can resume any number of jobs.
pub struct Factorizer<'a> {
    store: &'a dyn FactorStore,
    search: DivisorSearch,
    oracle: PrimalityOracle,
    progress: Arc<Progress>,
    abort: CancellationToken,
}

impl<'a> Factorizer<'a> {
    pub fn new(
        store: &'a dyn FactorStore,
        search: DivisorSearch,
        oracle: PrimalityOracle,
        progress: Arc<Progress>,
    ) -> Self {
        Factorizer {
            store,
            search: search.with_oracle(oracle),
            oracle,
            progress,
            abort: CancellationToken::new(),
        }
    }

    /// Token the caller can raise to stop the job at the next candidate.
    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }

    /// Factor `job.number` completely, resuming from whatever the ledger holds.
    /// Returns the prime factors in discovery order.
    pub fn run(&self, job: &Job) -> Result<Vec<Integer>> {
        let span = info_span!(
            "factorize",
            job_id = %job.id,
            digits = estimate_digits(&job.number),
        );
        span.in_scope(|| {
            let _lease = self
                .store
                .try_lock_job(job.id)
                .map_err(FactorizeError::Store)?
                .ok_or(FactorizeError::Busy { job_id: job.id })?;
            self.drive(job)
        })
    }

    fn drive(&self, job: &Job) -> Result<Vec<Integer>> {
        let mut verified: HashSet<Uuid> = HashSet::new();
        let mut failures = 0u32;
        let mut state = State::Start;

        loop {
            state = match state {
                State::Start => self.resume(job)?,
                State::Searching(target) => self.search_target(target, &mut verified)?,
                State::FactorFound { target, divisor } => {
                    match self.checkpoint(job, &target, &divisor) {
                        Ok(()) => {
                            failures = 0;
                            State::CheckAllPrime
                        }
                        Err(e) => {
                            failures += 1;
                            warn!(
                                attempt = failures,
                                error = %format!("{:#}", e),
                                "Checkpoint write failed, re-deriving state from the ledger"
                            );
                            if failures > MAX_CHECKPOINT_RETRIES {
                                return Err(FactorizeError::Store(e));
                            }
                            State::Start
                        }
                    }
                }
                State::CheckAllPrime => self.check_all_prime(job, &mut verified)?,
                State::Done(rows) => {
                    let values: Vec<Integer> = rows.into_iter().map(|f| f.value).collect();
                    if product(&values) != job.number {
                        return Err(FactorizeError::Inconsistent {
                            job_id: job.id,
                            detail: "product of factors differs from the number".into(),
                        });
                    }
                    info!(factors = values.len(), "Factorization complete");
                    return Ok(values);
                }
            };
        }
    }

    fn resume(&self, job: &Job) -> Result<State> {
        loop {
            let rows = self.store.factors(job.id).map_err(FactorizeError::Store)?;
            let persisted = product(rows.iter().map(|f| &f.value));

            if persisted == job.number {
                debug!(rows = rows.len(), "Ledger consistent");
                return Ok(State::CheckAllPrime);
            }
            if persisted < job.number && job.number.is_divisible(&persisted) {
                let cofactor = Integer::from(&job.number / &persisted);
                if !rows.is_empty() {
                    info!(rows = rows.len(), cofactor = %cofactor, "Resuming unpersisted cofactor");
                }
                return Ok(State::Searching(Target {
                    cofactor,
                    row: None,
                }));
            }

            // An empty ledger always takes the branch above (P = 1)
            let Some(last) = rows.last() else {
                return Err(FactorizeError::Inconsistent {
                    job_id: job.id,
                    detail: "empty ledger with no cofactor".into(),
                });
            };
            warn!(seq = last.seq, value = %last.value, "Discarding partial checkpoint row");
            self.store
                .delete_factor(last.id)
                .map_err(FactorizeError::Store)?;
        }
    }

    fn search_target(&self, target: Target, verified: &mut HashSet<Uuid>) -> Result<State> {
        self.progress.set_target(&target.cofactor);
        match self
            .search
            .find_smallest_divisor(&target.cofactor, &self.abort, &self.progress)
        {
            SearchOutcome::Aborted => Err(FactorizeError::Aborted),
            SearchOutcome::Divisor(d) => {
                let divisor = self.smallest_prime_divisor(d)?;
                debug!(divisor = %divisor, "Divisor found");
                Ok(State::FactorFound { target, divisor })
            }
            SearchOutcome::Prime => match target.row {
                Some(row) => {
                    warn!(seq = row.seq, "Search found no divisor for a row the oracle rejected");
                    verified.insert(row.id);
                    Ok(State::CheckAllPrime)
                }
                // Persisting a lone prime is a one-row checkpoint
                None => Ok(State::FactorFound {
                    divisor: target.cofactor.clone(),
                    target,
                }),
            },
        }
    }

    /// Reduce a divisor from a slack search to its smallest prime divisor.
    fn smallest_prime_divisor(&self, mut divisor: Integer) -> Result<Integer> {
        if self.search.policy() == StopPolicy::Exact {
            return Ok(divisor);
        }
        let exact = DivisorSearch::new(self.search.pool_size(), StopPolicy::Exact)
            .with_oracle(self.oracle);
        while !self.oracle.is_prime(&divisor) {
            match exact.find_smallest_divisor(&divisor, &self.abort, &self.progress) {
                SearchOutcome::Divisor(d) => divisor = d,
                SearchOutcome::Prime => break,
                SearchOutcome::Aborted => return Err(FactorizeError::Aborted),
            }
        }
        Ok(divisor)
    }

    fn checkpoint(&self, job: &Job, target: &Target, divisor: &Integer) -> anyhow::Result<()> {
        if *divisor == target.cofactor {
            // Unpersisted prime cofactor: a single append
            self.store.append_factor(job.id, divisor)?;
            return Ok(());
        }
        let quotient = Integer::from(&target.cofactor / divisor);
        let (d_row, q_row) =
            self.store
                .split_factor(job.id, target.row.as_ref(), divisor, &quotient)?;
        debug!(
            divisor_seq = d_row.seq,
            quotient_seq = q_row.seq,
            "Checkpoint written"
        );
        Ok(())
    }

    fn check_all_prime(&self, job: &Job, verified: &mut HashSet<Uuid>) -> Result<State> {
        let rows = self.store.factors(job.id).map_err(FactorizeError::Store)?;

        let pending: Vec<&Factor> = rows.iter().filter(|f| !verified.contains(&f.id)).collect();
        let oracle = self.oracle;
        let results: Vec<(Uuid, bool)> = pending
            .par_iter()
            .map(|f| (f.id, oracle.is_prime(&f.value)))
            .collect();
        for (id, prime) in &results {
            if *prime {
                verified.insert(*id);
            }
        }
        self.progress
            .found
            .store(verified.len() as u64, Ordering::Relaxed);

        let composite = rows.iter().position(|f| !verified.contains(&f.id));
        match composite {
            None => Ok(State::Done(rows)),
            Some(idx) if idx + 1 == rows.len() => {
                let row = rows[idx].clone();
                debug!(seq = row.seq, value = %row.value, "Composite row selected");
                Ok(State::Searching(Target {
                    cofactor: row.value.clone(),
                    row: Some(row),
                }))
            }
            Some(idx) => Err(FactorizeError::Inconsistent {
                job_id: job.id,
                detail: format!(
                    "composite row at seq {} is not the most recent row",
                    rows[idx].seq
                ),
            }),
        }
    }
}
