//! Prime-pair enumeration: find primes `p ≤ √N` dividing `N` whose cofactor
//! `q = N / p` is also prime.
//!
//! Candidate primes come from the partitioned generator. A consumer pool tests
//! each one against `N`, and the consumer that finds a hit appends it to the
//! job's ledger as a scratch row. Insert failures are logged and skipped. Once
//! `limit` hits are stored the stream is cancelled. The scratch rows are then
//! read back in discovery order, paired with their cofactors, filtered to prime
//! cofactors and deleted. The job is claimed for the whole call, like a
//! factorization run, so two enumerations never share scratch rows.

use rayon::prelude::*;
use rug::Integer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::candidates::yield_primes_ascending;
use crate::error::{FactorizeError, Result};
use crate::primality::PrimalityOracle;
use crate::store::{FactorStore, Job};

/// `p × q = N` with both factors prime and `p ≤ q`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimePair {
    pub p: Integer,
    pub q: Integer,
}

impl PrimePair {
    /// Display form used on the command line: `p x q`.
    pub fn line(&self) -> String {
        format!("{} x {}", self.p, self.q)
    }
}

/// Up to `limit` prime pairs of `job.number`, sorted by `p`.
///
/// Uses the job's factor rows as scratch space and leaves them empty on
/// return. Fails with [`FactorizeError::Busy`] if the job is claimed elsewhere
/// and with [`FactorizeError::Aborted`] if `abort` is raised.
pub fn find_prime_pairs(
    store: &dyn FactorStore,
    job: &Job,
    limit: usize,
    workers: usize,
    oracle: PrimalityOracle,
    abort: &CancellationToken,
) -> Result<Vec<PrimePair>> {
    let n = &job.number;
    let workers = workers.max(1);
    let bound = Integer::from(n.sqrt_ref()) + 1u32;
    let hits = AtomicUsize::new(0);
    let _lease = store
        .try_lock_job(job.id)
        .map_err(FactorizeError::Store)?
        .ok_or(FactorizeError::Busy { job_id: job.id })?;

    info!(job_id = %job.id, limit, workers, "Collecting prime divisors below the square root");
    let stream = yield_primes_ascending(&bound, workers, oracle, abort);
    thread::scope(|s| {
        for worker in 0..workers {
            let stream = &stream;
            let hits = &hits;
            s.spawn(move || {
                while let Some(p) = stream.recv() {
                    if !n.is_divisible(&p) {
                        continue;
                    }
                    match store.append_factor(job.id, &p) {
                        Ok(row) => {
                            debug!(worker, seq = row.seq, p = %p, "Prime divisor stored");
                            if hits.fetch_add(1, Ordering::AcqRel) + 1 >= limit {
                                stream.cancel();
                            }
                        }
                        Err(e) => {
                            warn!(worker, p = %p, error = %format!("{:#}", e), "Failed to store prime divisor, skipping");
                        }
                    }
                }
            });
        }
    });
    drop(stream);

    let rows = store.factors(job.id).map_err(FactorizeError::Store)?;
    if abort.is_aborted() {
        store
            .delete_all_factors(job.id)
            .map_err(FactorizeError::Store)?;
        return Err(FactorizeError::Aborted);
    }

    let mut pairs: Vec<PrimePair> = rows
        .par_iter()
        .filter_map(|row| {
            let q = Integer::from(n / &row.value);
            oracle.is_prime(&q).then(|| PrimePair {
                p: row.value.clone(),
                q,
            })
        })
        .collect();
    pairs.sort_by(|a, b| a.p.cmp(&b.p));
    pairs.truncate(limit);

    store
        .delete_all_factors(job.id)
        .map_err(FactorizeError::Store)?;
    info!(divisors = rows.len(), pairs = pairs.len(), "Prime pairs collected");
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn pairs_of(n: u64, limit: usize, workers: usize) -> Vec<(u64, u64)> {
        let store = MemoryStore::new();
        let job = store.create_job(&Integer::from(n)).unwrap();
        let pairs = find_prime_pairs(
            &store,
            &job,
            limit,
            workers,
            PrimalityOracle::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        // Scratch rows never outlive the call
        assert!(store.factors(job.id).unwrap().is_empty());
        pairs
            .into_iter()
            .map(|pair| (pair.p.to_u64().unwrap(), pair.q.to_u64().unwrap()))
            .collect()
    }

    // ── Pair selection ──────────────────────────────────────────

    /// A semiprime has exactly one split, found regardless of pool size.
    #[test]
    fn semiprime_has_one_pair() {
        assert_eq!(pairs_of(91, 10, 4), vec![(7, 13)]);
        assert_eq!(pairs_of(1009 * 1013, 10, 2), vec![(1009, 1013)]);
    }

    /// p = ⌊√N⌋ is inside the candidate range, so p² pairs with itself.
    #[test]
    fn square_of_prime_pairs_with_itself() {
        assert_eq!(pairs_of(49, 10, 2), vec![(7, 7)]);
    }

    #[test]
    fn divisors_with_composite_cofactor_are_dropped() {
        // 600 / p is composite for every prime p | 600
        assert!(pairs_of(600, 10, 4).is_empty());
    }

    #[test]
    fn prime_input_has_no_pairs() {
        assert!(pairs_of(97, 10, 4).is_empty());
    }

    /// Idle consumers must still terminate when the stream runs dry.
    #[test]
    fn tiny_semiprimes_with_more_workers_than_primes() {
        assert_eq!(pairs_of(6, 10, 3), vec![(2, 3)]);
        assert_eq!(pairs_of(15, 10, 8), vec![(3, 5)]);
    }

    #[test]
    fn limit_caps_the_result() {
        assert!(pairs_of(91, 0, 2).is_empty());
        assert_eq!(pairs_of(91, 1, 2), vec![(7, 13)]);
    }

    // ── Cancellation and ownership ──────────────────────────────

    /// An aborted run reports the abort and removes whatever it stored.
    #[test]
    fn aborted_enumeration_cleans_up() {
        let store = MemoryStore::new();
        let job = store.create_job(&Integer::from(91u32)).unwrap();
        let abort = CancellationToken::new();
        abort.cancel(crate::cancel::CancelReason::Aborted);
        let result = find_prime_pairs(&store, &job, 10, 2, PrimalityOracle::default(), &abort);
        assert!(matches!(result, Err(FactorizeError::Aborted)));
        assert!(store.factors(job.id).unwrap().is_empty());
    }

    /// A job claimed by someone else is left untouched.
    #[test]
    fn claimed_job_is_refused() {
        let store = MemoryStore::new();
        let job = store.create_job(&Integer::from(91u32)).unwrap();
        let _held = store.try_lock_job(job.id).unwrap().unwrap();
        let result = find_prime_pairs(
            &store,
            &job,
            10,
            2,
            PrimalityOracle::default(),
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(FactorizeError::Busy { .. })));
        assert!(store.factors(job.id).unwrap().is_empty());
    }
}
