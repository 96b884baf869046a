//! # Divisor — Bidirectional Parallel Trial Division
//!
//! Finds the smallest non-trivial divisor of `n` in the candidate domain
//! `[2, ⌊√n⌋]`, or reports that `n` is prime.
//!
//! ## Algorithm
//!
//! Two feeder threads share one cursor pair behind a mutex: the low feeder
//! takes `low` and increments it, the high feeder takes `high` and decrements
//! it. `high` starts at `min(n − 1, ⌊√n⌋)`. Feeders push candidates onto a
//! bounded work channel drained by a pool of workers, each testing
//! `n mod candidate == 0`. The search is over once the cursors cross.
//!
//! Every hit is recorded under the cursor lock. A hit `d` also pulls `high`
//! down to `d − 1`, since nothing at or above `d` can improve the answer.
//!
//! ## Stop Policy
//!
//! - [`StopPolicy::Exact`]: after a hit the feeders keep dispatching every
//!   remaining candidate below the best hit, so the result is the true minimum.
//! - [`StopPolicy::Slack`]: after the first hit the feeders dispatch at most
//!   `n` more candidates, then raise the search token. The result is the
//!   smallest hit observed, which can exceed the true minimum when workers
//!   raced past it. Any hit is still a valid divisor.
//!
//! ## Cancellation
//!
//! Each call owns a fresh token linked to the caller's. Workers and feeders
//! check it at every candidate boundary and return on their own; the
//! `thread::scope` join guarantees none outlive the call. A caller-side abort
//! reports [`SearchOutcome::Aborted`], never a divisor.

use crossbeam_channel::bounded;
use rug::{Assign, Integer};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::{CancelReason, CancellationToken};
use crate::primality::PrimalityOracle;
use crate::progress::Progress;

/// Candidates tested per worker between flushes into the shared counter.
const TESTED_FLUSH: u64 = 4096;
/// Dispatches between cursor updates in the progress snapshot.
const CURSOR_STRIDE: u64 = 1024;

/// When the search may stop after the first divisor is seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPolicy {
    /// Exhaust every candidate below the best hit: the result is the true minimum.
    Exact,
    /// Dispatch at most this many more candidates after the first hit.
    Slack(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Smallest divisor hit in `[2, ⌊√n⌋]` (the true minimum under `Exact`).
    Divisor(Integer),
    /// No divisor in the domain.
    Prime,
    /// The caller's token was raised; nothing can be concluded.
    Aborted,
}

/// Default pool size: two workers per available hardware thread.
pub fn default_pool_size() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Low,
    High,
}

enum Dispatch {
    Candidate(Integer),
    Exhausted,
    SlackSpent,
}

struct Cursors {
    low: Integer,
    high: Integer,
    best: Option<Integer>,
    hits: u64,
    after_hit: u64,
}

impl Cursors {
    fn new(n: &Integer) -> Self {
        let root = Integer::from(n.sqrt_ref());
        let below = Integer::from(n - 1u32);
        Cursors {
            low: Integer::from(2u32),
            high: if root < below { root } else { below },
            best: None,
            hits: 0,
            after_hit: 0,
        }
    }

    fn next(&mut self, side: Side, policy: StopPolicy) -> Dispatch {
        if self.low > self.high {
            return Dispatch::Exhausted;
        }
        if self.best.is_some() {
            if let StopPolicy::Slack(limit) = policy {
                if self.after_hit >= limit {
                    return Dispatch::SlackSpent;
                }
                self.after_hit += 1;
            }
        }
        let candidate = match side {
            Side::Low => {
                let c = self.low.clone();
                self.low += 1u32;
                c
            }
            Side::High => {
                let c = self.high.clone();
                self.high -= 1u32;
                c
            }
        };
        Dispatch::Candidate(candidate)
    }

    fn record_hit(&mut self, divisor: &Integer) {
        self.hits += 1;
        let improves = self.best.as_ref().map_or(true, |best| divisor < best);
        if improves {
            self.best = Some(divisor.clone());
            if self.high >= *divisor {
                self.high.assign(divisor - 1u32);
            }
        }
    }
}

fn lock(cursors: &Mutex<Cursors>) -> MutexGuard<'_, Cursors> {
    cursors.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn divides(n: &Integer, candidate: &Integer) -> bool {
    match candidate.to_u32() {
        Some(small) => n.is_divisible_u(small),
        None => n.is_divisible(candidate),
    }
}

/// Bidirectional trial-division search over a pool of `pool_size` workers.
///
/// Cheap to clone and holds no state between calls; each call to
/// [`DivisorSearch::find_smallest_divisor`] spawns and joins its own threads.
#[derive(Debug, Clone)]
pub struct DivisorSearch {
    pool_size: usize,
    policy: StopPolicy,
    oracle: PrimalityOracle,
}

impl Default for DivisorSearch {
    fn default() -> Self {
        DivisorSearch::new(default_pool_size(), StopPolicy::Exact)
    }
}

impl DivisorSearch {
    pub fn new(pool_size: usize, policy: StopPolicy) -> Self {
        DivisorSearch {
            pool_size: pool_size.max(1),
            policy,
            oracle: PrimalityOracle::default(),
        }
    }

    /// Oracle used to confirm a `Prime` outcome.
    pub fn with_oracle(mut self, oracle: PrimalityOracle) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn policy(&self) -> StopPolicy {
        self.policy
    }

    /// Search `[2, ⌊√n⌋]` for the smallest divisor of `n`.
    pub fn find_smallest_divisor(
        &self,
        n: &Integer,
        abort: &CancellationToken,
        progress: &Progress,
    ) -> SearchOutcome {
        let start = Instant::now();
        let token = CancellationToken::child_of(abort);
        let cursors = Mutex::new(Cursors::new(n));
        let (tx, rx) = bounded::<Integer>(self.pool_size * 2);

        progress.set_target(n);
        debug!(
            bits = n.significant_bits(),
            pool = self.pool_size,
            policy = ?self.policy,
            "divisor search started"
        );

        thread::scope(|s| {
            for side in [Side::Low, Side::High] {
                let tx = tx.clone();
                let token = token.clone();
                let cursors = &cursors;
                let policy = self.policy;
                s.spawn(move || {
                    let mut dispatched = 0u64;
                    loop {
                        if token.is_cancelled() {
                            break;
                        }
                        let next = lock(cursors).next(side, policy);
                        match next {
                            Dispatch::Candidate(candidate) => {
                                if side == Side::Low && dispatched % CURSOR_STRIDE == 0 {
                                    progress.set_cursor(&candidate);
                                }
                                dispatched += 1;
                                if tx.send(candidate).is_err() {
                                    break;
                                }
                            }
                            Dispatch::Exhausted => break,
                            Dispatch::SlackSpent => {
                                token.cancel(CancelReason::Found);
                                break;
                            }
                        }
                    }
                });
            }
            drop(tx);

            for _ in 0..self.pool_size {
                let rx = rx.clone();
                let token = token.clone();
                let cursors = &cursors;
                s.spawn(move || {
                    let mut tested = 0u64;
                    for candidate in rx.iter() {
                        if token.is_cancelled() {
                            break;
                        }
                        tested += 1;
                        if divides(n, &candidate) {
                            lock(cursors).record_hit(&candidate);
                        }
                        if tested % TESTED_FLUSH == 0 {
                            progress
                                .tested
                                .fetch_add(TESTED_FLUSH, std::sync::atomic::Ordering::Relaxed);
                        }
                    }
                    progress.tested.fetch_add(
                        tested % TESTED_FLUSH,
                        std::sync::atomic::Ordering::Relaxed,
                    );
                });
            }
            drop(rx);
        });

        let state = cursors.into_inner().unwrap_or_else(|p| p.into_inner());
        let elapsed = start.elapsed();

        if token.is_aborted() {
            info!(elapsed_ms = elapsed.as_millis() as u64, "divisor search aborted");
            return SearchOutcome::Aborted;
        }

        match state.best {
            Some(divisor) => {
                debug!(
                    divisor = %divisor,
                    hits = state.hits,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "divisor found"
                );
                SearchOutcome::Divisor(divisor)
            }
            None => {
                if !self.oracle.is_prime(n) {
                    warn!(
                        n = %n,
                        "no divisor below the square root but primality test disagrees"
                    );
                }
                debug!(elapsed_ms = elapsed.as_millis() as u64, "no divisor, value is prime");
                SearchOutcome::Prime
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn search(n: u64, workers: usize) -> SearchOutcome {
        DivisorSearch::new(workers, StopPolicy::Exact).find_smallest_divisor(
            &Integer::from(n),
            &CancellationToken::new(),
            &Progress::new(),
        )
    }

    fn divisor(v: u64) -> SearchOutcome {
        SearchOutcome::Divisor(Integer::from(v))
    }

    // ── Exact results ───────────────────────────────────────────

    /// The low feeder reaches the small factor first for every pool size.
    #[test]
    fn semiprime_returns_smaller_factor_for_any_pool_size() {
        for workers in [1, 2, 8] {
            assert_eq!(search(7 * 13, workers), divisor(7), "workers = {}", workers);
            assert_eq!(search(1009 * 1013, workers), divisor(1009), "workers = {}", workers);
            assert_eq!(search(2 * 7919, workers), divisor(2), "workers = {}", workers);
        }
    }

    /// ⌊√n⌋ itself is a candidate: p² must not be reported prime.
    #[test]
    fn square_of_prime_hits_the_inclusive_bound() {
        for workers in [1, 2, 8] {
            assert_eq!(search(49, workers), divisor(7));
            assert_eq!(search(4, workers), divisor(2));
        }
    }

    /// Many hits race in; the exact policy keeps the smallest.
    #[test]
    fn exact_policy_returns_true_minimum_with_many_divisors() {
        for workers in [1, 2, 8, 16] {
            assert_eq!(search(600, workers), divisor(2));
            assert_eq!(search(3 * 5 * 7 * 11 * 13, workers), divisor(3));
            assert_eq!(search(97 * 89 * 83, workers), divisor(83));
        }
    }

    #[test]
    fn primes_report_prime() {
        for p in [2u64, 3, 5, 97, 7919, 1_000_003] {
            for workers in [1, 4] {
                assert_eq!(search(p, workers), SearchOutcome::Prime, "p = {}", p);
            }
        }
    }

    // ── Cursors and dispatch ────────────────────────────────────

    #[test]
    fn cursors_start_inside_domain() {
        let c = Cursors::new(&Integer::from(3u32));
        assert!(c.low > c.high, "3 has an empty candidate domain");
        let c = Cursors::new(&Integer::from(100u32));
        assert_eq!(c.low, 2);
        assert_eq!(c.high, 10);
    }

    #[test]
    fn hit_pulls_high_cursor_below_divisor() {
        let mut c = Cursors::new(&Integer::from(10_000u32));
        c.record_hit(&Integer::from(40u32));
        assert_eq!(c.high, 39);
        c.record_hit(&Integer::from(50u32));
        assert_eq!(c.best, Some(Integer::from(40u32)));
        assert_eq!(c.hits, 2);
    }

    #[test]
    fn slack_limits_dispatch_after_first_hit() {
        let mut c = Cursors::new(&Integer::from(10_000u32));
        c.record_hit(&Integer::from(50u32));
        let policy = StopPolicy::Slack(2);
        assert!(matches!(c.next(Side::Low, policy), Dispatch::Candidate(_)));
        assert!(matches!(c.next(Side::High, policy), Dispatch::Candidate(_)));
        assert!(matches!(c.next(Side::Low, policy), Dispatch::SlackSpent));
    }

    /// Slack may give up the minimum but never returns a non-divisor.
    #[test]
    fn slack_policy_returns_a_valid_divisor() {
        for workers in [1, 4, 8] {
            let n = Integer::from(600u32);
            let outcome = DivisorSearch::new(workers, StopPolicy::Slack(0)).find_smallest_divisor(
                &n,
                &CancellationToken::new(),
                &Progress::new(),
            );
            match outcome {
                SearchOutcome::Divisor(d) => {
                    assert!(d >= 2 && d <= 24, "d = {}", d);
                    assert!(n.is_divisible(&d));
                }
                other => panic!("expected a divisor, got {:?}", other),
            }
        }
    }

    // ── Cancellation ────────────────────────────────────────────

    /// An abort before the first candidate must never look like `Prime`.
    #[test]
    fn pre_aborted_token_reports_aborted() {
        let abort = CancellationToken::new();
        abort.cancel(CancelReason::Aborted);
        let outcome = DivisorSearch::new(4, StopPolicy::Exact).find_smallest_divisor(
            &Integer::from(91u32),
            &abort,
            &Progress::new(),
        );
        assert_eq!(outcome, SearchOutcome::Aborted);
    }

    #[test]
    fn abort_mid_search_stops_promptly() {
        // 2^61 - 1 is prime; a full scan would take far longer than the test
        let n = (Integer::from(1u32) << 61u32) - 1u32;
        let abort = CancellationToken::new();
        let remote = abort.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            remote.cancel(CancelReason::Aborted);
        });
        let start = Instant::now();
        let outcome =
            DivisorSearch::new(4, StopPolicy::Exact).find_smallest_divisor(&n, &abort, &Progress::new());
        stopper.join().unwrap();
        assert_eq!(outcome, SearchOutcome::Aborted);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    // ── Progress and sizing ─────────────────────────────────────

    #[test]
    fn progress_counts_tested_candidates() {
        let progress = Progress::new();
        let outcome = DivisorSearch::new(2, StopPolicy::Exact).find_smallest_divisor(
            &Integer::from(7919u32),
            &CancellationToken::new(),
            &progress,
        );
        assert_eq!(outcome, SearchOutcome::Prime);
        // Domain [2, 88] is fully tested for a prime
        assert_eq!(progress.tested.load(Ordering::Relaxed), 87);
        assert_eq!(progress.bits.load(Ordering::Relaxed), 13);
    }

    #[test]
    fn default_pool_is_twice_parallelism() {
        let search = DivisorSearch::default();
        assert!(search.pool_size() >= 2);
        assert_eq!(search.pool_size() % 2, 0);
        assert_eq!(search.policy(), StopPolicy::Exact);
    }
}
