//! # Candidates — Partitioned Parallel Prime Generator
//!
//! Produces every prime in `[2, bound)` as a lazy, finite stream, using a
//! fixed pool of producer threads.
//!
//! ## Partitioning
//!
//! `[0, bound)` is cut into `W` contiguous half-open windows (the last window
//! absorbs the remainder). The first `⌊W/2⌋` windows are scanned upward from
//! their low edge; the rest are scanned downward from their high edge, so the
//! stream starts with small and large primes at the same time. Windows are
//! disjoint, so every prime is produced exactly once. Order across windows is
//! unspecified.
//!
//! ## Channel Discipline
//!
//! All producers send on one unbuffered `crossbeam_channel::bounded(0)`
//! channel: a producer blocks until a consumer takes its prime, so memory stays
//! O(1) in flight. Each producer owns a clone of the sender; the channel closes
//! exactly once, when the last producer finishes and drops its clone.
//!
//! ## Shutdown
//!
//! Producers check the cancellation token before each candidate. Dropping a
//! [`PrimeStream`] early raises the token, disconnects the receiver (which
//! unblocks any producer stuck in `send`) and joins every producer thread.

use crossbeam_channel::{bounded, Receiver, Sender};
use rug::Integer;
use std::thread::{self, JoinHandle};
use tracing::debug;

use crate::cancel::{CancelReason, CancellationToken, LinkedToken};
use crate::primality::PrimalityOracle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Ascending,
    Descending,
}

/// A half-open scan window `[lo, hi)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub lo: Integer,
    pub hi: Integer,
    pub descending: bool,
}

/// Split `[0, bound)` into `workers` windows; the first half ascend, the rest descend.
pub fn partition(bound: &Integer, workers: usize) -> Vec<Window> {
    let workers = workers.max(1);
    let size = Integer::from(bound / workers as u64);
    (0..workers)
        .map(|i| {
            let lo = Integer::from(&size * i as u64);
            let hi = if i == workers - 1 {
                bound.clone()
            } else {
                Integer::from(&lo + &size)
            };
            Window {
                lo,
                hi,
                descending: i >= workers / 2,
            }
        })
        .collect()
}

/// Lazy, unordered stream of the primes below a bound.
///
/// Dropping the stream cancels and joins its producers, so no generator
/// thread outlives its consumer.
pub struct PrimeStream {
    rx: Option<Receiver<Integer>>,
    token: LinkedToken,
    producers: Vec<JoinHandle<()>>,
}

impl PrimeStream {
    /// Block until the next prime, or `None` once every producer has finished.
    /// Takes `&self` so several consumer threads can drain one stream.
    pub fn recv(&self) -> Option<Integer> {
        self.rx.as_ref()?.recv().ok()
    }

    /// Raise the stream's token. Producers stop at their next candidate.
    pub fn cancel(&self) {
        self.token.cancel(CancelReason::Found);
    }
}

impl Iterator for PrimeStream {
    type Item = Integer;

    fn next(&mut self) -> Option<Integer> {
        self.recv()
    }
}

impl Drop for PrimeStream {
    fn drop(&mut self) {
        self.token.cancel(CancelReason::Found);
        // Disconnect first so producers blocked in send() return
        self.rx.take();
        for handle in self.producers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Start producing the primes in `[2, bound)` on `workers` threads.
///
/// `abort` lets the caller stop the stream from outside; the stream also
/// carries its own token so dropping it never touches the caller's token.
pub fn yield_primes_ascending(
    bound: &Integer,
    workers: usize,
    oracle: PrimalityOracle,
    abort: &CancellationToken,
) -> PrimeStream {
    let token = CancellationToken::child_of(abort);
    let (tx, rx) = bounded::<Integer>(0);

    let producers = if *bound <= 2u32 {
        Vec::new()
    } else {
        partition(bound, workers)
            .into_iter()
            .enumerate()
            .map(|(id, window)| {
                let tx = tx.clone();
                let token = token.clone();
                thread::spawn(move || scan_window(id, window, oracle, token, tx))
            })
            .collect()
    };
    // Producers hold the only senders now
    drop(tx);

    PrimeStream {
        rx: Some(rx),
        token,
        producers,
    }
}

fn scan_window(
    id: usize,
    window: Window,
    oracle: PrimalityOracle,
    token: LinkedToken,
    tx: Sender<Integer>,
) {
    let Window { lo, hi, descending } = window;
    let direction = if descending {
        Direction::Descending
    } else {
        Direction::Ascending
    };
    let floor = if lo < 2u32 { Integer::from(2u32) } else { lo };
    if floor >= hi {
        return;
    }

    let mut emitted = 0u64;
    let mut candidate = match direction {
        Direction::Ascending => floor.clone(),
        Direction::Descending => Integer::from(&hi - 1u32),
    };
    loop {
        if token.is_cancelled() {
            break;
        }
        let in_window = match direction {
            Direction::Ascending => candidate < hi,
            Direction::Descending => candidate >= floor,
        };
        if !in_window {
            break;
        }
        if oracle.is_prime(&candidate) {
            if tx.send(candidate.clone()).is_err() {
                break;
            }
            emitted += 1;
        }
        match direction {
            Direction::Ascending => candidate += 1u32,
            Direction::Descending => candidate -= 1u32,
        }
    }
    debug!(producer = id, ?direction, emitted, "prime window finished");
}
