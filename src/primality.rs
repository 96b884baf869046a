//! # Primality — Probabilistic Primality Oracle
//!
//! Every component asks the same question ("is this value prime?") at the
//! same configured confidence, so the answer is centralised here.
//!
//! ## Pipeline
//!
//! 1. Trial division by a fixed table of small primes rejects most composites
//!    without touching GMP's Miller–Rabin.
//! 2. A 2-round Miller–Rabin screen rejects nearly all remaining composites.
//! 3. Survivors run the full configured round count.
//!
//! A `Probably` answer from GMP counts as prime. The false-positive rate is
//! bounded by 4^-rounds and is an accepted assumption of the design.

use rug::integer::IsPrime;
use rug::Integer;

/// Default Miller–Rabin rounds.
pub const DEFAULT_MR_ROUNDS: u32 = 20;

/// Small primes for trial division pre-filter.
const SMALL_PRIMES: [u32; 64] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
    101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191, 193,
    197, 199, 211, 223, 227, 229, 233, 239, 241, 251, 257, 263, 269, 271, 277, 281, 283, 293, 307,
    311,
];

/// Quick check if n is divisible by any small prime.
/// Returns true if n is definitely composite (has a small factor).
/// Returns false if n might be prime (passed trial division).
pub fn has_small_factor(n: &Integer) -> bool {
    for &p in &SMALL_PRIMES {
        if n.is_divisible_u(p) {
            // n equal to the table prime itself is prime, not composite
            return n > &Integer::from(p);
        }
    }
    false
}

/// Two-round Miller-Rabin pre-screening: run 2 fast rounds first, full rounds only for survivors.
pub fn mr_screened_test(candidate: &Integer, mr_rounds: u32) -> IsPrime {
    if mr_rounds > 2 && candidate.is_probably_prime(2) == IsPrime::No {
        return IsPrime::No;
    }
    candidate.is_probably_prime(mr_rounds)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimalityOracle {
    rounds: u32,
}

impl Default for PrimalityOracle {
    fn default() -> Self {
        PrimalityOracle::new(DEFAULT_MR_ROUNDS)
    }
}

impl PrimalityOracle {
    pub fn new(rounds: u32) -> Self {
        PrimalityOracle {
            rounds: rounds.max(1),
        }
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn is_prime(&self, n: &Integer) -> bool {
        if *n < 2u32 {
            return false;
        }
        if has_small_factor(n) {
            return false;
        }
        mr_screened_test(n, self.rounds) != IsPrime::No
    }
}
