//! Property-based tests for cofactor's search and factorization invariants.
//!
//! # Prerequisites
//!
//! - No database or network access required.
//!
//! # How to run
//!
//! ```bash
//! cargo test --test property_tests
//!
//! # Increase case count for thorough testing:
//! PROPTEST_CASES=2000 cargo test --test property_tests
//! ```
//!
//! # Testing strategy
//!
//! - **Factorizer**: product of the factors equals N, every factor is prime,
//!   and the multiset matches naive trial division.
//! - **Divisor search**: the result is the true smallest divisor for any pool size.
//! - **Candidate generator**: exactly the primes below the bound, each once.
//!
//! Each property is named `prop_<component>_<invariant>`.

use cofactor::candidates::yield_primes_ascending;
use cofactor::divisor::{DivisorSearch, SearchOutcome, StopPolicy};
use cofactor::factorizer::Factorizer;
use cofactor::primality::PrimalityOracle;
use cofactor::progress::Progress;
use cofactor::store::{FactorStore, MemoryStore};
use cofactor::{product, CancellationToken};
use proptest::prelude::*;
use rug::Integer;

fn naive_factors(mut n: u64) -> Vec<u64> {
    let mut out = Vec::new();
    let mut d = 2;
    while d * d <= n {
        while n % d == 0 {
            out.push(d);
            n /= d;
        }
        d += 1;
    }
    if n > 1 {
        out.push(n);
    }
    out
}

fn naive_is_prime(n: u64) -> bool {
    n >= 2 && naive_factors(n) == vec![n]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The factor list multiplies back to N and matches trial division.
    #[test]
    fn prop_factorizer_matches_trial_division(n in 2u64..2_000_000, workers in 1usize..6) {
        let store = MemoryStore::new();
        let job = store.create_job(&Integer::from(n)).unwrap();
        let factors = Factorizer::new(
            &store,
            DivisorSearch::new(workers, StopPolicy::Exact),
            PrimalityOracle::default(),
            Progress::new(),
        )
        .run(&job)
        .unwrap();

        prop_assert_eq!(product(&factors), Integer::from(n));
        let mut got: Vec<u64> = factors.iter().map(|f| f.to_u64().unwrap()).collect();
        got.sort_unstable();
        prop_assert_eq!(got, naive_factors(n));
    }

    /// Exact search finds the smallest prime factor whenever N is composite.
    #[test]
    fn prop_divisor_is_smallest(n in 4u64..5_000_000, workers in 1usize..9) {
        let outcome = DivisorSearch::new(workers, StopPolicy::Exact).find_smallest_divisor(
            &Integer::from(n),
            &CancellationToken::new(),
            &Progress::new(),
        );
        let smallest = naive_factors(n)[0];
        if smallest == n {
            prop_assert_eq!(outcome, SearchOutcome::Prime);
        } else {
            prop_assert_eq!(outcome, SearchOutcome::Divisor(Integer::from(smallest)));
        }
    }

    /// Slack search never returns a non-divisor or a value above the square root.
    #[test]
    fn prop_slack_divisor_is_valid(n in 4u64..1_000_000, slack in 0u64..16, workers in 1usize..9) {
        let outcome = DivisorSearch::new(workers, StopPolicy::Slack(slack)).find_smallest_divisor(
            &Integer::from(n),
            &CancellationToken::new(),
            &Progress::new(),
        );
        match outcome {
            SearchOutcome::Divisor(d) => {
                let d = d.to_u64().unwrap();
                prop_assert!(d >= 2 && d * d <= n);
                prop_assert_eq!(n % d, 0);
            }
            SearchOutcome::Prime => prop_assert!(naive_is_prime(n)),
            SearchOutcome::Aborted => prop_assert!(false, "no abort was requested"),
        }
    }

    /// The generator yields exactly the primes in [2, bound), once each.
    #[test]
    fn prop_candidates_exact_prime_set(bound in 0u32..3000, workers in 1usize..10) {
        let stream = yield_primes_ascending(
            &Integer::from(bound),
            workers,
            PrimalityOracle::default(),
            &CancellationToken::new(),
        );
        let mut got: Vec<u64> = stream.map(|p| p.to_u64().unwrap()).collect();
        got.sort_unstable();
        let expected: Vec<u64> = (2..bound as u64).filter(|&v| naive_is_prime(v)).collect();
        prop_assert_eq!(got, expected);
    }

    /// The oracle agrees with trial division on small values.
    #[test]
    fn prop_oracle_matches_trial_division(n in 0u64..200_000) {
        prop_assert_eq!(PrimalityOracle::default().is_prime(&Integer::from(n)), naive_is_prime(n));
    }
}
