use cofactor::candidates::yield_primes_ascending;
use cofactor::divisor::{DivisorSearch, StopPolicy};
use cofactor::factorizer::Factorizer;
use cofactor::primality::PrimalityOracle;
use cofactor::progress::Progress;
use cofactor::store::{FactorStore, MemoryStore};
use cofactor::CancellationToken;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rug::Integer;

fn bench_oracle(c: &mut Criterion) {
    // 2^127 - 1 (Mersenne prime)
    let prime = (Integer::from(1u32) << 127u32) - 1u32;
    let oracle = PrimalityOracle::default();
    c.bench_function("is_prime(M127)", |b| {
        b.iter(|| oracle.is_prime(black_box(&prime)));
    });
}

fn bench_divisor_semiprime(c: &mut Criterion) {
    // 104729 * 1299709: smallest divisor sits ~10^5 candidates up
    let n = Integer::from(104_729u64 * 1_299_709u64);
    let mut group = c.benchmark_group("find_smallest_divisor");
    group.sample_size(10);
    for workers in [1usize, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &w| {
            let search = DivisorSearch::new(w, StopPolicy::Exact);
            b.iter(|| {
                search.find_smallest_divisor(
                    black_box(&n),
                    &CancellationToken::new(),
                    &Progress::new(),
                )
            });
        });
    }
    group.finish();
}

fn bench_exact_vs_slack(c: &mut Criterion) {
    let n = Integer::from(1009u64 * 1013 * 7919 * 104_729);
    let mut group = c.benchmark_group("stop_policy");
    group.sample_size(10);
    for (name, policy) in [("exact", StopPolicy::Exact), ("slack32", StopPolicy::Slack(32))] {
        let search = DivisorSearch::new(8, policy);
        group.bench_function(name, |b| {
            b.iter(|| {
                search.find_smallest_divisor(
                    black_box(&n),
                    &CancellationToken::new(),
                    &Progress::new(),
                )
            });
        });
    }
    group.finish();
}

fn bench_prime_stream(c: &mut Criterion) {
    let bound = Integer::from(100_000u32);
    c.bench_function("yield_primes_ascending(1e5, 4)", |b| {
        b.iter(|| {
            yield_primes_ascending(
                black_box(&bound),
                4,
                PrimalityOracle::default(),
                &CancellationToken::new(),
            )
            .count()
        });
    });
}

fn bench_factorize(c: &mut Criterion) {
    let n = Integer::from(2u64 * 2 * 3 * 7 * 1009 * 1013 * 7919);
    let mut group = c.benchmark_group("factorize");
    group.sample_size(10);
    group.bench_function("memory_store", |b| {
        b.iter(|| {
            let store = MemoryStore::new();
            let job = store.create_job(&n).unwrap();
            Factorizer::new(
                &store,
                DivisorSearch::new(4, StopPolicy::Exact),
                PrimalityOracle::default(),
                Progress::new(),
            )
            .run(black_box(&job))
            .unwrap()
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_oracle,
    bench_divisor_semiprime,
    bench_exact_vs_slack,
    bench_prime_stream,
    bench_factorize,
);
criterion_main!(benches);
