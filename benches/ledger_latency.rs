use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use reseller_quota::bench_support::{seed_random, LedgerFixture, SqliteFixture};
use reseller_quota_ledger::{Quota, ONE_GIG};

const QUOTA_GB: u64 = 500;

fn bench_aggregate_usage(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate_usage");
    group
        .sample_size(200)
        .measurement_time(Duration::from_secs(5))
        .warm_up_time(Duration::from_secs(1));

    for children in [10usize, 100, 1_000] {
        let fixture = LedgerFixture::populated(
            1,
            children,
            Quota::from_bytes(QUOTA_GB * ONE_GIG),
            ONE_GIG,
        )
        .expect("fixture");
        let reseller_id = fixture.reseller_ids[0].clone();

        group.bench_with_input(
            BenchmarkId::new("memory", children),
            &reseller_id,
            |b, reseller_id| {
                b.iter(|| black_box(fixture.ledger.aggregate_usage(reseller_id).expect("aggregate")))
            },
        );
    }

    let sqlite = SqliteFixture::new().expect("sqlite fixture");
    let ids = seed_random(
        sqlite.database.as_ref(),
        1,
        1_000,
        Quota::from_bytes(QUOTA_GB * ONE_GIG),
        ONE_GIG,
    )
    .expect("seed sqlite");
    group.bench_with_input(BenchmarkId::new("sqlite", 1_000), &ids[0], |b, reseller_id| {
        b.iter(|| black_box(sqlite.ledger.aggregate_usage(reseller_id).expect("aggregate")))
    });

    group.finish();
}

fn bench_can_admit(c: &mut Criterion) {
    let fixture = LedgerFixture::populated(
        1,
        250,
        Quota::from_bytes(QUOTA_GB * ONE_GIG),
        ONE_GIG,
    )
    .expect("fixture");
    let reseller_id = fixture.reseller_ids[0].clone();

    c.bench_function("can_admit/memory_250", |b| {
        b.iter(|| {
            black_box(
                fixture
                    .ledger
                    .can_admit(&reseller_id, Some(ONE_GIG))
                    .expect("admission"),
            )
        })
    });
}

fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep");
    group
        .sample_size(50)
        .measurement_time(Duration::from_secs(5));

    for resellers in [10usize, 100] {
        // The quota sits above any possible usage so repeated sweeps do the
        // same read work without disabling anything.
        let fixture = LedgerFixture::populated(
            resellers,
            50,
            Quota::from_bytes(QUOTA_GB * ONE_GIG),
            ONE_GIG,
        )
        .expect("fixture");

        group.bench_function(BenchmarkId::new("memory", resellers), |b| {
            b.iter(|| black_box(fixture.ledger.sweep().expect("sweep")))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_aggregate_usage, bench_can_admit, bench_sweep);
criterion_main!(benches);
