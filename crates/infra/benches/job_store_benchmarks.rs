use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use queuectl_core::{Job, JobId, JobState};
use queuectl_infra::jobs::{ClaimOutcome, JobStore, JsonFileJobStore};

fn store_with(jobs: usize) -> (tempfile::TempDir, JsonFileJobStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileJobStore::open(dir.path().join("jobs.json")).unwrap();
    for i in 0..jobs {
        let job = Job::new(JobId::parse(format!("job-{i}")).unwrap(), "true")
            .unwrap()
            .with_priority((i % 10) as i32);
        store.insert(&job).unwrap();
    }
    (dir, store)
}

fn bench_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueue");
    group.sample_size(50);

    for size in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let (_dir, store) = store_with(size);
            let mut n = 0u64;
            b.iter(|| {
                n += 1;
                let job = Job::new(JobId::parse(format!("bench-{n}")).unwrap(), "true").unwrap();
                store.insert(black_box(&job)).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_eligible_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("eligible_pending_scan");

    for size in [10usize, 100, 1000] {
        let (_dir, store) = store_with(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &store, |b, store| {
            b.iter(|| black_box(store.eligible_pending().unwrap()));
        });
    }

    group.finish();
}

// Claim then release so every iteration sees the same store size.
fn bench_claim_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("claim_cycle");
    group.sample_size(50);

    for size in [10usize, 100, 1000] {
        let (_dir, store) = store_with(size);
        let id = JobId::parse("job-0").unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &store, |b, store| {
            b.iter(|| {
                let ClaimOutcome::Claimed(mut job) = store.try_claim(&id, JobState::Pending).unwrap()
                else {
                    panic!("claim lost without contention");
                };
                job.state = JobState::Pending;
                store.put(&job).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_enqueue, bench_eligible_scan, bench_claim_cycle);
criterion_main!(benches);
