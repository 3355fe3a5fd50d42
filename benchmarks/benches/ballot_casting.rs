use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use member_vote::config::StoreConfig;
use member_vote::results;
use member_vote::storage::{ElectionStore, InMemoryRemote, MemoryLocalCache, apply_phase1};
use member_vote::types::{
    CandidatePhase1, CandidatePhase2, ElectionDocument, PersonRecord, Rating, RatingLevel, Voter,
};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn election(voters: usize, candidates: usize) -> ElectionDocument {
    let mut doc = ElectionDocument::default();
    doc.voters = (0..voters)
        .map(|n| Voter::new(PersonRecord::new(format!("V{n:05}"), format!("Voter {n}"))))
        .collect();
    doc.candidates_phase1 = (0..candidates)
        .map(|n| CandidatePhase1::new(PersonRecord::new(format!("C{n:03}"), format!("Cand {n}"))))
        .collect();
    doc.candidates_phase2 = (0..candidates)
        .map(|n| CandidatePhase2::new(PersonRecord::new(format!("C{n:03}"), format!("Cand {n}"))))
        .collect();
    doc
}

fn ratings(candidates: usize) -> Vec<Rating> {
    (0..candidates)
        .map(|n| Rating::new(format!("C{n:03}"), RatingLevel::ALL[n % 3]))
        .collect()
}

/// Pure document mutation, no backend
fn bench_apply_ballot(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_phase1");
    group.warm_up_time(Duration::from_millis(100));

    for voters in [100, 1_000] {
        let doc = election(voters, 20);
        let ballot = ratings(20);
        group.bench_with_input(BenchmarkId::from_parameter(voters), &voters, |b, _| {
            b.iter_batched(
                || doc.clone(),
                |mut doc| apply_phase1(black_box(&mut doc), "V00042", black_box(&ballot)),
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

/// Full transactional cast through the store and the in-memory remote
fn bench_cast_through_store(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let store = rt.block_on(async {
        let remote = Arc::new(InMemoryRemote::new());
        remote
            .seed("app_data", election(500, 20).to_value().unwrap())
            .await;
        let store = ElectionStore::init(
            StoreConfig::for_testing(),
            Some(remote),
            Arc::new(MemoryLocalCache::new()),
        )
        .await
        .unwrap();
        store.wait_ready().await;
        store
    });
    let ballot = ratings(20);
    let selected: Vec<String> = (0..5).map(|n| format!("C{n:03}")).collect();

    let mut group = c.benchmark_group("store_cast");
    group.warm_up_time(Duration::from_millis(100));

    group.bench_function("phase1", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(store.cast_ballot_phase1("V00007", &ballot).await.unwrap())
        })
    });
    group.bench_function("phase2", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(store.cast_ballot_phase2("V00007", &selected).await.unwrap())
        })
    });
    group.finish();
}

fn bench_tallies(c: &mut Criterion) {
    let mut doc = election(1_000, 20);
    let ballot = ratings(20);
    for n in 0..1_000 {
        apply_phase1(&mut doc, &format!("V{n:05}"), &ballot).unwrap();
    }

    c.bench_function("phase1_stats_all_candidates", |b| {
        b.iter(|| {
            for candidate in &doc.candidates_phase1 {
                black_box(results::phase1_stats(&doc, &candidate.person.national_id));
            }
        })
    });
    c.bench_function("phase2_results", |b| {
        b.iter(|| black_box(results::phase2_results(&doc)))
    });
}

criterion_group!(
    benches,
    bench_apply_ballot,
    bench_cast_through_store,
    bench_tallies
);
criterion_main!(benches);
