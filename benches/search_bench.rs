//! Criterion benchmarks for indexing and search throughput.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use tempfile::TempDir;

use fpindex::{Index, Session};

/// Deterministic pseudo-random hash stream (xorshift).
fn hash_stream(seed: u32, len: usize) -> Vec<u32> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state % 1_000_000
        })
        .collect()
}

fn populate(session: &Session, docs: u32, hashes_per_doc: usize) {
    session.begin().unwrap();
    for doc_id in 0..docs {
        session
            .insert(doc_id, &hash_stream(doc_id + 1, hashes_per_doc))
            .unwrap();
    }
    session.commit().unwrap();
}

fn bench_insert_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_commit");
    group.throughput(Throughput::Elements(1000));
    group.bench_function("1000_docs_120_hashes", |b| {
        b.iter_with_setup(
            || {
                let dir = TempDir::new().unwrap();
                let index = Index::open(dir.path()).unwrap();
                (dir, index)
            },
            |(dir, index)| {
                let session = index.begin_session();
                populate(&session, 1000, 120);
                drop(dir);
            },
        )
    });
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let index = Index::open(dir.path()).unwrap();
    let session = index.begin_session();
    populate(&session, 5000, 120);

    let query = hash_stream(3, 120);

    let mut group = c.benchmark_group("search");
    group.throughput(Throughput::Elements(1));
    group.bench_function("120_hash_query", |b| {
        b.iter(|| black_box(session.search(black_box(&query)).unwrap()))
    });
    group.finish();
}

criterion_group!(benches, bench_insert_commit, bench_search);
criterion_main!(benches);
