//! Criterion benchmarks for insert, query, and filtered query paths.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use oriondb::{Config, Database, Metadata, MetadataValue};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

const DIM: usize = 64;

fn random_vector(rng: &mut StdRng) -> Vec<f32> {
    (0..DIM).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn populated_db(n: u64) -> (Database, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let db = Database::create(
        dir.path().join("bench.orion"),
        Config::new(DIM as u32, n + 16).unwrap(),
    )
    .unwrap();
    let mut rng = StdRng::seed_from_u64(42);
    for i in 0..n {
        let mut meta = Metadata::new();
        meta.insert(
            "bucket".to_string(),
            MetadataValue::Int((i % 10) as i64),
        );
        db.add(i, &random_vector(&mut rng), meta);
    }
    (db, dir)
}

fn bench_insert(c: &mut Criterion) {
    c.bench_function("insert_64d", |b| {
        let dir = tempdir().unwrap();
        let db = Database::create(
            dir.path().join("insert.orion"),
            Config::new(DIM as u32, 1_000_000).unwrap(),
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let mut next_id = 0u64;
        b.iter(|| {
            db.add(next_id, &random_vector(&mut rng), Metadata::new());
            next_id += 1;
        });
    });
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_64d");
    for &n in &[1_000u64, 10_000] {
        let (db, _dir) = populated_db(n);
        let mut rng = StdRng::seed_from_u64(99);
        let query = random_vector(&mut rng);
        group.bench_with_input(BenchmarkId::new("top10", n), &n, |b, _| {
            b.iter(|| black_box(db.query(&query, 10)));
        });
    }
    group.finish();
}

fn bench_filtered_query(c: &mut Criterion) {
    let (db, _dir) = populated_db(10_000);
    let mut rng = StdRng::seed_from_u64(3);
    let query = random_vector(&mut rng);
    let mut filter = Metadata::new();
    filter.insert("bucket".to_string(), MetadataValue::Int(3));

    c.bench_function("filtered_query_64d_10k", |b| {
        b.iter(|| black_box(db.query_with_filter(&query, 10, &filter)));
    });
}

criterion_group!(benches, bench_insert, bench_query, bench_filtered_query);
criterion_main!(benches);
