use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use std::hint::black_box;

use ragvault::{chunk_document, ChunkParams, FlatL2Index};

const DIMENSIONS: usize = 384;
const NUM_QUERIES: usize = 10;
const TOP_K: usize = 3;

fn configure_criterion() -> Criterion {
    Criterion::default()
        .sample_size(10)
        .measurement_time(std::time::Duration::from_secs(20))
        .warm_up_time(std::time::Duration::from_secs(3))
        .configure_from_args()
}

fn random_vectors(rng: &mut StdRng, count: usize) -> Vec<Vec<f32>> {
    (0..count)
        .map(|_| (0..DIMENSIONS).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

fn search_index(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let queries = random_vectors(&mut rng, NUM_QUERIES);

    let mut group = c.benchmark_group("flat_l2_search");
    for rows in [1_000usize, 10_000, 50_000] {
        let index = FlatL2Index::from_rows(DIMENSIONS, &random_vectors(&mut rng, rows))
            .expect("benchmark rows have a fixed dimension");

        group.bench_with_input(
            BenchmarkId::new(format!("search_{NUM_QUERIES}_queries"), rows),
            &index,
            |b, index| {
                b.iter(|| {
                    for query in &queries {
                        black_box(index.search(query, TOP_K).expect("query has index dimension"));
                    }
                })
            },
        );
    }
    group.finish();
}

fn chunk_documents(c: &mut Criterion) {
    let paragraph = "Patient reports intermittent headaches and mild fever. \
                     Blood pressure 128/84, resting heart rate 72. \
                     Advised hydration and a follow-up in two weeks.\n\n";
    let params = ChunkParams::default();

    let mut group = c.benchmark_group("chunk_document");
    for repeats in [10usize, 100, 1_000] {
        let text = paragraph.repeat(repeats);
        group.bench_with_input(BenchmarkId::from_parameter(text.len()), &text, |b, text| {
            b.iter(|| black_box(chunk_document(text, "notes.txt", &params)))
        });
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = configure_criterion();
    targets = search_index, chunk_documents
}
criterion_main!(benches);
