use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use ndarray::Array2;
use rand::Rng;
use stylesearch::embedding::Embedding;
use stylesearch::index::{FlatIndex, VectorIndex};

fn normalized_rows(rows: usize, dim: usize) -> Array2<f32> {
    let mut rng = rand::rng();
    let mut data = Array2::from_shape_fn((rows, dim), |_| rng.random::<f32>() - 0.5);
    for mut row in data.rows_mut() {
        let norm = row.iter().map(|x| x * x).sum::<f32>().sqrt();
        row.mapv_inplace(|x| x / norm);
    }
    data
}

fn bench_flat_search(c: &mut Criterion) {
    let index = FlatIndex::build(normalized_rows(10_000, 512)).unwrap();

    let queries: Vec<Embedding> = normalized_rows(16, 512)
        .rows()
        .into_iter()
        .map(|row| Embedding::new(row.to_vec()))
        .collect();

    c.bench_function("flat_search_10k_batch16_top5", |b| {
        b.iter(|| index.search(black_box(&queries), 5).unwrap())
    });

    let single = &queries[..1];
    c.bench_function("flat_search_10k_single_top5", |b| {
        b.iter(|| index.search(black_box(single), 5).unwrap())
    });
}

criterion_group!(benches, bench_flat_search);
criterion_main!(benches);
