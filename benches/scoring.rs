use criterion::{black_box, criterion_group, criterion_main, Criterion};

// The crate is a binary, so the hot-path math is mirrored here the same way
// the ranking engine composes it: remapped cosine over unit vectors plus the
// cheap auxiliary terms.

fn normalize(v: &[f32]) -> Vec<f32> {
    let n = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if n > 0.0 {
        v.iter().map(|x| x / n).collect()
    } else {
        let uniform = 1.0 / (v.len().max(1) as f32).sqrt();
        vec![uniform; v.len()]
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na <= 0.0 || nb <= 0.0 {
        return 0.0;
    }
    ((dot / (na.sqrt() * nb.sqrt()) + 1.0) / 2.0).clamp(0.0, 1.0)
}

fn synthetic_catalog(n: usize, dim: usize) -> Vec<Vec<f32>> {
    (0..n)
        .map(|i| {
            let raw: Vec<f32> = (0..dim)
                .map(|d| (((i * 31 + d * 7) % 97) as f32 / 97.0) - 0.5)
                .collect();
            normalize(&raw)
        })
        .collect()
}

fn bench_ranking_pass(c: &mut Criterion) {
    const DIM: usize = 576;
    let taste = normalize(&vec![0.3; DIM]);
    let catalog = synthetic_catalog(1000, DIM);

    c.bench_function("cosine_576d", |b| {
        b.iter(|| cosine(black_box(&taste), black_box(&catalog[42])))
    });

    c.bench_function("rank_1000x576", |b| {
        b.iter(|| {
            let mut scores: Vec<(usize, f32)> = catalog
                .iter()
                .enumerate()
                .map(|(i, emb)| (i, 0.75 * cosine(&taste, emb) + 0.05 * 0.5))
                .collect();
            scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            black_box(scores[0].0)
        })
    });
}

fn bench_momentum_step(c: &mut Criterion) {
    const DIM: usize = 576;
    let taste = normalize(&vec![0.5; DIM]);
    let velocity = vec![0.01; DIM];
    let target = normalize(&vec![0.9; DIM]);

    c.bench_function("momentum_step_576d", |b| {
        b.iter(|| {
            let mut v: Vec<f32> = taste
                .iter()
                .zip(velocity.iter())
                .zip(target.iter())
                .map(|((t, v), e)| 0.30 * v + 0.15 * (e - t))
                .collect();
            let n = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if n > 0.5 {
                let s = 0.5 / n;
                v.iter_mut().for_each(|x| *x *= s);
            }
            let raw: Vec<f32> = taste.iter().zip(v.iter()).map(|(t, v)| t + v).collect();
            black_box(normalize(&raw))
        })
    });
}

criterion_group!(benches, bench_ranking_pass, bench_momentum_step);
criterion_main!(benches);
