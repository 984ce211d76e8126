use std::collections::BTreeSet;

use criterion::{criterion_group, criterion_main, Criterion};

use candidate_sourcer::Candidate;
use reranker::{rerank, RerankerConfig};
use scoring_context::FeatureContext;
use store::Movie;

fn movie(id: store::MovieId) -> Movie {
    Movie {
        id,
        title: format!("movie-{id}"),
        release_date: None,
        runtime: Some(100),
        original_language: Some("en".into()),
        vote_average: 7.0,
        vote_count: 1000 + id,
        genres: BTreeSet::from(["drama".to_string()]),
        keywords: BTreeSet::new(),
        overview: None,
        poster_path: None,
    }
}

fn candidates(n: i64) -> Vec<Candidate> {
    (0..n)
        .map(|i| Candidate {
            movie: movie(i),
            distance: (i as f32 % 100.0) / 100.0,
            embedding: vec![i as f32, (n - i) as f32],
        })
        .collect()
}

fn bench_batch_scoring(c: &mut Criterion) {
    let context = FeatureContext { genres: BTreeSet::from(["drama".to_string()]), ..Default::default() };
    let config = RerankerConfig::default();

    c.bench_function("rerank_500_candidates", |b| {
        b.iter(|| rerank(candidates(500), &context, None, 20, &config))
    });
}

criterion_group!(benches, bench_batch_scoring);
criterion_main!(benches);
