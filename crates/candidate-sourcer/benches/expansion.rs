use std::collections::BTreeSet;

use criterion::{criterion_group, criterion_main, Criterion};
use store::memory::MemoryStore;
use store::{Movie, MovieEmbedding};
use vector_index::memory::MemoryVectorIndex;

use candidate_sourcer::{source, Query, SourcerConfig};

fn seeded_index(n: usize) -> (MemoryStore, MemoryVectorIndex) {
    let store = MemoryStore::new();
    let index = MemoryVectorIndex::new();
    for id in 0..n as i64 {
        let embedding = vec![(id % 17) as f32, (id % 13) as f32, (id % 7) as f32];
        store.insert_movie(Movie {
            id,
            title: format!("movie-{id}"),
            release_date: None,
            runtime: Some(100),
            original_language: Some("en".into()),
            vote_average: 7.0,
            vote_count: 10,
            genres: BTreeSet::new(),
            keywords: BTreeSet::new(),
            overview: None,
            poster_path: None,
        });
        store.insert_embedding(MovieEmbedding {
            movie_id: id,
            embedding: embedding.clone(),
            embedding_model: "bench".into(),
            doc_hash: "h".into(),
        });
        index.insert(id, embedding);
    }
    (store, index)
}

fn bench_expansion(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (store, index) = seeded_index(5_000);

    c.bench_function("candidate_sourcer_anchor_expansion_k20", |b| {
        b.iter(|| {
            rt.block_on(source(&store, &index, Query::Anchor { movie_id: 0 }, 20, &SourcerConfig::default()))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_expansion);
criterion_main!(benches);
