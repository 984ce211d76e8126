//! Cosine-distance kNN over `movie_embeddings`. Backed by Postgres + `pgvector`
//! with an HNSW index in production (§6), or an in-memory brute-force double for
//! tests.

pub mod memory;
pub mod pg;

use std::collections::HashSet;

use async_trait::async_trait;
use store::{DomainError, MovieId};

/// How many more rows than `k` to pull before applying `filter_set`, modelling
/// the "over-fetch and trim" exclusion technique an ANN index needs because the
/// exclusion predicate can't be pushed into the graph traversal (§4.2).
const OVERFETCH_MULTIPLIER: usize = 4;
const MAX_OVERFETCH: usize = 2_000;

fn overfetch_k(k: usize, filter_set_len: usize) -> usize {
    (k.saturating_mul(OVERFETCH_MULTIPLIER))
        .max(k.saturating_add(filter_set_len))
        .min(MAX_OVERFETCH)
}

/// Drops excluded ids and trims to `k`, preserving the ascending-distance order
/// the retrieval stage already produced. Returns fewer than `k` rows without
/// erroring when too many candidates were excluded (§4.2).
fn apply_filter_and_trim(
    rows: Vec<(MovieId, f32)>,
    filter_set: &HashSet<MovieId>,
    k: usize,
) -> Vec<(MovieId, f32)> {
    rows.into_iter().filter(|(id, _)| !filter_set.contains(id)).take(k).collect()
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Ordered `(movie_id, distance)` pairs, ascending by cosine distance
    /// (`1 - cosine_similarity`). `filter_set` is applied post-retrieval.
    async fn knn(
        &self,
        query: &[f32],
        k: usize,
        filter_set: &HashSet<MovieId>,
    ) -> Result<Vec<(MovieId, f32)>, DomainError>;
}
