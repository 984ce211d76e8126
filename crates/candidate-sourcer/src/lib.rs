//! Produces an expanded candidate set for a user- or anchor-movie query,
//! filtering seen items (§4.4).

use std::collections::HashSet;

use tracing::instrument;

use store::{DomainError, Movie, MovieId, Store, UserId};
use vector_index::VectorIndex;

#[derive(Debug, Clone, Copy)]
pub struct SourcerConfig {
    pub rerank_fetch_multiplier: usize,
    pub max_fetch_candidates: usize,
}

impl Default for SourcerConfig {
    fn default() -> Self {
        Self { rerank_fetch_multiplier: 5, max_fetch_candidates: 500 }
    }
}

/// The two query modes `Source` supports (§4.4).
pub enum Query {
    /// Similar-to-movie: excludes the anchor itself, no seen-set filtering.
    Anchor { movie_id: MovieId },
    /// Recommendations: excludes the user's seen set. Fails `ProfileNotFound`
    /// when the user has no profile row; the caller decides the popularity
    /// fallback (§4.7).
    User { user_id: UserId },
}

/// A movie surviving retrieval and filtering, with its cosine distance from the
/// query vector preserved from the index (§4.4 "preserve the index's distance").
/// Carries its own embedding too, so the Reranker can score it against a second
/// context (the dislike centroid) without a further Store round-trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub movie: Movie,
    pub distance: f32,
    pub embedding: Vec<f32>,
}

fn fetch_k(k_final: usize, config: &SourcerConfig) -> usize {
    k_final
        .saturating_mul(config.rerank_fetch_multiplier)
        .min(config.max_fetch_candidates)
        .max(k_final)
}

/// Fetches `k_fetch = min(MAX_FETCH_CANDIDATES, k_final * RERANK_FETCH_MULTIPLIER)`
/// from the Vector Index, then drops the anchor id, seen ids (user mode), and
/// any id without an embedding, preserving ascending-distance order.
#[instrument(skip(store, index, query, config))]
pub async fn source(
    store: &(impl Store + ?Sized),
    index: &(impl VectorIndex + ?Sized),
    query: Query,
    k_final: usize,
    config: &SourcerConfig,
) -> Result<Vec<Candidate>, DomainError> {
    let k_fetch = fetch_k(k_final, config);

    let (query_vec, anchor_id, seen_ids) = match query {
        Query::Anchor { movie_id } => {
            let embedding = store.get_movie_embedding(movie_id).await?;
            (embedding.embedding, Some(movie_id), HashSet::new())
        }
        Query::User { user_id } => {
            let profile = store
                .get_profile(user_id)
                .await?
                .ok_or(DomainError::ProfileNotFound(user_id))?;
            let seen = store.get_seen_movie_ids(user_id).await?;
            (profile.embedding, None, seen)
        }
    };

    // Over-fetch-and-trim happens once, inside the index, against the union of
    // both exclusions, rather than being redone at this layer.
    let mut filter_set: HashSet<MovieId> = seen_ids.clone();
    if let Some(id) = anchor_id {
        filter_set.insert(id);
    }

    let retrieved = index.knn(&query_vec, k_fetch, &filter_set).await?;

    let mut candidates = Vec::with_capacity(retrieved.len());
    for (movie_id, distance) in retrieved {
        if Some(movie_id) == anchor_id || seen_ids.contains(&movie_id) {
            continue;
        }
        let embedding = match store.get_movie_embedding(movie_id).await {
            Ok(e) => e.embedding,
            Err(DomainError::EmbeddingNotFound(_)) => continue,
            Err(e) => return Err(e),
        };
        candidates.push(Candidate { movie: store.get_movie(movie_id).await?, distance, embedding });
    }

    Ok(candidates)
}
