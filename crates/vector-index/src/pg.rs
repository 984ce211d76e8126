use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use store::{DomainError, MovieId};

use crate::{apply_filter_and_trim, overfetch_k, VectorIndex};

/// `pgvector`-backed [`VectorIndex`]: cosine distance via the `<=>` operator
/// against an `hnsw` pgvector index on `movie_embeddings.embedding` (§6).
pub struct PgVectorIndex {
    pool: PgPool,
}

impl PgVectorIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    #[instrument(skip(self, query, filter_set))]
    async fn knn(
        &self,
        query: &[f32],
        k: usize,
        filter_set: &HashSet<MovieId>,
    ) -> Result<Vec<(MovieId, f32)>, DomainError> {
        let fetch_k = overfetch_k(k, filter_set.len());
        let vector = pgvector::Vector::from(query.to_vec());

        let rows = sqlx::query(
            "SELECT movie_id, (embedding <=> $1) AS distance FROM movie_embeddings \
             ORDER BY embedding <=> $1 ASC LIMIT $2",
        )
        .bind(vector)
        .bind(fetch_k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::IndexUnavailable(e.to_string()))?;

        let retrieved: Vec<(MovieId, f32)> = rows
            .iter()
            .map(|row| -> Result<(MovieId, f32), DomainError> {
                let distance: f64 = row
                    .try_get("distance")
                    .map_err(|e| DomainError::IndexUnavailable(e.to_string()))?;
                let movie_id: MovieId = row
                    .try_get("movie_id")
                    .map_err(|e| DomainError::IndexUnavailable(e.to_string()))?;
                Ok((movie_id, distance as f32))
            })
            .collect::<Result<_, _>>()?;

        Ok(apply_filter_and_trim(retrieved, filter_set, k))
    }
}
