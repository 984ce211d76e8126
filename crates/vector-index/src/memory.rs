use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use store::{cosine_distance, DomainError, MovieId};

use crate::{apply_filter_and_trim, overfetch_k, VectorIndex};

/// Brute-force in-memory [`VectorIndex`] test double.
#[derive(Default)]
pub struct MemoryVectorIndex {
    vectors: RwLock<HashMap<MovieId, Vec<f32>>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, movie_id: MovieId, embedding: Vec<f32>) {
        self.vectors.write().unwrap().insert(movie_id, embedding);
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn knn(
        &self,
        query: &[f32],
        k: usize,
        filter_set: &HashSet<MovieId>,
    ) -> Result<Vec<(MovieId, f32)>, DomainError> {
        let fetch_k = overfetch_k(k, filter_set.len());
        let vectors = self.vectors.read().unwrap();
        let mut rows: Vec<(MovieId, f32)> =
            vectors.iter().map(|(id, vec)| (*id, cosine_distance(query, vec))).collect();
        rows.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        rows.truncate(fetch_k);
        Ok(apply_filter_and_trim(rows, filter_set, k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn knn_orders_by_ascending_cosine_distance() {
        let index = MemoryVectorIndex::new();
        index.insert(1, vec![1.0, 0.0]);
        index.insert(2, vec![0.0, 1.0]);
        index.insert(3, vec![0.9, 0.1]);

        let result = index.knn(&[1.0, 0.0], 10, &HashSet::new()).await.unwrap();
        assert_eq!(result[0].0, 1);
        assert_eq!(result[1].0, 3);
        assert_eq!(result[2].0, 2);
    }

    #[tokio::test]
    async fn knn_applies_filter_set_and_returns_fewer_without_erroring() {
        let index = MemoryVectorIndex::new();
        index.insert(1, vec![1.0, 0.0]);
        index.insert(2, vec![0.9, 0.1]);

        let filter: HashSet<MovieId> = HashSet::from([1, 2]);
        let result = index.knn(&[1.0, 0.0], 5, &filter).await.unwrap();
        assert!(result.is_empty());
    }
}
