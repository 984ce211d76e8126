use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::DomainError;
use crate::types::*;
use crate::{ProfileRebuildFn, Store};

#[derive(Default)]
struct State {
    movies: HashMap<MovieId, Movie>,
    embeddings: HashMap<MovieId, MovieEmbedding>,
    ratings: HashMap<(UserId, MovieId), Rating>,
    profiles: HashMap<UserId, UserProfile>,
}

/// An in-memory [`Store`] double. Every other crate's unit tests run against
/// this instead of a database.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_movie(&self, movie: Movie) {
        self.state.write().unwrap().movies.insert(movie.id, movie);
    }

    pub fn insert_embedding(&self, embedding: MovieEmbedding) {
        self.state.write().unwrap().embeddings.insert(embedding.movie_id, embedding);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_movie(&self, id: MovieId) -> Result<Movie, DomainError> {
        self.state
            .read()
            .unwrap()
            .movies
            .get(&id)
            .cloned()
            .ok_or(DomainError::MovieNotFound(id))
    }

    async fn lookup_movie_by_title(&self, query: &str) -> Result<Option<Movie>, DomainError> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return Err(DomainError::InvalidArgument("title must not be empty".into()));
        }
        let state = self.state.read().unwrap();
        let mut candidates: Vec<Movie> = state.movies.values().cloned().collect();
        candidates.sort_by(|a, b| {
            b.vote_count
                .cmp(&a.vote_count)
                .then(b.release_date.cmp(&a.release_date))
                .then(a.id.cmp(&b.id))
        });

        let tiers: [fn(&str, &str) -> bool; 3] = [
            |title, q| title == q,
            |title, q| title.starts_with(q),
            |title, q| title.contains(q),
        ];
        for tier in tiers {
            if let Some(m) = candidates.iter().find(|m| tier(&m.title.to_lowercase(), &q)) {
                return Ok(Some(m.clone()));
            }
        }
        Ok(None)
    }

    async fn get_movie_embedding(&self, id: MovieId) -> Result<MovieEmbedding, DomainError> {
        self.state
            .read()
            .unwrap()
            .embeddings
            .get(&id)
            .cloned()
            .ok_or(DomainError::EmbeddingNotFound(id))
    }

    async fn list_ratings(
        &self,
        user_id: UserId,
        filter: &RatingFilter,
        k: usize,
        cursor: usize,
    ) -> Result<Page<Rating>, DomainError> {
        let state = self.state.read().unwrap();
        let mut rows: Vec<Rating> = state
            .ratings
            .values()
            .filter(|r| r.user_id == user_id)
            .filter(|r| filter.status.is_none_or(|s| s == r.status))
            .filter(|r| filter.rating_min.is_none_or(|min| r.rating.is_some_and(|v| v >= min)))
            .filter(|r| filter.rating_max.is_none_or(|max| r.rating.is_some_and(|v| v <= max)))
            .filter(|r| filter.since.is_none_or(|since| r.updated_at >= since))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.movie_id.cmp(&b.movie_id)));
        let page: Vec<Rating> = rows.into_iter().skip(cursor).take(k + 1).collect();
        Ok(Page::trim(page, k))
    }

    async fn recent_ratings(&self, user_id: UserId, limit: usize) -> Result<Vec<Rating>, DomainError> {
        let state = self.state.read().unwrap();
        let mut rows: Vec<Rating> = state.ratings.values().filter(|r| r.user_id == user_id).cloned().collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.movie_id.cmp(&b.movie_id)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn get_seen_movie_ids(&self, user_id: UserId) -> Result<HashSet<MovieId>, DomainError> {
        Ok(self
            .state
            .read()
            .unwrap()
            .ratings
            .values()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.movie_id)
            .collect())
    }

    async fn get_profile(&self, user_id: UserId) -> Result<Option<UserProfile>, DomainError> {
        Ok(self.state.read().unwrap().profiles.get(&user_id).cloned())
    }

    async fn popularity_queue(
        &self,
        exclude: &HashSet<MovieId>,
        k: usize,
        cursor: usize,
    ) -> Result<Page<Movie>, DomainError> {
        let state = self.state.read().unwrap();
        let mut rows: Vec<Movie> = state.movies.values().filter(|m| !exclude.contains(&m.id)).cloned().collect();
        rows.sort_by(|a, b| {
            b.vote_count
                .cmp(&a.vote_count)
                .then(b.vote_average.partial_cmp(&a.vote_average).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.id.cmp(&b.id))
        });
        let page: Vec<Movie> = rows.into_iter().skip(cursor).take(k + 1).collect();
        Ok(Page::trim(page, k))
    }

    async fn put_rating(
        &self,
        user_id: UserId,
        movie_id: MovieId,
        rating: Option<u8>,
        status: RatingStatus,
        rebuild: &ProfileRebuildFn<'_>,
    ) -> Result<(), DomainError> {
        if let Some(r) = rating {
            if r > 5 {
                return Err(DomainError::InvalidArgument(format!("rating {r} out of range 0..5")));
            }
        }

        let mut state = self.state.write().unwrap();
        state.ratings.insert(
            (user_id, movie_id),
            Rating { user_id, movie_id, rating, status, updated_at: Utc::now() },
        );

        let contributors: Vec<Contributor> = state
            .ratings
            .values()
            .filter(|r| r.user_id == user_id && r.status == RatingStatus::Watched)
            .filter_map(|r| {
                let rv = r.rating?;
                if rv < 3 {
                    return None;
                }
                let embedding = state.embeddings.get(&r.movie_id)?.embedding.clone();
                Some(Contributor { movie_id: r.movie_id, rating: rv, embedding })
            })
            .collect();

        match rebuild(&contributors) {
            Some((embedding, num_ratings)) => {
                state.profiles.insert(
                    user_id,
                    UserProfile { user_id, embedding, num_ratings, updated_at: Utc::now() },
                );
            }
            None => {
                state.profiles.remove(&user_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie(id: MovieId, title: &str, vote_count: i64) -> Movie {
        Movie {
            id,
            title: title.to_string(),
            release_date: None,
            runtime: Some(100),
            original_language: Some("en".into()),
            vote_average: 7.0,
            vote_count,
            genres: Default::default(),
            keywords: Default::default(),
            overview: None,
            poster_path: None,
        }
    }

    #[tokio::test]
    async fn lookup_prefers_exact_match_over_prefix() {
        let store = MemoryStore::new();
        store.insert_movie(movie(1, "Heat", 500));
        store.insert_movie(movie(2, "Heat Wave", 900));

        let found = store.lookup_movie_by_title("heat").await.unwrap().unwrap();
        assert_eq!(found.id, 1);
    }

    #[tokio::test]
    async fn lookup_falls_back_to_substring_when_no_prefix_matches() {
        let store = MemoryStore::new();
        store.insert_movie(movie(1, "The Great Escape", 10));

        let found = store.lookup_movie_by_title("great").await.unwrap().unwrap();
        assert_eq!(found.id, 1);
    }

    #[tokio::test]
    async fn put_rating_rebuilds_profile_from_contributors() {
        let store = MemoryStore::new();
        store.insert_embedding(MovieEmbedding {
            movie_id: 1,
            embedding: vec![1.0, 0.0],
            embedding_model: "test".into(),
            doc_hash: "h".into(),
        });

        store
            .put_rating(7, 1, Some(5), RatingStatus::Watched, &|contributors| {
                if contributors.is_empty() {
                    None
                } else {
                    Some((contributors[0].embedding.clone(), contributors.len() as i64))
                }
            })
            .await
            .unwrap();

        let profile = store.get_profile(7).await.unwrap().unwrap();
        assert_eq!(profile.num_ratings, 1);
        assert_eq!(profile.embedding, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn put_rating_deletes_profile_when_no_contributors_remain() {
        let store = MemoryStore::new();
        store
            .put_rating(7, 1, Some(2), RatingStatus::Watched, &|_| None)
            .await
            .unwrap();

        assert!(store.get_profile(7).await.unwrap().is_none());
    }
}
