//! Typed, parameterized access to `movies`, `movie_embeddings`, `user_movie_ratings`
//! and `user_profiles`. Every other crate in the workspace depends on this one for
//! the domain types and the [`DomainError`] tagged-failure type.

pub mod error;
pub mod memory;
pub mod pg;
pub mod types;

use std::collections::HashSet;

use async_trait::async_trait;

pub use error::DomainError;
pub use types::{
    cosine_distance, Contributor, MovieEmbedding, Page, Rating, RatingFilter, RatingStatus,
    UserProfile,
};
pub use types::{Movie, MovieId, UserId};

/// Recomputes the replacement profile state from the fresh contributor rows a
/// rating mutation loaded inside its own transaction. Returns `None` when no
/// contributors remain, signalling the caller (the `Store` impl) to delete the
/// profile row instead of upserting it. This is how `profile-builder`'s pure
/// aggregation algorithm (§4.3) is threaded into `Store::put_rating` without
/// `store` depending on `profile-builder`.
pub type ProfileRebuildFn<'a> = dyn Fn(&[Contributor]) -> Option<(Vec<f32>, i64)> + Send + Sync + 'a;

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_movie(&self, id: MovieId) -> Result<Movie, DomainError>;

    /// Case-insensitive exact match first, then prefix, then substring; ties
    /// broken by `vote_count desc, release_date desc, id asc`.
    async fn lookup_movie_by_title(&self, query: &str) -> Result<Option<Movie>, DomainError>;

    async fn get_movie_embedding(&self, id: MovieId) -> Result<MovieEmbedding, DomainError>;

    /// Offset-based pagination: fetches `k+1` rows, ordered `updated_at desc,
    /// movie_id asc`.
    async fn list_ratings(
        &self,
        user_id: UserId,
        filter: &RatingFilter,
        k: usize,
        cursor: usize,
    ) -> Result<Page<Rating>, DomainError>;

    /// Most recent `limit` ratings for a user, ordered `updated_at desc` — feeds
    /// the Scoring Context, not paginated.
    async fn recent_ratings(&self, user_id: UserId, limit: usize) -> Result<Vec<Rating>, DomainError>;

    /// The set of movies with any rating row (watched or unwatched) for `user_id`.
    async fn get_seen_movie_ids(&self, user_id: UserId) -> Result<HashSet<MovieId>, DomainError>;

    async fn get_profile(&self, user_id: UserId) -> Result<Option<UserProfile>, DomainError>;

    /// `(vote_count desc, vote_average desc, id asc)` excluding `exclude`.
    async fn popularity_queue(
        &self,
        exclude: &HashSet<MovieId>,
        k: usize,
        cursor: usize,
    ) -> Result<Page<Movie>, DomainError>;

    /// The one compound write in the system. Upserts the rating row, loads the
    /// fresh contributor set (`status=watched AND rating>=3`, embedding present),
    /// calls `rebuild` to get the replacement profile state, then upserts or
    /// deletes `user_profiles` — all inside one atomic scope (Invariant 2).
    /// Concurrent mutations for the same user are serialized by the
    /// implementation (§5: "serialized using a row-level lock").
    async fn put_rating(
        &self,
        user_id: UserId,
        movie_id: MovieId,
        rating: Option<u8>,
        status: RatingStatus,
        rebuild: &ProfileRebuildFn<'_>,
    ) -> Result<(), DomainError>;
}
