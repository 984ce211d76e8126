use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::instrument;

use crate::error::DomainError;
use crate::types::*;
use crate::{ProfileRebuildFn, Store};

const MOVIE_COLUMNS: &str = "id, title, release_date, runtime, original_language, vote_average, \
     vote_count, genres, keywords, overview, poster_path";

/// Postgres-backed [`Store`]. Every method but [`Store::put_rating`] runs a
/// single parameterized statement against the pool; `put_rating` is the one
/// compound write and owns its own transaction, since nothing else in this
/// trait needs one (§4.1).
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_movie(row: &PgRow) -> Result<Movie, DomainError> {
        let genres: String = row.try_get("genres")?;
        let keywords: String = row.try_get("keywords")?;
        Ok(Movie {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            release_date: row.try_get("release_date")?,
            runtime: row.try_get("runtime")?,
            original_language: row.try_get("original_language")?,
            vote_average: row.try_get("vote_average")?,
            vote_count: row.try_get("vote_count")?,
            genres: parse_token_set(&genres),
            keywords: parse_token_set(&keywords),
            overview: row.try_get("overview")?,
            poster_path: row.try_get("poster_path")?,
        })
    }

    fn row_to_embedding(row: &PgRow) -> Result<MovieEmbedding, DomainError> {
        let embedding: pgvector::Vector = row.try_get("embedding")?;
        Ok(MovieEmbedding {
            movie_id: row.try_get("movie_id")?,
            embedding: embedding.to_vec(),
            embedding_model: row.try_get("embedding_model")?,
            doc_hash: row.try_get("doc_hash")?,
        })
    }

    fn row_to_rating(row: &PgRow) -> Result<Rating, DomainError> {
        let status: String = row.try_get("status")?;
        let rating: Option<i32> = row.try_get("rating")?;
        Ok(Rating {
            user_id: row.try_get("user_id")?,
            movie_id: row.try_get("movie_id")?,
            rating: rating.map(|v| v as u8),
            status: RatingStatus::from_str(&status)?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_profile(row: &PgRow) -> Result<UserProfile, DomainError> {
        let embedding: pgvector::Vector = row.try_get("embedding")?;
        Ok(UserProfile {
            user_id: row.try_get("user_id")?,
            embedding: embedding.to_vec(),
            num_ratings: row.try_get("num_ratings")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Contributors for profile rebuild: watched, rating >= 3, embedding present.
    /// Takes whatever executor the caller passes so it participates in the same
    /// transaction as the rating upsert (§4.3 step 1-2).
    async fn load_contributors<'e, E>(exec: E, user_id: UserId) -> Result<Vec<Contributor>, DomainError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let rows = sqlx::query(
            r#"
            SELECT r.movie_id, r.rating, e.embedding
            FROM user_movie_ratings r
            JOIN movie_embeddings e ON e.movie_id = r.movie_id
            WHERE r.user_id = $1 AND r.status = 'watched' AND r.rating >= 3
            "#,
        )
        .bind(user_id)
        .fetch_all(exec)
        .await?;

        rows.iter()
            .map(|row| -> Result<Contributor, DomainError> {
                let rating: i32 = row.try_get("rating")?;
                let embedding: pgvector::Vector = row.try_get("embedding")?;
                Ok(Contributor {
                    movie_id: row.try_get("movie_id")?,
                    rating: rating as u8,
                    embedding: embedding.to_vec(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl Store for PgStore {
    #[instrument(skip(self))]
    async fn get_movie(&self, id: MovieId) -> Result<Movie, DomainError> {
        let row = sqlx::query(&format!("SELECT {MOVIE_COLUMNS} FROM movies WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Self::row_to_movie(&row),
            None => Err(DomainError::MovieNotFound(id)),
        }
    }

    #[instrument(skip(self))]
    async fn lookup_movie_by_title(&self, query: &str) -> Result<Option<Movie>, DomainError> {
        let q = query.trim();
        if q.is_empty() {
            return Err(DomainError::InvalidArgument("title must not be empty".into()));
        }
        const ORDER: &str = "ORDER BY vote_count DESC, release_date DESC, id ASC LIMIT 1";

        for predicate in [
            "lower(title) = lower($1)",
            "lower(title) LIKE lower($1) || '%'",
            "lower(title) LIKE '%' || lower($1) || '%'",
        ] {
            let sql = format!("SELECT {MOVIE_COLUMNS} FROM movies WHERE {predicate} {ORDER}");
            if let Some(row) = sqlx::query(&sql).bind(q).fetch_optional(&self.pool).await? {
                return Ok(Some(Self::row_to_movie(&row)?));
            }
        }
        Ok(None)
    }

    #[instrument(skip(self))]
    async fn get_movie_embedding(&self, id: MovieId) -> Result<MovieEmbedding, DomainError> {
        let row = sqlx::query(
            "SELECT movie_id, embedding, embedding_model, doc_hash FROM movie_embeddings WHERE movie_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Self::row_to_embedding(&row),
            None => Err(DomainError::EmbeddingNotFound(id)),
        }
    }

    #[instrument(skip(self, filter))]
    async fn list_ratings(
        &self,
        user_id: UserId,
        filter: &RatingFilter,
        k: usize,
        cursor: usize,
    ) -> Result<Page<Rating>, DomainError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT user_id, movie_id, rating, status, updated_at FROM user_movie_ratings WHERE user_id = ",
        );
        qb.push_bind(user_id);
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(min) = filter.rating_min {
            qb.push(" AND rating >= ").push_bind(min as i32);
        }
        if let Some(max) = filter.rating_max {
            qb.push(" AND rating <= ").push_bind(max as i32);
        }
        if let Some(since) = filter.since {
            qb.push(" AND updated_at >= ").push_bind(since);
        }
        qb.push(" ORDER BY updated_at DESC, movie_id ASC LIMIT ");
        qb.push_bind((k + 1) as i64);
        qb.push(" OFFSET ");
        qb.push_bind(cursor as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        let ratings = rows
            .iter()
            .map(Self::row_to_rating)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::trim(ratings, k))
    }

    #[instrument(skip(self))]
    async fn recent_ratings(&self, user_id: UserId, limit: usize) -> Result<Vec<Rating>, DomainError> {
        let rows = sqlx::query(
            "SELECT user_id, movie_id, rating, status, updated_at FROM user_movie_ratings \
             WHERE user_id = $1 ORDER BY updated_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_rating).collect()
    }

    #[instrument(skip(self))]
    async fn get_seen_movie_ids(&self, user_id: UserId) -> Result<HashSet<MovieId>, DomainError> {
        let rows = sqlx::query("SELECT movie_id FROM user_movie_ratings WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<MovieId, _>("movie_id").map_err(DomainError::from))
            .collect()
    }

    #[instrument(skip(self))]
    async fn get_profile(&self, user_id: UserId) -> Result<Option<UserProfile>, DomainError> {
        let row = sqlx::query(
            "SELECT user_id, embedding, num_ratings, updated_at FROM user_profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| Self::row_to_profile(&row)).transpose()
    }

    #[instrument(skip(self, exclude))]
    async fn popularity_queue(
        &self,
        exclude: &HashSet<MovieId>,
        k: usize,
        cursor: usize,
    ) -> Result<Page<Movie>, DomainError> {
        let excluded: Vec<MovieId> = exclude.iter().copied().collect();
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {MOVIE_COLUMNS} FROM movies WHERE NOT (id = ANY("
        ));
        qb.push_bind(excluded);
        qb.push(")) ORDER BY vote_count DESC, vote_average DESC, id ASC LIMIT ");
        qb.push_bind((k + 1) as i64);
        qb.push(" OFFSET ");
        qb.push_bind(cursor as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        let movies = rows
            .iter()
            .map(Self::row_to_movie)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::trim(movies, k))
    }

    #[instrument(skip(self, rebuild))]
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

        let mut tx = self.pool.begin().await?;

        // Serializes concurrent PUTs for the same user (§5) without requiring a
        // pre-existing user_profiles row to lock against.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO user_movie_ratings (user_id, movie_id, rating, status, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (user_id, movie_id)
            DO UPDATE SET rating = EXCLUDED.rating, status = EXCLUDED.status, updated_at = now()
            "#,
        )
        .bind(user_id)
        .bind(movie_id)
        .bind(rating.map(|r| r as i32))
        .bind(status.as_str())
        .execute(&mut *tx)
        .await?;

        let contributors = Self::load_contributors(&mut *tx, user_id).await?;

        match rebuild(&contributors) {
            Some((embedding, num_ratings)) => {
                let vector = pgvector::Vector::from(embedding);
                sqlx::query(
                    r#"
                    INSERT INTO user_profiles (user_id, embedding, num_ratings, updated_at)
                    VALUES ($1, $2, $3, now())
                    ON CONFLICT (user_id)
                    DO UPDATE SET embedding = EXCLUDED.embedding, num_ratings = EXCLUDED.num_ratings, updated_at = now()
                    "#,
                )
                .bind(user_id)
                .bind(vector)
                .bind(num_ratings)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM user_profiles WHERE user_id = $1")
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}
