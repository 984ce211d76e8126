//! Exercises [`PgStore`] against a real database. Runs whenever `DATABASE_URL`
//! is reachable: `#[sqlx::test]` provisions a fresh, migrated database per
//! test case from `migrations/` and tears it down afterward.

use sqlx::PgPool;

use store::pg::PgStore;
use store::{DomainError, RatingFilter, RatingStatus, Store};

async fn seed_movie(pool: &PgPool, id: i64, title: &str, genres: &str) {
    sqlx::query(
        "INSERT INTO movies (id, title, vote_average, vote_count, genres, keywords) \
         VALUES ($1, $2, 7.0, 100, $3, '')",
    )
    .bind(id)
    .bind(title)
    .bind(genres)
    .execute(pool)
    .await
    .unwrap();
}

async fn seed_user(pool: &PgPool, id: i64) {
    sqlx::query("INSERT INTO users (id) VALUES ($1)").bind(id).execute(pool).await.unwrap();
}

async fn seed_embedding(pool: &PgPool, movie_id: i64, embedding: Vec<f32>) {
    sqlx::query(
        "INSERT INTO movie_embeddings (movie_id, embedding, embedding_model, doc_hash) \
         VALUES ($1, $2, 'test-model', 'hash')",
    )
    .bind(movie_id)
    .bind(pgvector::Vector::from(embedding))
    .execute(pool)
    .await
    .unwrap();
}

#[sqlx::test(migrations = "../../migrations")]
async fn get_movie_round_trips_genres_and_keywords(pool: PgPool) {
    seed_movie(&pool, 1, "Heat", "crime,drama").await;
    let store = PgStore::new(pool);

    let movie = store.get_movie(1).await.unwrap();
    assert_eq!(movie.title, "Heat");
    assert!(movie.genres.contains("crime"));
    assert!(movie.genres.contains("drama"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn get_movie_not_found_is_tagged(pool: PgPool) {
    let store = PgStore::new(pool);
    let err = store.get_movie(999).await.unwrap_err();
    assert!(matches!(err, DomainError::MovieNotFound(999)));
}

#[sqlx::test(migrations = "../../migrations")]
async fn put_rating_rewrites_profile_in_the_same_transaction(pool: PgPool) {
    seed_user(&pool, 1).await;
    seed_movie(&pool, 1, "Heat", "crime").await;
    seed_embedding(&pool, 1, vec![1.0, 0.0]).await;
    let store = PgStore::new(pool);

    assert!(store.get_profile(1).await.unwrap().is_none());

    store
        .put_rating(1, 1, Some(5), RatingStatus::Watched, &|contributors| {
            if contributors.is_empty() {
                None
            } else {
                Some((contributors[0].embedding.clone(), contributors.len() as i64))
            }
        })
        .await
        .unwrap();

    let profile = store.get_profile(1).await.unwrap().unwrap();
    assert_eq!(profile.num_ratings, 1);
    assert_eq!(profile.embedding, vec![1.0, 0.0]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn put_rating_deletes_profile_when_rebuild_returns_none(pool: PgPool) {
    seed_user(&pool, 1).await;
    seed_movie(&pool, 1, "Heat", "crime").await;
    seed_embedding(&pool, 1, vec![1.0, 0.0]).await;
    let store = PgStore::new(pool);

    store.put_rating(1, 1, Some(5), RatingStatus::Watched, &|c| Some((c[0].embedding.clone(), 1))).await.unwrap();
    assert!(store.get_profile(1).await.unwrap().is_some());

    store.put_rating(1, 1, None, RatingStatus::Unwatched, &|_| None).await.unwrap();
    assert!(store.get_profile(1).await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../migrations")]
async fn recent_ratings_are_ordered_most_recent_first(pool: PgPool) {
    seed_user(&pool, 1).await;
    seed_movie(&pool, 1, "A", "").await;
    seed_movie(&pool, 2, "B", "").await;
    let store = PgStore::new(pool);

    store.put_rating(1, 1, Some(5), RatingStatus::Watched, &|_| None).await.unwrap();
    store.put_rating(1, 2, Some(4), RatingStatus::Watched, &|_| None).await.unwrap();

    let ratings = store.recent_ratings(1, 10).await.unwrap();
    assert_eq!(ratings.len(), 2);
    assert_eq!(ratings[0].movie_id, 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn list_ratings_filters_by_status(pool: PgPool) {
    seed_user(&pool, 1).await;
    seed_movie(&pool, 1, "A", "").await;
    seed_movie(&pool, 2, "B", "").await;
    let store = PgStore::new(pool);

    store.put_rating(1, 1, Some(5), RatingStatus::Watched, &|_| None).await.unwrap();
    store.put_rating(1, 2, None, RatingStatus::Unwatched, &|_| None).await.unwrap();

    let filter = RatingFilter { status: Some(RatingStatus::Watched), ..Default::default() };
    let page = store.list_ratings(1, &filter, 10, 0).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].movie_id, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn popularity_queue_excludes_requested_ids(pool: PgPool) {
    seed_movie(&pool, 1, "A", "").await;
    seed_movie(&pool, 2, "B", "").await;
    let store = PgStore::new(pool);

    let exclude = std::collections::HashSet::from([1]);
    let page = store.popularity_queue(&exclude, 10, 0).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn get_movie_embedding_not_found_is_tagged(pool: PgPool) {
    seed_movie(&pool, 1, "A", "").await;
    let store = PgStore::new(pool);
    let err = store.get_movie_embedding(1).await.unwrap_err();
    assert!(matches!(err, DomainError::EmbeddingNotFound(1)));
}
