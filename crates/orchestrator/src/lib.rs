//! Coordinates the other crates into the five read operations of §4.7,
//! generalized from the reference workspace's `RecommendationOrchestrator`
//! (parallel candidate generation → filter/merge → score → rank, here:
//! sourcer → scoring context → reranker → rank).

pub mod config;

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, instrument, warn};

use candidate_sourcer::{source, Candidate, Query};
use reranker::{
    feature_context_from_movie, rerank, score_single, to_match_score, DislikeSignal, ScoredCandidate,
};
use scoring_context::build_context;
use store::{DomainError, Movie, MovieId, Store, UserId};
use vector_index::VectorIndex;

pub use config::{Config, ConfigError};

/// Pages of movies considered per round in [`Orchestrator::next`] before giving
/// up and reporting the queue exhausted.
const NEXT_PAGE_SIZE: usize = 20;

/// One item of a `Feed` response — scored when the user has a profile, or a
/// bare popularity-queue entry with `score=null` on fallback (§4.7 Feed).
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    Scored(ScoredCandidate),
    Unscored(Movie),
}

/// One item of a `Similar` response. `score` is `None` when
/// `SIM_RERANK_ENABLED=false` — the list is then ordered by ascending
/// `distance` alone, with no feature-weighted score computed.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarItem {
    pub movie: Movie,
    pub distance: f32,
    pub score: Option<f64>,
}

fn is_retryable(err: &DomainError) -> bool {
    matches!(err, DomainError::IndexUnavailable(_) | DomainError::Internal(_))
}

/// Retries a read operation once on a transient Store/Index error (§5:
/// "read paths retry once on transient Store/Index errors"). Only the
/// exhausted second attempt logs at `error!`; everything else on this path is
/// an expected outcome and logs at `warn!`/`debug!` (§9: only `Internal` and
/// exhausted transient failures are error-severity).
async fn retry_once<T, F, Fut>(f: F) -> Result<T, DomainError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, DomainError>>,
{
    match f().await {
        Err(e) if is_retryable(&e) => {
            warn!(error = %e, "retrying transient error once");
            let result = f().await;
            if let Err(ref e) = result {
                if e.is_internal() {
                    error!(error = %e, "retry exhausted");
                }
            }
            result
        }
        other => other,
    }
}

/// Enforces the caller-supplied deadline (§5: "each request carries a
/// deadline propagated to Store/Index calls"). `None` means no enforcement.
async fn with_deadline<T>(
    deadline: Option<Duration>,
    fut: impl Future<Output = Result<T, DomainError>>,
) -> Result<T, DomainError> {
    match deadline {
        Some(d) => tokio::time::timeout(d, fut).await.unwrap_or(Err(DomainError::DeadlineExceeded)),
        None => fut.await,
    }
}

fn dislike_signal(ctx: &scoring_context::ScoringContext) -> Option<DislikeSignal<'_>> {
    ctx.dislike_embedding_centroid.as_deref().map(|centroid| DislikeSignal {
        context: &ctx.dislike_context,
        embedding_centroid: Some(centroid),
        count: ctx.dislike_count,
    })
}

/// Composes [`Store`], [`VectorIndex`], and the pure crates above into the
/// five read operations of §4.7. Holds no mutable state (§9: "no global
/// mutable state").
pub struct Orchestrator {
    store: Arc<dyn Store>,
    index: Arc<dyn VectorIndex>,
    config: Config,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn Store>, index: Arc<dyn VectorIndex>, config: Config) -> Self {
        Self { store, index, config }
    }

    /// **Similar(movie_id, k)** — anchor-mode sourcing → reranker with anchor
    /// features (or, when `SIM_RERANK_ENABLED=false`, raw index order).
    #[instrument(skip(self))]
    pub async fn similar(
        &self,
        movie_id: MovieId,
        k: usize,
        deadline: Option<Duration>,
    ) -> Result<Vec<SimilarItem>, DomainError> {
        with_deadline(deadline.or(Some(self.config.request_timeout)), async {
            retry_once(|| self.similar_once(movie_id, k)).await
        })
        .await
    }

    async fn similar_once(&self, movie_id: MovieId, k: usize) -> Result<Vec<SimilarItem>, DomainError> {
        let anchor = self.store.get_movie(movie_id).await?;
        let k_fetch = self.config.sim_candidates_k.max(k);
        let candidates =
            source(&*self.store, &*self.index, Query::Anchor { movie_id }, k_fetch, &self.config.sourcer).await?;

        if self.config.sim_rerank_enabled {
            let context = feature_context_from_movie(&anchor);
            let scored = rerank(candidates, &context, None, self.config.sim_top_n.min(k), &self.config.reranker);
            Ok(scored
                .into_iter()
                .map(|s| SimilarItem { movie: s.candidate.movie, distance: s.candidate.distance, score: Some(s.score) })
                .collect())
        } else {
            let mut candidates: Vec<Candidate> = candidates;
            candidates.sort_by(|a, b| {
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.movie.vote_count.cmp(&a.movie.vote_count))
                    .then(a.movie.id.cmp(&b.movie.id))
            });
            candidates.truncate(self.config.sim_top_n.min(k));
            Ok(candidates.into_iter().map(|c| SimilarItem { movie: c.movie, distance: c.distance, score: None }).collect())
        }
    }

    /// **Recommendations(user_id, k)** — user-mode sourcing → reranker with
    /// like/dislike contexts. Fails `ProfileNotFound` without a profile.
    #[instrument(skip(self))]
    pub async fn recommendations(
        &self,
        user_id: UserId,
        k: usize,
        deadline: Option<Duration>,
    ) -> Result<Vec<ScoredCandidate>, DomainError> {
        with_deadline(deadline.or(Some(self.config.request_timeout)), async {
            retry_once(|| self.recommendations_once(user_id, k)).await
        })
        .await
    }

    async fn recommendations_once(&self, user_id: UserId, k: usize) -> Result<Vec<ScoredCandidate>, DomainError> {
        let candidates: Vec<Candidate> =
            source(&*self.store, &*self.index, Query::User { user_id }, k, &self.config.sourcer).await?;
        let context = build_context(&*self.store, user_id, &self.config.scoring_context).await?;
        let dislike = dislike_signal(&context);
        Ok(rerank(candidates, &context.like_context, dislike, k, &self.config.reranker))
    }

    /// **Feed(user_id, k)** — identical to `Recommendations` when a profile
    /// exists; falls back to the popularity queue (`score=null`) otherwise.
    #[instrument(skip(self))]
    pub async fn feed(
        &self,
        user_id: UserId,
        k: usize,
        deadline: Option<Duration>,
    ) -> Result<Vec<FeedItem>, DomainError> {
        with_deadline(deadline.or(Some(self.config.request_timeout)), async {
            match retry_once(|| self.recommendations_once(user_id, k)).await {
                Ok(scored) => Ok(scored.into_iter().map(FeedItem::Scored).collect()),
                Err(DomainError::ProfileNotFound(_)) => {
                    debug!(user_id, "no profile, falling back to popularity queue");
                    let seen = retry_once(|| self.store.get_seen_movie_ids(user_id)).await?;
                    let page = retry_once(|| self.store.popularity_queue(&seen, k, 0)).await?;
                    Ok(page.items.into_iter().map(FeedItem::Unscored).collect())
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// **Match(user_id, movie_id)** — the reranker's per-candidate score
    /// against the user's contexts, without relying on index rank. `None` for
    /// either soft case (no profile, no embedding), never an error.
    #[instrument(skip(self))]
    pub async fn match_score(
        &self,
        user_id: UserId,
        movie_id: MovieId,
        deadline: Option<Duration>,
    ) -> Result<Option<u8>, DomainError> {
        with_deadline(deadline.or(Some(self.config.request_timeout)), async {
            retry_once(|| self.match_score_once(user_id, movie_id)).await
        })
        .await
    }

    async fn match_score_once(&self, user_id: UserId, movie_id: MovieId) -> Result<Option<u8>, DomainError> {
        let profile = match self.store.get_profile(user_id).await? {
            Some(p) => p,
            None => return Ok(None),
        };
        let movie = self.store.get_movie(movie_id).await?;
        let embedding = match self.store.get_movie_embedding(movie_id).await {
            Ok(e) => e,
            Err(DomainError::EmbeddingNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let distance = store::cosine_distance(&profile.embedding, &embedding.embedding);
        let context = build_context(&*self.store, user_id, &self.config.scoring_context).await?;
        let dislike = dislike_signal(&context);

        let score =
            score_single(&movie, &embedding.embedding, distance, &context.like_context, dislike, &self.config.reranker);
        Ok(Some(to_match_score(score)))
    }

    /// **Next(user_id)** — pops one item from the popularity queue excluding
    /// seen ids; skips embedding-less movies once the user has a profile.
    #[instrument(skip(self))]
    pub async fn next(&self, user_id: UserId, deadline: Option<Duration>) -> Result<Option<Movie>, DomainError> {
        with_deadline(deadline.or(Some(self.config.request_timeout)), async {
            retry_once(|| self.next_once(user_id)).await
        })
        .await
    }

    async fn next_once(&self, user_id: UserId) -> Result<Option<Movie>, DomainError> {
        let has_profile = self.store.get_profile(user_id).await?.is_some();
        let seen: HashSet<MovieId> = self.store.get_seen_movie_ids(user_id).await?;

        let mut cursor = 0usize;
        loop {
            let page = self.store.popularity_queue(&seen, NEXT_PAGE_SIZE, cursor).await?;
            let has_more = page.has_more;
            for movie in page.items {
                if !has_profile {
                    return Ok(Some(movie));
                }
                match self.store.get_movie_embedding(movie.id).await {
                    Ok(_) => return Ok(Some(movie)),
                    Err(DomainError::EmbeddingNotFound(_)) => continue,
                    Err(e) => return Err(e),
                }
            }
            if !has_more {
                return Ok(None);
            }
            cursor += NEXT_PAGE_SIZE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candidate_sourcer::SourcerConfig;
    use reranker::RerankerConfig;
    use scoring_context::ScoringContextConfig;
    use std::collections::BTreeSet;
    use store::memory::MemoryStore;
    use store::{MovieEmbedding, RatingStatus};
    use vector_index::memory::MemoryVectorIndex;

    fn test_config() -> Config {
        Config {
            database_url: "unused".into(),
            embedding_dimension: 2,
            neutral_rating_weight: 0.2,
            scoring_context: ScoringContextConfig::default(),
            sourcer: SourcerConfig::default(),
            reranker: RerankerConfig::default(),
            sim_candidates_k: 50,
            sim_top_n: 20,
            sim_rerank_enabled: true,
            request_timeout: Duration::from_secs(5),
        }
    }

    fn movie(id: MovieId, genres: &[&str]) -> Movie {
        Movie {
            id,
            title: format!("movie-{id}"),
            release_date: None,
            runtime: Some(100),
            original_language: Some("en".into()),
            vote_average: 7.0,
            vote_count: 10,
            genres: genres.iter().map(|g| g.to_string()).collect::<BTreeSet<_>>(),
            keywords: BTreeSet::new(),
            overview: None,
            poster_path: None,
        }
    }

    fn seed(store: &MemoryStore, index: &MemoryVectorIndex, id: MovieId, genres: &[&str], embedding: Vec<f32>) {
        store.insert_movie(movie(id, genres));
        store.insert_embedding(MovieEmbedding {
            movie_id: id,
            embedding: embedding.clone(),
            embedding_model: "t".into(),
            doc_hash: "h".into(),
        });
        index.insert(id, embedding);
    }

    fn orchestrator(store: MemoryStore, index: MemoryVectorIndex) -> Orchestrator {
        Orchestrator::new(Arc::new(store), Arc::new(index), test_config())
    }

    #[tokio::test]
    async fn similar_excludes_the_anchor_and_reranks() {
        let store = MemoryStore::new();
        let index = MemoryVectorIndex::new();
        seed(&store, &index, 1, &["drama"], vec![1.0, 0.0]);
        seed(&store, &index, 2, &["drama"], vec![0.9, 0.1]);
        let orch = orchestrator(store, index);

        let items = orch.similar(1, 10, None).await.unwrap();
        assert!(items.iter().all(|i| i.movie.id != 1));
        assert_eq!(items[0].movie.id, 2);
        assert!(items[0].score.is_some());
    }

    #[tokio::test]
    async fn similar_fails_embedding_not_found_without_an_anchor_embedding() {
        let store = MemoryStore::new();
        let index = MemoryVectorIndex::new();
        store.insert_movie(movie(1, &["drama"]));
        let orch = orchestrator(store, index);

        let err = orch.similar(1, 10, None).await.unwrap_err();
        assert!(matches!(err, DomainError::EmbeddingNotFound(1)));
    }

    #[tokio::test]
    async fn recommendations_fails_profile_not_found_without_ratings() {
        let store = MemoryStore::new();
        let index = MemoryVectorIndex::new();
        let orch = orchestrator(store, index);

        let err = orch.recommendations(42, 10, None).await.unwrap_err();
        assert!(matches!(err, DomainError::ProfileNotFound(42)));
    }

    #[tokio::test]
    async fn feed_falls_back_to_popularity_when_user_has_no_profile() {
        let store = MemoryStore::new();
        let index = MemoryVectorIndex::new();
        seed(&store, &index, 1, &["drama"], vec![1.0, 0.0]);
        seed(&store, &index, 2, &["comedy"], vec![0.0, 1.0]);
        let orch = orchestrator(store, index);

        let items = orch.feed(7, 10, None).await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| matches!(i, FeedItem::Unscored(_))));
    }

    #[tokio::test]
    async fn feed_returns_scored_items_when_user_has_a_profile() {
        let store = MemoryStore::new();
        let index = MemoryVectorIndex::new();
        seed(&store, &index, 1, &["drama"], vec![1.0, 0.0]);
        seed(&store, &index, 2, &["drama"], vec![0.9, 0.1]);
        store.put_rating(7, 1, Some(5), RatingStatus::Watched, &|c| Some((c[0].embedding.clone(), 1))).await.unwrap();

        let orch = orchestrator(store, index);
        let items = orch.feed(7, 10, None).await.unwrap();
        assert!(items.iter().all(|i| matches!(i, FeedItem::Scored(_))));
    }

    #[tokio::test]
    async fn match_score_is_none_without_a_profile() {
        let store = MemoryStore::new();
        let index = MemoryVectorIndex::new();
        seed(&store, &index, 1, &["drama"], vec![1.0, 0.0]);
        let orch = orchestrator(store, index);

        assert_eq!(orch.match_score(7, 1, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn match_score_is_none_without_a_movie_embedding() {
        let store = MemoryStore::new();
        let index = MemoryVectorIndex::new();
        seed(&store, &index, 1, &["drama"], vec![1.0, 0.0]);
        store.insert_movie(movie(2, &["drama"]));
        store.put_rating(7, 1, Some(5), RatingStatus::Watched, &|c| Some((c[0].embedding.clone(), 1))).await.unwrap();

        let orch = orchestrator(store, index);
        assert_eq!(orch.match_score(7, 2, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn match_score_is_some_within_0_100_with_a_profile_and_embedding() {
        let store = MemoryStore::new();
        let index = MemoryVectorIndex::new();
        seed(&store, &index, 1, &["drama"], vec![1.0, 0.0]);
        seed(&store, &index, 2, &["drama"], vec![0.9, 0.1]);
        store.put_rating(7, 1, Some(5), RatingStatus::Watched, &|c| Some((c[0].embedding.clone(), 1))).await.unwrap();

        let orch = orchestrator(store, index);
        let score = orch.match_score(7, 2, None).await.unwrap().unwrap();
        assert!(score <= 100);
    }

    #[tokio::test]
    async fn next_skips_seen_movies_and_returns_the_rest() {
        let store = MemoryStore::new();
        let index = MemoryVectorIndex::new();
        seed(&store, &index, 1, &["drama"], vec![1.0, 0.0]);
        seed(&store, &index, 2, &["comedy"], vec![0.0, 1.0]);
        store.put_rating(7, 1, Some(5), RatingStatus::Watched, &|c| Some((c[0].embedding.clone(), 1))).await.unwrap();

        let orch = orchestrator(store, index);
        let next = orch.next(7, None).await.unwrap().unwrap();
        assert_eq!(next.id, 2);
    }

    #[tokio::test]
    async fn next_skips_embedding_less_movies_once_a_profile_exists() {
        let store = MemoryStore::new();
        let index = MemoryVectorIndex::new();
        seed(&store, &index, 1, &["drama"], vec![1.0, 0.0]);
        store.insert_movie(movie(2, &["comedy"])); // no embedding
        store.put_rating(7, 1, Some(5), RatingStatus::Watched, &|c| Some((c[0].embedding.clone(), 1))).await.unwrap();

        let orch = orchestrator(store, index);
        assert_eq!(orch.next(7, None).await.unwrap(), None);
    }
}
