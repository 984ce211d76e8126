//! Derives per-user like/dislike feature sets from recent ratings (§4.5). Feeds
//! the Reranker; never touches the Vector Index.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Datelike;
use rayon::prelude::*;
use tracing::instrument;

use store::{DomainError, Movie, MovieId, Rating, RatingStatus, Store, UserId};

/// Deploy-time allowlist of "style" keywords (§9: "compile-time-initialized set,
/// not loaded from DB, to keep scoring inputs hermetic and reviewable").
/// Non-allowlisted keywords are ignored during scoring; genres have no allowlist.
pub const STYLE_KEYWORD_ALLOWLIST: &[&str] = &[
    "neo-noir",
    "whodunit",
    "nonlinear timeline",
    "psychological thriller",
    "mind-bending",
    "unreliable narrator",
    "twist ending",
    "time loop",
    "found footage",
    "slow burn",
    "ensemble cast",
    "based on true story",
    "coming of age",
    "dark comedy",
    "heist",
    "revenge",
    "survival",
    "courtroom drama",
];

#[derive(Debug, Clone, Copy)]
pub struct ScoringContextConfig {
    pub scoring_context_limit: usize,
    pub max_scoring_genres: usize,
    pub max_scoring_keywords: usize,
}

impl Default for ScoringContextConfig {
    fn default() -> Self {
        Self { scoring_context_limit: 50, max_scoring_genres: 5, max_scoring_keywords: 5 }
    }
}

/// One side (like or dislike) of a [`ScoringContext`] — an equivalent feature
/// bundle to what an anchor movie contributes in anchor mode (§4.6).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureContext {
    pub genres: BTreeSet<String>,
    pub style_keywords: BTreeSet<String>,
    pub mean_runtime: Option<f64>,
    pub mean_release_year: Option<f64>,
    pub mode_language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoringContext {
    pub like_context: FeatureContext,
    pub dislike_context: FeatureContext,
    pub dislike_embedding_centroid: Option<Vec<f32>>,
    pub dislike_count: usize,
}

fn top_n_by_frequency(counts: BTreeMap<String, usize>, n: usize) -> BTreeSet<String> {
    let mut entries: Vec<(String, usize)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    entries.into_iter().take(n).map(|(token, _)| token).collect()
}

fn mode_of<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for v in values {
        *counts.entry(v).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))
        .map(|(token, _)| token.to_string())
}

/// One movie's contribution to a [`FeatureContext`], extracted independently
/// of every other movie so the extraction can run in parallel (§4.5
/// per-candidate context aggregation).
struct MovieContribution {
    genres: Vec<String>,
    style_keywords: Vec<String>,
    runtime: Option<f64>,
    year: Option<f64>,
    language: Option<String>,
}

fn extract_contribution(movie: &Movie) -> MovieContribution {
    MovieContribution {
        genres: movie.genres.iter().cloned().collect(),
        style_keywords: movie
            .keywords
            .iter()
            .filter(|k| STYLE_KEYWORD_ALLOWLIST.contains(&k.as_str()))
            .cloned()
            .collect(),
        runtime: movie.runtime.map(|r| r as f64),
        year: movie.release_date.map(|d| d.year() as f64),
        language: movie.original_language.clone(),
    }
}

fn build_feature_context(movies: &[Movie], config: &ScoringContextConfig) -> FeatureContext {
    let contributions: Vec<MovieContribution> = movies.par_iter().map(extract_contribution).collect();

    let mut genre_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut keyword_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut runtimes = Vec::new();
    let mut years = Vec::new();
    let mut languages = Vec::new();

    for contribution in &contributions {
        for genre in &contribution.genres {
            *genre_counts.entry(genre.clone()).or_insert(0) += 1;
        }
        for keyword in &contribution.style_keywords {
            *keyword_counts.entry(keyword.clone()).or_insert(0) += 1;
        }
        if let Some(runtime) = contribution.runtime {
            runtimes.push(runtime);
        }
        if let Some(year) = contribution.year {
            years.push(year);
        }
        if let Some(lang) = &contribution.language {
            languages.push(lang.as_str());
        }
    }

    let mean = |values: &[f64]| -> Option<f64> {
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    };

    FeatureContext {
        genres: top_n_by_frequency(genre_counts, config.max_scoring_genres),
        style_keywords: top_n_by_frequency(keyword_counts, config.max_scoring_keywords),
        mean_runtime: mean(&runtimes),
        mean_release_year: mean(&years),
        mode_language: mode_of(languages.into_iter()),
    }
}

fn unit_normalize_centroid(embeddings: &[Vec<f32>]) -> Option<Vec<f32>> {
    let dim = embeddings.first()?.len();
    let mut sum = vec![0f32; dim];
    for e in embeddings {
        for (acc, v) in sum.iter_mut().zip(e) {
            *acc += v;
        }
    }
    let count = embeddings.len() as f32;
    for v in sum.iter_mut() {
        *v /= count;
    }
    let norm = sum.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in sum.iter_mut() {
            *v /= norm;
        }
    }
    Some(sum)
}

/// Loads the most recent `scoring_context_limit` ratings for `user_id`, splits
/// the `watched` ones into likes (`rating >= 4`) and dislikes (`rating <= 2`),
/// and hydrates each side into a [`FeatureContext`] plus a dislike embedding
/// centroid. `unwatched` rows contribute to neither side (§4.7: "unwatched
/// contributes to neither, only to exclusion set"), matching the
/// `status = watched` condition `load_contributors` applies for profile
/// rebuild.
#[instrument(skip(store, config))]
pub async fn build_context(
    store: &(impl Store + ?Sized),
    user_id: UserId,
    config: &ScoringContextConfig,
) -> Result<ScoringContext, DomainError> {
    let ratings: Vec<Rating> = store.recent_ratings(user_id, config.scoring_context_limit).await?;
    let watched = ratings.iter().filter(|r| r.status == RatingStatus::Watched);

    let like_ids: Vec<MovieId> =
        watched.clone().filter(|r| r.rating.is_some_and(|v| v >= 4)).map(|r| r.movie_id).collect();
    let dislike_ids: Vec<MovieId> =
        watched.filter(|r| r.rating.is_some_and(|v| v <= 2)).map(|r| r.movie_id).collect();

    let mut like_movies = Vec::with_capacity(like_ids.len());
    for id in &like_ids {
        like_movies.push(store.get_movie(*id).await?);
    }
    let mut dislike_movies = Vec::with_capacity(dislike_ids.len());
    let mut dislike_embeddings = Vec::new();
    for id in &dislike_ids {
        dislike_movies.push(store.get_movie(*id).await?);
        if let Ok(embedding) = store.get_movie_embedding(*id).await {
            dislike_embeddings.push(embedding.embedding);
        }
    }

    Ok(ScoringContext {
        like_context: build_feature_context(&like_movies, config),
        dislike_context: build_feature_context(&dislike_movies, config),
        dislike_embedding_centroid: unit_normalize_centroid(&dislike_embeddings),
        dislike_count: dislike_ids.len(),
    })
}
