//! Deterministic, feature-weighted scorer with a dislike-aware penalty (§4.6).
//! CPU-only and non-suspending — no I/O happens in this crate.

use std::collections::BTreeSet;

use chrono::Datelike;
use rayon::prelude::*;

use candidate_sourcer::Candidate;
use scoring_context::{FeatureContext, STYLE_KEYWORD_ALLOWLIST};
use store::cosine_distance;

const SIMILARITY_WEIGHT: f64 = 1.00;
const GENRE_OVERLAP_WEIGHT: f64 = 0.25;
const STYLE_OVERLAP_WEIGHT: f64 = 0.15;
const RUNTIME_PROXIMITY_WEIGHT: f64 = 0.05;
const YEAR_PROXIMITY_WEIGHT: f64 = 0.05;
const LANGUAGE_MATCH_WEIGHT: f64 = 0.05;
const POPULARITY_WEIGHT: f64 = 0.05;
const TONAL_MISMATCH_PENALTY: f64 = 0.10;
const VOTE_COUNT_CAP: f64 = 100_000.0;

const HORROR_THRILLER: [&str; 2] = ["horror", "thriller"];
const FAMILY_ANIMATION: [&str; 2] = ["family", "animation"];

/// Sum of every positive feature weight (the mismatch penalty is subtracted, not
/// summed). Used to project a single candidate's raw score into `[0,1]` for
/// [`score_single`], where there is no batch to min-max normalize against.
pub const MAX_RAW_SCORE: f64 = SIMILARITY_WEIGHT
    + GENRE_OVERLAP_WEIGHT
    + STYLE_OVERLAP_WEIGHT
    + RUNTIME_PROXIMITY_WEIGHT
    + YEAR_PROXIMITY_WEIGHT
    + LANGUAGE_MATCH_WEIGHT
    + POPULARITY_WEIGHT;

#[derive(Debug, Clone, Copy)]
pub struct RerankerConfig {
    pub dislike_weight: f64,
    pub dislike_min_count: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self { dislike_weight: 0.35, dislike_min_count: 3 }
    }
}

/// The dislike side of a user-mode rerank, mirroring `scoring_context::ScoringContext`'s
/// dislike fields. Absent in anchor mode (there is no user to have disliked anything).
pub struct DislikeSignal<'a> {
    pub context: &'a FeatureContext,
    pub embedding_centroid: Option<&'a [f32]>,
    pub count: usize,
}

/// A candidate plus its final, batch-normalized score (§9: explicit typed
/// record replacing a dynamic/duck-typed collection).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub score: f64,
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn contains_any(genres: &BTreeSet<String>, members: &[&str]) -> bool {
    members.iter().any(|m| genres.contains(*m))
}

fn tonal_mismatch(candidate_genres: &BTreeSet<String>, context_genres: &BTreeSet<String>) -> bool {
    (contains_any(candidate_genres, &HORROR_THRILLER) && contains_any(context_genres, &FAMILY_ANIMATION))
        || (contains_any(candidate_genres, &FAMILY_ANIMATION) && contains_any(context_genres, &HORROR_THRILLER))
}

/// Builds the equivalent feature bundle an anchor movie contributes in anchor
/// mode (§4.6: "Inputs from the anchor ... equivalent feature bundle").
pub fn feature_context_from_movie(movie: &store::Movie) -> FeatureContext {
    let style_keywords: BTreeSet<String> = movie
        .keywords
        .iter()
        .filter(|k| STYLE_KEYWORD_ALLOWLIST.contains(&k.as_str()))
        .cloned()
        .collect();
    FeatureContext {
        genres: movie.genres.clone(),
        style_keywords,
        mean_runtime: movie.runtime.map(|r| r as f64),
        mean_release_year: movie.release_date.map(|d| d.year() as f64),
        mode_language: movie.original_language.clone(),
    }
}

/// The weighted feature sum for one candidate against one context, before
/// batch normalization. `distance` is the cosine distance to whatever vector
/// the context represents (the query vector for `like`, the dislike centroid
/// for `dislike`).
fn raw_feature_score(movie: &store::Movie, distance: f32, context: &FeatureContext) -> f64 {
    let similarity = (1.0 - distance as f64).clamp(0.0, 1.0);
    let mut raw = SIMILARITY_WEIGHT * similarity;

    raw += GENRE_OVERLAP_WEIGHT * jaccard(&movie.genres, &context.genres);

    let movie_style: BTreeSet<String> = movie
        .keywords
        .iter()
        .filter(|k| STYLE_KEYWORD_ALLOWLIST.contains(&k.as_str()))
        .cloned()
        .collect();
    raw += STYLE_OVERLAP_WEIGHT * jaccard(&movie_style, &context.style_keywords);

    if let (Some(runtime), Some(ctx_runtime)) = (movie.runtime, context.mean_runtime) {
        let delta = (runtime as f64 - ctx_runtime).abs();
        raw += RUNTIME_PROXIMITY_WEIGHT * (1.0 - (delta / 60.0).min(1.0));
    }

    if let (Some(date), Some(ctx_year)) = (movie.release_date, context.mean_release_year) {
        let delta = (date.year() as f64 - ctx_year).abs();
        raw += YEAR_PROXIMITY_WEIGHT * (1.0 - (delta / 30.0).min(1.0));
    }

    if let (Some(lang), Some(ctx_lang)) = (&movie.original_language, &context.mode_language) {
        if lang == ctx_lang {
            raw += LANGUAGE_MATCH_WEIGHT;
        }
    }

    let popularity =
        ((1.0 + movie.vote_count as f64).log10() / (1.0 + VOTE_COUNT_CAP).log10()).clamp(0.0, 1.0);
    raw += POPULARITY_WEIGHT * popularity;

    if tonal_mismatch(&movie.genres, &context.genres) {
        raw -= TONAL_MISMATCH_PENALTY;
    }

    raw
}

/// Min-max normalizes within the batch so the reported score lands in `[0,1]`.
/// A batch with a single candidate, or one where every raw score ties, reports
/// `1.0` for all of them rather than dividing by zero.
fn min_max_normalize(raw: &[f64]) -> Vec<f64> {
    if raw.is_empty() {
        return Vec::new();
    }
    let min = raw.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = raw.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < f64::EPSILON {
        return vec![1.0; raw.len()];
    }
    raw.iter().map(|r| (r - min) / (max - min)).collect()
}

/// Scores and orders `candidates` against `like_context` (and, in user mode,
/// `dislike`), then truncates to `k_final`. Deterministic: identical inputs
/// produce identical ordering and scores (§8 property 5).
pub fn rerank(
    candidates: Vec<Candidate>,
    like_context: &FeatureContext,
    dislike: Option<DislikeSignal<'_>>,
    k_final: usize,
    config: &RerankerConfig,
) -> Vec<ScoredCandidate> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let like_raw: Vec<f64> =
        candidates.par_iter().map(|c| raw_feature_score(&c.movie, c.distance, like_context)).collect();
    let like_scores = min_max_normalize(&like_raw);

    let finals: Vec<f64> = match dislike {
        Some(signal) if signal.count >= config.dislike_min_count => match signal.embedding_centroid {
            Some(centroid) => {
                let dislike_raw: Vec<f64> = candidates
                    .par_iter()
                    .map(|c| {
                        let distance = cosine_distance(&c.embedding, centroid);
                        raw_feature_score(&c.movie, distance, signal.context)
                    })
                    .collect();
                let dislike_scores = min_max_normalize(&dislike_raw);
                like_scores
                    .iter()
                    .zip(dislike_scores)
                    .map(|(like, dislike)| (like - config.dislike_weight * dislike).clamp(0.0, 1.0))
                    .collect()
            }
            None => like_scores,
        },
        _ => like_scores,
    };

    let mut scored: Vec<ScoredCandidate> =
        candidates.into_iter().zip(finals).map(|(candidate, score)| ScoredCandidate { candidate, score }).collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.candidate.distance.partial_cmp(&b.candidate.distance).unwrap_or(std::cmp::Ordering::Equal))
            .then(b.candidate.movie.vote_count.cmp(&a.candidate.movie.vote_count))
            .then(a.candidate.movie.id.cmp(&b.candidate.movie.id))
    });
    scored.truncate(k_final);
    scored
}

/// Projects a `[0,1]` score onto the public `match` endpoint's `0..100` scale.
pub fn to_match_score(score: f64) -> u8 {
    (score.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Scores one movie against a user's contexts directly, without a candidate
/// batch to min-max normalize against (§4.7 Match: "reuses the reranker's
/// per-candidate score ... without relying on index rank"). The raw score is
/// scaled by [`MAX_RAW_SCORE`] instead of batch-normalized.
pub fn score_single(
    movie: &store::Movie,
    embedding: &[f32],
    distance: f32,
    like_context: &FeatureContext,
    dislike: Option<DislikeSignal<'_>>,
    config: &RerankerConfig,
) -> f64 {
    let like_raw = raw_feature_score(movie, distance, like_context);
    let like_score = (like_raw / MAX_RAW_SCORE).clamp(0.0, 1.0);

    match dislike {
        Some(signal) if signal.count >= config.dislike_min_count => match signal.embedding_centroid {
            Some(centroid) => {
                let dislike_distance = cosine_distance(embedding, centroid);
                let dislike_raw = raw_feature_score(movie, dislike_distance, signal.context);
                let dislike_score = (dislike_raw / MAX_RAW_SCORE).clamp(0.0, 1.0);
                (like_score - config.dislike_weight * dislike_score).clamp(0.0, 1.0)
            }
            None => like_score,
        },
        _ => like_score,
    }
}
