use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};

pub type UserId = i64;
pub type MovieId = i64;

/// Immutable in the hot path; owned by the out-of-scope ingestion pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Movie {
    pub id: MovieId,
    pub title: String,
    pub release_date: Option<NaiveDate>,
    pub runtime: Option<i32>,
    pub original_language: Option<String>,
    pub vote_average: f64,
    pub vote_count: i64,
    pub genres: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
}

/// At most one per movie. Absence means "not indexable" (Invariant 3).
#[derive(Debug, Clone, PartialEq)]
pub struct MovieEmbedding {
    pub movie_id: MovieId,
    pub embedding: Vec<f32>,
    pub embedding_model: String,
    pub doc_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingStatus {
    Watched,
    Unwatched,
}

impl RatingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RatingStatus::Watched => "watched",
            RatingStatus::Unwatched => "unwatched",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, crate::error::DomainError> {
        match s {
            "watched" => Ok(RatingStatus::Watched),
            "unwatched" => Ok(RatingStatus::Unwatched),
            other => Err(crate::error::DomainError::InvalidArgument(format!(
                "unknown rating status '{other}'"
            ))),
        }
    }
}

/// Keyed by `(user_id, movie_id)`. `rating` is `None` for marked-watched-but-unrated.
#[derive(Debug, Clone, PartialEq)]
pub struct Rating {
    pub user_id: UserId,
    pub movie_id: MovieId,
    pub rating: Option<u8>,
    pub status: RatingStatus,
    pub updated_at: DateTime<Utc>,
}

/// Unit-weighted centroid of a user's contributing ratings. Deleted when the last
/// contributor is removed.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub user_id: UserId,
    pub embedding: Vec<f32>,
    pub num_ratings: i64,
    pub updated_at: DateTime<Utc>,
}

/// A contributing rating joined with its movie's embedding, as consumed by profile
/// rebuild (`status = watched AND rating >= 3`, embedding present).
#[derive(Debug, Clone)]
pub struct Contributor {
    pub movie_id: MovieId,
    pub rating: u8,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct RatingFilter {
    pub status: Option<RatingStatus>,
    pub rating_min: Option<u8>,
    pub rating_max: Option<u8>,
    pub since: Option<DateTime<Utc>>,
}

/// A page of rows plus whether more remain beyond it (`ListRatings`/`PopularityQueue`
/// both fetch `k+1` and trim — see spec §4.1/§6).
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Applies the universal "fetch k+1, trim the k+1'th, report has_more" rule.
    pub fn trim(mut rows: Vec<T>, k: usize) -> Self {
        let has_more = rows.len() > k;
        rows.truncate(k);
        Page { items: rows, has_more }
    }
}

/// `genres`/`keywords` are comma-separated tokens; both are case-insensitive sets
/// after parsing (spec §3).
pub fn parse_token_set(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|tok| tok.trim().to_lowercase())
        .filter(|tok| !tok.is_empty())
        .collect()
}

pub fn join_token_set(tokens: &BTreeSet<String>) -> String {
    tokens.iter().cloned().collect::<Vec<_>>().join(",")
}

/// `1 - cosine_similarity`; shared by the in-memory vector index and the
/// reranker's dislike-centroid scoring path.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - (dot / (norm_a * norm_b))
}
