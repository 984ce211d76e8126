//! Recomputes a user's taste vector from their rating history (§4.3). The pure
//! aggregation algorithm lives here so it can be unit-tested without a
//! database; [`apply_rating`] is the thin glue that threads it into
//! [`store::Store::put_rating`], which is what actually runs it inside the
//! rating mutation transaction (Invariant 2).

use store::{Contributor, DomainError, MovieId, RatingStatus, Store, UserId};

pub const DEFAULT_NEUTRAL_RATING_WEIGHT: f32 = 0.2;

fn weight(rating: u8, neutral_rating_weight: f32) -> f32 {
    match rating {
        5 => 1.0,
        4 => 0.8,
        3 => neutral_rating_weight,
        _ => 0.0,
    }
}

fn l2_normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
}

/// Weighted centroid of `contributors`' embeddings, L2-normalized. `None` means
/// the caller should delete the profile row (no contributors remain).
pub fn rebuild(contributors: &[Contributor], neutral_rating_weight: f32) -> Option<(Vec<f32>, i64)> {
    let dim = contributors.first()?.embedding.len();
    let mut weighted_sum = vec![0f32; dim];
    let mut weight_total = 0f32;

    for contributor in contributors {
        let w = weight(contributor.rating, neutral_rating_weight);
        for (acc, e) in weighted_sum.iter_mut().zip(&contributor.embedding) {
            *acc += w * e;
        }
        weight_total += w;
    }

    if weight_total <= 0.0 {
        return None;
    }

    let mut vec: Vec<f32> = weighted_sum.iter().map(|s| s / weight_total).collect();
    l2_normalize(&mut vec);
    Some((vec, contributors.len() as i64))
}

/// Writes a rating and, inside the same atomic scope, rewrites `user_profiles`
/// via [`rebuild`].
pub async fn apply_rating(
    store: &(impl Store + ?Sized),
    user_id: UserId,
    movie_id: MovieId,
    rating: Option<u8>,
    status: RatingStatus,
    neutral_rating_weight: f32,
) -> Result<(), DomainError> {
    store
        .put_rating(user_id, movie_id, rating, status, &|contributors| {
            rebuild(contributors, neutral_rating_weight)
        })
        .await
}
