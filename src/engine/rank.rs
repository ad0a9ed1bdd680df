//! Rank Calculator: pure scoring functions over aggregate counters.

use crate::core::{Aggregate, Timestamp};

const SCORE_EXPONENT: f64 = 0.8;
const GRAVITY: f64 = 1.8;
const AGE_OFFSET_SECONDS: f64 = 2.0;

/// Time-decayed popularity: `sign(score) * |score|^0.8 / (age + 2)^1.8`.
///
/// The sign of `score` is preserved so heavily downvoted content ranks
/// below zero rather than tying with neutral content.
pub fn hot_rank(score: i64, age_seconds: f64) -> f64 {
    if score == 0 {
        return 0.0;
    }
    let age = if age_seconds.is_finite() { age_seconds.max(0.0) } else { 0.0 };
    let magnitude = (score.unsigned_abs() as f64).powf(SCORE_EXPONENT);
    (score.signum() as f64) * magnitude / (age + AGE_OFFSET_SECONDS).powf(GRAVITY)
}

/// Engagement weighted by how evenly it splits: `(up + down)^0.8 * min / max`.
pub fn controversy_rank(upvotes: i64, downvotes: i64) -> f64 {
    let upvotes = upvotes.max(0);
    let downvotes = downvotes.max(0);
    let total = upvotes + downvotes;
    if total == 0 {
        return 0.0;
    }
    let balance = upvotes.min(downvotes) as f64 / upvotes.max(downvotes) as f64;
    (total as f64).powf(SCORE_EXPONENT) * balance
}

/// Hot rank of `aggregate` as seen at `now`, for read-time freshness.
pub fn hot_rank_at(aggregate: &Aggregate, now: Timestamp) -> f64 {
    hot_rank(aggregate.score, now.seconds_since(aggregate.created_at))
}

/// Recompute both stored ranks as of `at`.
pub fn refresh_ranks(aggregate: &mut Aggregate, at: Timestamp) {
    aggregate.hot_rank = hot_rank_at(aggregate, at);
    aggregate.controversy_rank = controversy_rank(aggregate.upvotes, aggregate.downvotes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PostId, TargetRef};

    #[test]
    fn test_controversy_ordering() {
        let even = controversy_rank(10, 10);
        let lopsided = controversy_rank(10, 1);
        let one_sided = controversy_rank(10, 0);

        assert!(even > lopsided);
        assert!(lopsided > one_sided);
        assert_eq!(one_sided, 0.0);
        assert_eq!(controversy_rank(0, 0), 0.0);
        assert_eq!(controversy_rank(3, 7), controversy_rank(7, 3));
    }

    #[test]
    fn test_controversy_values() {
        let expected = 20f64.powf(0.8);
        assert!((controversy_rank(10, 10) - expected).abs() < 1e-12);
        let expected = 11f64.powf(0.8) * 0.1;
        assert!((controversy_rank(10, 1) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_hot_rank_preserves_sign() {
        for score in [-1000, -7, -1, 1, 3, 250] {
            for age in [0.0, 1.0, 3_600.0, 86_400.0 * 30.0] {
                let rank = hot_rank(score, age);
                assert_eq!(rank.signum(), (score as f64).signum(), "score {} age {}", score, age);
                assert!(rank != 0.0);
            }
        }
        assert_eq!(hot_rank(0, 10.0), 0.0);
    }

    #[test]
    fn test_hot_rank_decays() {
        assert!(hot_rank(10, 60.0) > hot_rank(10, 3_600.0));
        assert!(hot_rank(-10, 60.0) < hot_rank(-10, 3_600.0));
        // Fresh heavily downvoted content sits below older mildly downvoted content
        assert!(hot_rank(-50, 0.0) < hot_rank(-1, 86_400.0));
        let expected = 1.0 / 2f64.powf(1.8);
        assert!((hot_rank(1, 0.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_negative_age_is_clamped() {
        assert_eq!(hot_rank(5, -30.0), hot_rank(5, 0.0));
        assert_eq!(hot_rank(5, f64::NAN), hot_rank(5, 0.0));
    }

    #[test]
    fn test_refresh_ranks() {
        let mut aggregate = Aggregate::empty(TargetRef::post(PostId(1)), Timestamp(1_000));
        aggregate.upvotes = 4;
        aggregate.downvotes = 2;
        aggregate.score = 2;

        refresh_ranks(&mut aggregate, Timestamp(11_000));
        assert_eq!(aggregate.hot_rank, hot_rank(2, 10.0));
        assert_eq!(aggregate.controversy_rank, controversy_rank(4, 2));
        assert_eq!(hot_rank_at(&aggregate, Timestamp(11_000)), aggregate.hot_rank);
    }
}
