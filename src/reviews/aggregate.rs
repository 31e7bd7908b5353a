//! Reputation aggregation
//!
//! Turns the reviews of one subject into the aggregate the viewer is allowed
//! to see. Pure: fetching reviews, resolving the viewer's entitlement, and
//! consuming quota all happen in the route handler before this runs.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::db::schemas::ReviewDoc;

/// What the aggregator needs to know about the caller
#[derive(Debug, Clone, Default)]
pub struct ViewerContext {
    /// Authenticated user id, if any; owners see their own non-public reviews
    pub user_id: Option<String>,
    /// Premium capability: full results include flags and narratives
    pub can_view_full_result: bool,
}

/// Aggregate reputation for one subject, shaped for the wire.
///
/// `aggregate_mean` serializes as `null` when no eligible review carries a
/// rating — "no data" must stay distinguishable from a genuine low score.
/// The flag and narrative fields are omitted from the payload entirely for
/// viewers without full-result access; an empty array would leak that the
/// viewer was gated versus the subject having no flags.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub subject_id: String,
    pub review_count: u32,
    pub aggregate_mean: Option<f64>,
    pub confidence_percent: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub positive_flags: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_flags: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narratives: Option<Vec<String>>,
}

/// Compute the aggregate a viewer sees for one subject.
pub fn aggregate(subject_id: &str, reviews: &[ReviewDoc], viewer: &ViewerContext) -> AggregateResult {
    let eligible: Vec<&ReviewDoc> = reviews
        .iter()
        .filter(|review| is_eligible(review, viewer))
        .collect();

    let review_count = eligible.len() as u32;

    let per_review_means: Vec<f64> = eligible
        .iter()
        .filter_map(|review| review.ratings.mean())
        .collect();
    let aggregate_mean = if per_review_means.is_empty() {
        None
    } else {
        let sum: f64 = per_review_means.iter().sum();
        Some(round_one_decimal(sum / per_review_means.len() as f64))
    };

    // A saturating UX heuristic, not a statistical confidence interval
    let confidence_percent = (review_count * 10).min(100);

    let (positive_flags, negative_flags, narratives) = if viewer.can_view_full_result {
        let positive: BTreeSet<String> = eligible
            .iter()
            .flat_map(|review| review.positive_flags.iter().cloned())
            .collect();
        let negative: BTreeSet<String> = eligible
            .iter()
            .flat_map(|review| review.negative_flags.iter().cloned())
            .collect();
        let narratives: Vec<String> = eligible
            .iter()
            .map(|review| review.narrative.trim())
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();
        (Some(positive), Some(negative), Some(narratives))
    } else {
        (None, None, None)
    };

    AggregateResult {
        subject_id: subject_id.to_string(),
        review_count,
        aggregate_mean,
        confidence_percent,
        positive_flags,
        negative_flags,
        narratives,
    }
}

/// A review counts toward the aggregate when it is public, or when the
/// viewer authored it — authors always see their own contribution.
fn is_eligible(review: &ReviewDoc, viewer: &ViewerContext) -> bool {
    if review.public {
        return true;
    }
    match (&review.author_id, &viewer.user_id) {
        (Some(author), Some(viewer_id)) => author == viewer_id,
        _ => false,
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::Ratings;

    fn review(author_id: Option<&str>, public: bool, all_ratings: i32) -> ReviewDoc {
        ReviewDoc {
            author_id: author_id.map(str::to_string),
            public,
            anonymous: author_id.is_none(),
            ratings: Ratings {
                behavior: all_ratings,
                emotional_safety: all_ratings,
                respect: all_ratings,
                character: all_ratings,
                trust: all_ratings,
            },
            narrative: "something happened".to_string(),
            positive_flags: vec!["respectful".to_string()],
            negative_flags: vec![],
            ..Default::default()
        }
    }

    fn full_viewer(user_id: &str) -> ViewerContext {
        ViewerContext {
            user_id: Some(user_id.to_string()),
            can_view_full_result: true,
        }
    }

    #[test]
    fn test_owner_sees_own_private_review_in_aggregate() {
        let reviews = vec![
            review(Some("u-other"), true, 4),
            review(Some("u-self"), false, 2),
        ];

        let owner_view = aggregate("s1", &reviews, &full_viewer("u-self"));
        assert_eq!(owner_view.review_count, 2);
        assert_eq!(owner_view.aggregate_mean, Some(3.0));

        let stranger_view = aggregate("s1", &reviews, &full_viewer("u-stranger"));
        assert_eq!(stranger_view.review_count, 1);
        assert_eq!(stranger_view.aggregate_mean, Some(4.0));
    }

    #[test]
    fn test_zero_eligible_reviews_yields_no_data_sentinel() {
        let reviews = vec![review(Some("u-hidden"), false, 5)];
        let result = aggregate("s1", &reviews, &full_viewer("u-stranger"));

        assert_eq!(result.review_count, 0);
        assert_eq!(result.aggregate_mean, None);
        assert_eq!(result.confidence_percent, 0);

        let json = serde_json::to_value(&result).unwrap();
        assert!(json["aggregateMean"].is_null());
        // Full access with nothing recorded still shows empty flag sets
        assert_eq!(json["positiveFlags"], serde_json::json!([]));
    }

    #[test]
    fn test_missing_ratings_do_not_drag_the_mean() {
        let mut partial = review(None, true, 0);
        partial.ratings.behavior = 5;
        let result = aggregate("s1", &[partial], &ViewerContext::default());
        assert_eq!(result.aggregate_mean, Some(5.0));
    }

    #[test]
    fn test_confidence_saturates_at_ten_reviews() {
        let make = |count: usize| {
            let reviews: Vec<ReviewDoc> = (0..count).map(|_| review(None, true, 3)).collect();
            aggregate("s1", &reviews, &ViewerContext::default()).confidence_percent
        };

        assert_eq!(make(0), 0);
        assert_eq!(make(1), 10);
        assert_eq!(make(9), 90);
        assert_eq!(make(10), 100);
        assert_eq!(make(25), 100);
    }

    #[test]
    fn test_mean_rounds_to_one_decimal() {
        let reviews = vec![
            review(None, true, 4),
            review(None, true, 4),
            review(None, true, 5),
        ];
        let result = aggregate("s1", &reviews, &ViewerContext::default());
        assert_eq!(result.aggregate_mean, Some(4.3));
    }

    #[test]
    fn test_gated_viewer_gets_no_flag_keys() {
        let reviews = vec![review(None, true, 4)];
        let gated = ViewerContext {
            user_id: Some("u-free".to_string()),
            can_view_full_result: false,
        };
        let result = aggregate("s1", &reviews, &gated);

        assert!(result.positive_flags.is_none());
        let json = serde_json::to_value(&result).unwrap();
        let keys = json.as_object().unwrap();
        assert!(!keys.contains_key("positiveFlags"));
        assert!(!keys.contains_key("negativeFlags"));
        assert!(!keys.contains_key("narratives"));
        assert!(keys.contains_key("reviewCount"));
        assert!(keys.contains_key("aggregateMean"));
        assert!(keys.contains_key("confidencePercent"));
    }

    #[test]
    fn test_flag_sets_are_unions() {
        let mut a = review(None, true, 4);
        a.positive_flags = vec!["respectful".to_string(), "honest".to_string()];
        a.negative_flags = vec!["ghosting".to_string()];
        let mut b = review(None, true, 2);
        b.positive_flags = vec!["honest".to_string()];
        b.negative_flags = vec!["aggressive".to_string(), "ghosting".to_string()];

        let result = aggregate("s1", &[a, b], &full_viewer("u-x"));
        let positive = result.positive_flags.unwrap();
        let negative = result.negative_flags.unwrap();
        assert_eq!(
            positive.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["honest", "respectful"]
        );
        assert_eq!(
            negative.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["aggressive", "ghosting"]
        );
    }
}
