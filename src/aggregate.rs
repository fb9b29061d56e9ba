//! Recommendation aggregator: destination-level score from the full review set.
//!
//! Always recomputed from every review of the destination (never patched
//! incrementally), so a recompute can run at any time and gives the same answer
//! for the same reviews.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::AggregateConfig;
use crate::error::AggregateError;

/// The two persisted fields of a review that the aggregator reads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    /// Star rating 1..=5.
    pub rating: u8,
    /// Fused sentiment score in [-1, 1].
    pub sentiment_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationAggregate {
    pub destination_id: String,
    pub overall_score: f64,
    pub review_score: f64,
    pub sentiment_score: f64,
    pub popularity_score: f64,
    pub total_reviews: usize,
    pub avg_rating: f64,
    /// Share of reviews with sentiment > 0, in [0, 1].
    pub positive_ratio: f64,
}

/// Where the reviews of a destination come from (database, in-memory store, ...).
pub trait ReviewSource: Send + Sync {
    fn reviews_for(&self, destination_id: &str) -> Result<Vec<ReviewRecord>, AggregateError>;
    fn destination_ids(&self) -> Result<Vec<String>, AggregateError>;
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Pure aggregation over one destination's reviews.
pub fn aggregate(
    destination_id: &str,
    reviews: &[ReviewRecord],
    cfg: &AggregateConfig,
) -> DestinationAggregate {
    let total = reviews.len();
    if total == 0 {
        return DestinationAggregate {
            destination_id: destination_id.to_string(),
            overall_score: round2(cfg.default_score as f64),
            review_score: 0.0,
            sentiment_score: 0.0,
            popularity_score: 0.0,
            total_reviews: 0,
            avg_rating: 0.0,
            positive_ratio: 0.0,
        };
    }

    let n = total as f64;
    let avg_rating = reviews
        .iter()
        .map(|r| r.rating.clamp(1, 5) as f64)
        .sum::<f64>()
        / n;
    let avg_sentiment = reviews
        .iter()
        .map(|r| (r.sentiment_score as f64).clamp(-1.0, 1.0))
        .sum::<f64>()
        / n;
    let positive = reviews.iter().filter(|r| r.sentiment_score > 0.0).count();

    let review_score = avg_rating / 5.0 * 100.0;
    let sentiment_score = (avg_sentiment + 1.0) / 2.0 * 100.0;
    let popularity_score = (n * cfg.point_per_review as f64).min(100.0);
    let overall = cfg.weight_review as f64 * review_score
        + cfg.weight_sentiment as f64 * sentiment_score
        + cfg.weight_popularity as f64 * popularity_score;

    DestinationAggregate {
        destination_id: destination_id.to_string(),
        overall_score: round2(overall),
        review_score: round2(review_score),
        sentiment_score: round2(sentiment_score),
        popularity_score: round2(popularity_score),
        total_reviews: total,
        avg_rating: round2(avg_rating),
        positive_ratio: round2(positive as f64 / n),
    }
}

/// Read every review of `destination_id` from `source` and aggregate them.
pub fn recalculate_destination_score(
    source: &dyn ReviewSource,
    destination_id: &str,
    cfg: &AggregateConfig,
) -> Result<DestinationAggregate, AggregateError> {
    let reviews = source.reviews_for(destination_id)?;
    let agg = aggregate(destination_id, &reviews, cfg);
    metrics::counter!("destination_recalculations_total").increment(1);
    info!(
        target: "aggregate",
        destination = destination_id,
        total = agg.total_reviews,
        overall = agg.overall_score,
        "destination score recalculated"
    );
    Ok(agg)
}
