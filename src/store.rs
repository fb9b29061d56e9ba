//! store.rs: in-memory review store backing the HTTP surface and tests.
//!
//! Keeps only what the caller persists per review (rating, fused score, keyword
//! evidence, spam action). Held reviews (`shadow`, `pending`) are stored but excluded
//! from aggregation until a moderator publishes them.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::{DestinationAggregate, ReviewRecord, ReviewSource};
use crate::analyze::antispam::SpamAction;
use crate::error::AggregateError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredReview {
    pub id: u64,
    pub destination_id: String,
    pub rating: u8,
    pub sentiment_score: f32,
    pub positive_keywords: Vec<String>,
    pub negative_keywords: Vec<String>,
    pub action: SpamAction,
    pub created_at: DateTime<Utc>,
}

impl StoredReview {
    /// Counted in the destination score.
    pub fn is_published(&self) -> bool {
        matches!(self.action, SpamAction::Allow | SpamAction::LowQuality)
    }
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    reviews: Vec<StoredReview>,
    scores: HashMap<String, DestinationAggregate>,
}

#[derive(Debug, Default)]
pub struct InMemoryReviewStore {
    inner: Mutex<Inner>,
}

impl InMemoryReviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a review and return its id. The `id` field of `review` is ignored.
    pub fn insert(&self, mut review: StoredReview) -> u64 {
        let mut g = self.inner.lock().expect("review store mutex poisoned");
        g.next_id += 1;
        review.id = g.next_id;
        g.reviews.push(review);
        g.next_id
    }

    /// Publish a held review. Returns false for unknown ids.
    pub fn publish(&self, id: u64) -> bool {
        let mut g = self.inner.lock().expect("review store mutex poisoned");
        match g.reviews.iter_mut().find(|r| r.id == id) {
            Some(r) => {
                r.action = SpamAction::Allow;
                true
            }
            None => false,
        }
    }

    pub fn reviews_of(&self, destination_id: &str) -> Vec<StoredReview> {
        let g = self.inner.lock().expect("review store mutex poisoned");
        g.reviews
            .iter()
            .filter(|r| r.destination_id == destination_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("review store mutex poisoned")
            .reviews
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last saved aggregate (written by the pipeline after each recompute).
    pub fn score(&self, destination_id: &str) -> Option<DestinationAggregate> {
        let g = self.inner.lock().expect("review store mutex poisoned");
        g.scores.get(destination_id).cloned()
    }

    pub fn save_score(&self, agg: DestinationAggregate) {
        let mut g = self.inner.lock().expect("review store mutex poisoned");
        g.scores.insert(agg.destination_id.clone(), agg);
    }
}

impl ReviewSource for InMemoryReviewStore {
    fn reviews_for(&self, destination_id: &str) -> Result<Vec<ReviewRecord>, AggregateError> {
        let g = self.inner.lock().expect("review store mutex poisoned");
        Ok(g.reviews
            .iter()
            .filter(|r| r.destination_id == destination_id && r.is_published())
            .map(|r| ReviewRecord {
                rating: r.rating,
                sentiment_score: r.sentiment_score,
            })
            .collect())
    }

    fn destination_ids(&self) -> Result<Vec<String>, AggregateError> {
        let g = self.inner.lock().expect("review store mutex poisoned");
        let mut ids: Vec<String> = g.reviews.iter().map(|r| r.destination_id.clone()).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}
