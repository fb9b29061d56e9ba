use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::aggregate::DestinationAggregate;
use crate::analyze::fusion::AnalysisResult;
use crate::analyze::neural::NeuralStatus;
use crate::analyze::antispam::SpamVerdict;
use crate::pipeline::{ReviewOutcome, ReviewPipeline, ReviewSubmission};
use crate::store::{InMemoryReviewStore, StoredReview};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ReviewPipeline>,
    pub store: Arc<InMemoryReviewStore>,
}

impl AppState {
    pub fn new(pipeline: ReviewPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            store: Arc::new(InMemoryReviewStore::new()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/analyze", post(analyze))
        .route("/spam-check", post(spam_check))
        .route("/reviews", post(submit_review))
        .route("/destinations/{id}/score", get(destination_score))
        .route("/neural/status", get(neural_status))
        .route("/admin/reload-lexicon", post(reload_lexicon))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ApiError { error: msg.into() })).into_response()
}

#[derive(Deserialize)]
struct AnalyzeReq {
    text: String,
    #[serde(default)]
    rating: Option<u8>,
}

async fn analyze(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeReq>,
) -> Json<AnalysisResult> {
    Json(state.pipeline.analyze_review(&body.text, body.rating).await)
}

#[derive(Deserialize)]
struct SpamReq {
    text: String,
    source_id: String,
    #[serde(default)]
    destination_id: Option<String>,
}

/// Dry run: the verdict a submission would get now, without recording it.
async fn spam_check(State(state): State<AppState>, Json(body): Json<SpamReq>) -> Json<SpamVerdict> {
    let verdict = state.pipeline.check_spam_at(
        &body.text,
        &body.source_id,
        body.destination_id.as_deref(),
        chrono::Utc::now(),
    );
    Json(verdict)
}

#[derive(Serialize)]
struct SubmitResp {
    review_id: Option<u64>,
    #[serde(flatten)]
    outcome: ReviewOutcome,
    destination_score: Option<DestinationAggregate>,
}

async fn submit_review(
    State(state): State<AppState>,
    Json(sub): Json<ReviewSubmission>,
) -> Response {
    if !(1..=5).contains(&sub.rating) {
        return api_error(StatusCode::UNPROCESSABLE_ENTITY, "rating must be between 1 and 5");
    }
    if sub.destination_id.trim().is_empty() {
        return api_error(StatusCode::UNPROCESSABLE_ENTITY, "destination_id is required");
    }

    let outcome = state.pipeline.submit_review(&sub).await;
    let Some(analysis) = outcome.analysis.as_ref() else {
        return Json(SubmitResp {
            review_id: None,
            outcome,
            destination_score: None,
        })
        .into_response();
    };

    let id = state.store.insert(StoredReview {
        id: 0,
        destination_id: sub.destination_id.clone(),
        rating: sub.rating,
        sentiment_score: analysis.score,
        positive_keywords: analysis.positive_keywords.clone(),
        negative_keywords: analysis.negative_keywords.clone(),
        action: outcome.verdict.action,
        created_at: sub.submitted_at.unwrap_or_else(chrono::Utc::now),
    });

    let score = match state
        .pipeline
        .recalculate_destination_score(state.store.as_ref(), &sub.destination_id)
    {
        Ok(agg) => {
            state.store.save_score(agg.clone());
            Some(agg)
        }
        Err(e) => {
            warn!(target: "api", error = %e, "destination recompute failed");
            None
        }
    };

    Json(SubmitResp {
        review_id: Some(id),
        outcome,
        destination_score: score,
    })
    .into_response()
}

async fn destination_score(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state
        .pipeline
        .recalculate_destination_score(state.store.as_ref(), &id)
    {
        Ok(agg) => {
            state.store.save_score(agg.clone());
            Json(agg).into_response()
        }
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn neural_status(State(state): State<AppState>) -> Json<NeuralStatus> {
    Json(state.pipeline.neural().status())
}

async fn reload_lexicon(State(state): State<AppState>) -> Response {
    match state.pipeline.lexicon().reload() {
        Ok(()) => {
            info!(target: "api", "lexicon reload requested");
            "reloaded".into_response()
        }
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("reload failed: {e}")),
    }
}
