//! Axum route handler for ad-hoc content scoring.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::scoring::recommendations::{recommendations, score_label};
use crate::scoring::{ContentMetrics, ContentScorer};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub text: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ScoreResponse {
    pub metrics: ContentMetrics,
    pub score_label: &'static str,
    pub recommendations: Vec<String>,
}

/// POST /api/v1/score
///
/// Scores arbitrary text with the same scorer the jobs use. Empty text is
/// valid and yields the baseline metrics.
pub async fn handle_score(
    State(state): State<AppState>,
    Json(request): Json<ScoreRequest>,
) -> Result<Json<ScoreResponse>, AppError> {
    let metrics = state.scorer.analyze(&request.text, &request.keywords);
    Ok(Json(ScoreResponse {
        score_label: score_label(metrics.score),
        recommendations: recommendations(&metrics),
        metrics,
    }))
}
