pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::generation::handlers as generation;
use crate::scoring::handlers as scoring;
use crate::state::AppState;
use crate::voice::handlers as voice;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Generation API
        .route(
            "/api/v1/generate",
            post(generation::handle_submit).get(generation::handle_list_jobs),
        )
        .route("/api/v1/generate/stream", get(generation::handle_stream))
        .route("/api/v1/generate/outline", post(generation::handle_outline))
        .route("/api/v1/generate/:id", get(generation::handle_get_job))
        // Scoring API
        .route("/api/v1/score", post(scoring::handle_score))
        // Voice Profile API
        .route(
            "/api/v1/voice-profiles",
            get(voice::handle_list_profiles).post(voice::handle_create_profile),
        )
        .route(
            "/api/v1/voice-profiles/similar",
            post(voice::handle_find_similar),
        )
        .route(
            "/api/v1/voice-profiles/:id",
            get(voice::handle_get_profile)
                .patch(voice::handle_update_profile)
                .delete(voice::handle_delete_profile),
        )
        .route(
            "/api/v1/voice-profiles/:id/samples",
            get(voice::handle_get_samples),
        )
        .with_state(state)
}
