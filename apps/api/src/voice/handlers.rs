//! Axum route handlers for the Voice Profile API.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::state::AppState;
use crate::voice::models::{
    CreateProfileRequest, SimilarProfilesRequest, SimilarityMatch, UpdateProfileRequest,
    VoiceProfile, VoiceProfileSummary,
};
use crate::voice::service::DEFAULT_SIMILAR_LIMIT;

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub owner_id: Uuid,
}

/// GET /api/v1/voice-profiles?owner_id=
pub async fn handle_list_profiles(
    State(state): State<AppState>,
    Query(params): Query<OwnerQuery>,
) -> Result<Json<Vec<VoiceProfileSummary>>, AppError> {
    Ok(Json(state.profiles.list(params.owner_id).await?))
}

/// POST /api/v1/voice-profiles
///
/// Computes the embedding synchronously; nothing is stored if that fails.
pub async fn handle_create_profile(
    State(state): State<AppState>,
    Json(request): Json<CreateProfileRequest>,
) -> Result<(StatusCode, Json<VoiceProfile>), AppError> {
    let profile = state.profiles.create(request).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// GET /api/v1/voice-profiles/:id
pub async fn handle_get_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<VoiceProfile>, AppError> {
    Ok(Json(state.profiles.get(id).await?))
}

/// GET /api/v1/voice-profiles/:id/samples
pub async fn handle_get_samples(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.profiles.samples(id).await?))
}

/// PATCH /api/v1/voice-profiles/:id
pub async fn handle_update_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<VoiceProfile>, AppError> {
    Ok(Json(state.profiles.update(id, request).await?))
}

/// DELETE /api/v1/voice-profiles/:id
pub async fn handle_delete_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.profiles.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/voice-profiles/similar
pub async fn handle_find_similar(
    State(state): State<AppState>,
    Json(request): Json<SimilarProfilesRequest>,
) -> Result<Json<Vec<SimilarityMatch>>, AppError> {
    let limit = request.limit.unwrap_or(DEFAULT_SIMILAR_LIMIT);
    let matches = state
        .profiles
        .find_similar(request.owner_id, &request.query_text, limit)
        .await?;
    Ok(Json(matches))
}
