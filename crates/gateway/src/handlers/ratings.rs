//! Artifact rating handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use searcch_common::{
    auth::{ApiKey, SessionContext},
    db::{models::Artifact, Repository},
    errors::{AppError, Result},
};

#[derive(Debug, Deserialize)]
pub struct RatingQuery {
    pub userid: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RatingRequest {
    #[validate(range(min = 0, max = 5, message = "rating must be between 0 and 5"))]
    pub rating: i32,
}

/// A user's rating, or a note that there is none
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RatingResponse {
    Rating { rating: i32 },
    Message { message: String },
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

async fn require_artifact(repo: &Repository, artifact_id: Uuid) -> Result<Artifact> {
    repo.find_artifact_by_id(artifact_id)
        .await?
        .ok_or_else(|| AppError::InvalidArtifactId { id: artifact_id.to_string() })
}

/// GET /rating/{artifact_id}?userid=
pub async fn get_rating(
    State(state): State<AppState>,
    Path(artifact_id): Path<Uuid>,
    Query(query): Query<RatingQuery>,
) -> Result<Json<RatingResponse>> {
    let repo = Repository::new(state.db.clone());
    require_artifact(&repo, artifact_id).await?;

    let response = match repo.find_rating(artifact_id, query.userid).await? {
        Some(rating) => RatingResponse::Rating { rating: rating.rating },
        None => RatingResponse::Message {
            message: "the user has not rated this artifact".to_string(),
        },
    };

    Ok(Json(response))
}

/// POST /rating/{artifact_id}
pub async fn create_rating(
    _key: ApiKey,
    State(state): State<AppState>,
    ctx: SessionContext,
    Path(artifact_id): Path<Uuid>,
    Json(request): Json<RatingRequest>,
) -> Result<Json<MessageResponse>> {
    request.validate()?;

    let repo = Repository::new(state.db.clone());
    require_artifact(&repo, artifact_id).await?;

    // Duplicates are refused by the (user, artifact) unique index
    repo.create_rating(artifact_id, ctx.user.id, request.rating).await?;
    tracing::info!(artifact_id = %artifact_id, user_id = %ctx.user.id, rating = request.rating, "Rating added");

    Ok(Json(MessageResponse { message: "added new rating" }))
}

/// PUT /rating/{artifact_id}
pub async fn update_rating(
    _key: ApiKey,
    State(state): State<AppState>,
    ctx: SessionContext,
    Path(artifact_id): Path<Uuid>,
    Json(request): Json<RatingRequest>,
) -> Result<Json<MessageResponse>> {
    request.validate()?;

    let repo = Repository::new(state.db.clone());
    let existing = repo
        .find_rating(artifact_id, ctx.user.id)
        .await?
        .ok_or(AppError::RatingNotFound)?;

    repo.update_rating(existing, request.rating).await?;

    Ok(Json(MessageResponse { message: "updated rating" }))
}

/// DELETE /rating/{artifact_id}
pub async fn delete_rating(
    _key: ApiKey,
    State(state): State<AppState>,
    ctx: SessionContext,
    Path(artifact_id): Path<Uuid>,
) -> Result<Json<MessageResponse>> {
    let repo = Repository::new(state.db.clone());
    let existing = repo
        .find_rating(artifact_id, ctx.user.id)
        .await?
        .ok_or(AppError::RatingNotFound)?;

    repo.delete_rating(existing.id).await?;

    Ok(Json(MessageResponse { message: "deleted rating" }))
}
