use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use crate::AppState;
use crate::auth::AuthUser;
use crate::challenges::{self, NewChallenge};
use crate::error::AppError;
use crate::groups;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/groups/{id}/challenges", get(list_challenges).post(create_challenge))
        .route("/challenges/{id}/join", post(join_challenge))
        .route("/challenges/{id}/decline", post(decline_challenge))
}

async fn list_challenges(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    groups::require_member(&state.db, &group_id, &user.id).await?;
    Ok(Json(challenges::list_challenges(&state.db, &group_id, &user.id).await?))
}

async fn create_challenge(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<String>,
    Json(form): Json<NewChallenge>,
) -> Result<impl IntoResponse, AppError> {
    let challenge = challenges::create_challenge(&state, &user, &group_id, form).await?;
    Ok((StatusCode::CREATED, Json(challenge)))
}

async fn join_challenge(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(challenges::join_challenge(&state, &user, &id).await?))
}

async fn decline_challenge(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(challenges::decline_challenge(&state, &user, &id).await?))
}
