use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::AppError;
use crate::groups::{self, NewGroup};

#[derive(Deserialize)]
pub struct JoinForm {
    invite_code: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/groups", get(list_groups).post(create_group))
        .route("/groups/join", post(join_group))
        .route("/groups/{id}", get(show_group))
        .route("/groups/{id}/members", get(list_members))
        .route("/groups/{id}/leave", post(leave_group))
}

async fn list_groups(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(groups::list_groups(&state.db, &user.id).await?))
}

async fn create_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(form): Json<NewGroup>,
) -> Result<impl IntoResponse, AppError> {
    let group = groups::create_group(&state, &user, form).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn join_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(form): Json<JoinForm>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(groups::join_group(&state, &user, &form.invite_code).await?))
}

async fn show_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    groups::require_member(&state.db, &id, &user.id).await?;
    Ok(Json(groups::get_group(&state.db, &id).await?))
}

async fn list_members(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    groups::require_member(&state.db, &id, &user.id).await?;
    Ok(Json(groups::list_members(&state.db, &id).await?))
}

async fn leave_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    groups::leave_group(&state, &user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
