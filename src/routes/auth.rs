use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_sessions::Session;

use crate::AppState;
use crate::auth::{AuthUser, login_user, logout_user};
use crate::error::AppError;
use crate::models::User;

#[derive(Deserialize)]
pub struct LoginForm {
    invite_code: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login_submit))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

async fn login_submit(
    State(state): State<AppState>,
    session: Session,
    Json(form): Json<LoginForm>,
) -> Result<impl IntoResponse, AppError> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE invite_code = ?")
        .bind(form.invite_code.trim())
        .fetch_optional(&state.db)
        .await?;

    let Some(user) = user else {
        return Err(AppError::invalid("invite_code", "Invalid invite code"));
    };

    tracing::info!(user_id = %user.id, "user logged in");
    login_user(&session, user.clone()).await?;
    Ok(Json(user))
}

async fn logout(session: Session) -> Result<impl IntoResponse, AppError> {
    logout_user(&session).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}
