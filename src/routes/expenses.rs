use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::AppError;
use crate::expenses::{self, BudgetForm, ExpenseForm};
use crate::groups;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/groups/{id}/expenses", post(add_expense))
        .route("/groups/{id}/expenses/init", get(init_expenses))
        .route("/groups/{id}/budget", get(show_budget).put(set_budget))
        .route("/expenses/{id}", put(update_expense).delete(delete_expense))
}

async fn add_expense(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<String>,
    Json(form): Json<ExpenseForm>,
) -> Result<impl IntoResponse, AppError> {
    let expense = expenses::add_expense(&state, &user, &group_id, form).await?;
    Ok((StatusCode::CREATED, Json(expense)))
}

async fn init_expenses(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    groups::require_member(&state.db, &group_id, &user.id).await?;
    Ok(Json(expenses::fetch_expense_snapshot(&state.db, &group_id).await?))
}

async fn update_expense(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(form): Json<ExpenseForm>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(expenses::update_expense(&state, &user, &id, form).await?))
}

async fn delete_expense(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    expenses::delete_expense(&state, &user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn show_budget(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    groups::require_member(&state.db, &group_id, &user.id).await?;
    Ok(Json(expenses::budget_summary(&state.db, &group_id).await?))
}

async fn set_budget(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<String>,
    Json(form): Json<BudgetForm>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(expenses::upsert_budget(&state, &user, &group_id, form).await?))
}
