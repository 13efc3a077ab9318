use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::AppState;
use crate::auth::AuthUser;
use crate::consensus::{self, Resolution};
use crate::decisions::{self, NewDecision};
use crate::error::AppError;
use crate::groups;
use crate::models::{Decision, DecisionOption, DecisionStatus};

#[derive(Deserialize)]
pub struct VoteForm {
    option_id: String,
}

/// Everything a client needs before its live subscription starts.
#[derive(Serialize)]
struct DecisionInit {
    decision: Decision,
    options: Vec<DecisionOption>,
    counts: BTreeMap<String, u64>,
    my_vote_option_id: Option<String>,
    status: DecisionStatus,
    member_count: u64,
    majority: u64,
}

#[derive(Serialize)]
struct RetractOutcome {
    resolution: Resolution,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/groups/{id}/decisions", get(list_decisions).post(create_decision))
        .route("/groups/{id}/activities", get(list_activities))
        .route("/decisions/{id}/init", get(init_decision))
        .route("/decisions/{id}/vote", post(cast_vote).delete(retract_vote))
}

async fn list_decisions(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    groups::require_member(&state.db, &group_id, &user.id).await?;
    Ok(Json(decisions::list_decisions(&state.db, &group_id).await?))
}

async fn create_decision(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<String>,
    Json(form): Json<NewDecision>,
) -> Result<impl IntoResponse, AppError> {
    let detail = decisions::create_decision(&state, &user, &group_id, form).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn list_activities(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    groups::require_member(&state.db, &group_id, &user.id).await?;
    Ok(Json(decisions::list_activities(&state.db, &group_id).await?))
}

async fn init_decision(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let decision = decisions::visible_decision(&state.db, &id, &user.id).await?;
    let options = decisions::list_options(&state.db, &id).await?;
    let snapshot = decisions::fetch_vote_snapshot(&state.db, &id, &user.id).await?;
    let member_count = groups::member_count(&state.db, &decision.group_id).await?;

    Ok(Json(DecisionInit {
        decision,
        options,
        counts: snapshot.tally.counts,
        my_vote_option_id: snapshot.tally.my_vote,
        status: snapshot.status,
        member_count,
        majority: consensus::majority(member_count),
    }))
}

async fn cast_vote(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(form): Json<VoteForm>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(decisions::cast_vote(&state, &user, &id, &form.option_id).await?))
}

async fn retract_vote(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let resolution = decisions::retract_vote(&state, &user, &id).await?;
    Ok(Json(RetractOutcome { resolution }))
}
