//! Group decisions: proposal, voting and majority resolution.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;

use crate::AppState;
use crate::consensus::{self, Resolution};
use crate::db;
use crate::error::AppError;
use crate::feed::{Change, RowEvent, Topic};
use crate::groups;
use crate::models::{
    Activity, Decision, DecisionOption, DecisionStatus, NO_LABEL, Proposal, User, Vote, YES_LABEL,
};
use crate::reducer::VoteTally;

#[derive(Debug, Deserialize)]
pub struct NewDecision {
    pub title: String,
    pub starts_at: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DecisionDetail {
    #[serde(flatten)]
    pub decision: Decision,
    pub options: Vec<DecisionOption>,
}

/// Authoritative vote state for one decision as seen by one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecisionSnapshot {
    pub status: DecisionStatus,
    pub tally: VoteTally,
}

#[derive(Debug, Serialize)]
pub struct VoteOutcome {
    pub vote: Vote,
    pub resolution: Resolution,
}

#[derive(FromRow)]
struct OptionTally {
    id: String,
    label: String,
    votes: i64,
}

fn validate_decision(form: &NewDecision) -> HashMap<String, String> {
    let mut errors = HashMap::new();

    if form.title.trim().is_empty() {
        errors.insert("title".to_string(), "Title is required".to_string());
    }

    if form.title.len() > 200 {
        errors.insert("title".to_string(), "Title must be under 200 characters".to_string());
    }

    if let Some(starts_at) = form.starts_at.as_deref().filter(|s| !s.trim().is_empty()) {
        if chrono::DateTime::parse_from_rfc3339(starts_at.trim()).is_err()
            && chrono::NaiveDateTime::parse_from_str(starts_at.trim(), "%Y-%m-%dT%H:%M").is_err()
        {
            errors.insert("starts_at".to_string(), "Start time must be an ISO 8601 timestamp".to_string());
        }
    }

    errors
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Open a decision with its two fixed options, Yes then No.
pub async fn create_decision(
    state: &AppState,
    user: &User,
    group_id: &str,
    form: NewDecision,
) -> Result<DecisionDetail, AppError> {
    groups::require_member(&state.db, group_id, &user.id).await?;

    let errors = validate_decision(&form);
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let proposal = Proposal {
        title: form.title.trim().to_string(),
        starts_at: trimmed(form.starts_at),
        location: trimmed(form.location),
        notes: trimmed(form.notes),
    };
    let decision = Decision::new(group_id.to_string(), user.id.clone(), proposal);
    let options = vec![
        DecisionOption::new(decision.id.clone(), YES_LABEL, 0),
        DecisionOption::new(decision.id.clone(), NO_LABEL, 1),
    ];

    let mut tx = state.db.begin().await?;
    sqlx::query(
        "INSERT INTO decisions (id, group_id, title, starts_at, location, notes, status, created_by, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
    )
    .bind(&decision.id)
    .bind(&decision.group_id)
    .bind(&decision.proposal.title)
    .bind(&decision.proposal.starts_at)
    .bind(&decision.proposal.location)
    .bind(&decision.proposal.notes)
    .bind(decision.status)
    .bind(&decision.created_by)
    .bind(&decision.created_at)
    .execute(&mut *tx)
    .await?;

    for option in &options {
        sqlx::query("INSERT INTO decision_options (id, decision_id, label, position) VALUES (?, ?, ?, ?)")
            .bind(&option.id)
            .bind(&option.decision_id)
            .bind(&option.label)
            .bind(option.position)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    tracing::info!(decision_id = %decision.id, group_id, "decision opened");
    Ok(DecisionDetail { decision, options })
}

pub async fn list_decisions(db: &SqlitePool, group_id: &str) -> Result<Vec<Decision>, AppError> {
    let decisions = sqlx::query_as("SELECT * FROM decisions WHERE group_id = ? ORDER BY created_at DESC")
        .bind(group_id)
        .fetch_all(db)
        .await?;
    Ok(decisions)
}

pub async fn get_decision(db: &SqlitePool, decision_id: &str) -> Result<Decision, AppError> {
    sqlx::query_as("SELECT * FROM decisions WHERE id = ?")
        .bind(decision_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn list_options(db: &SqlitePool, decision_id: &str) -> Result<Vec<DecisionOption>, AppError> {
    let options = sqlx::query_as("SELECT * FROM decision_options WHERE decision_id = ? ORDER BY position")
        .bind(decision_id)
        .fetch_all(db)
        .await?;
    Ok(options)
}

/// Load a decision the caller is allowed to see.
pub async fn visible_decision(db: &SqlitePool, decision_id: &str, user_id: &str) -> Result<Decision, AppError> {
    let decision = get_decision(db, decision_id).await?;
    groups::require_member(db, &decision.group_id, user_id).await?;
    Ok(decision)
}

/// Record the caller's ballot. Re-voting overwrites the previous ballot, so a
/// retried or doubled request never counts twice.
pub async fn cast_vote(
    state: &AppState,
    user: &User,
    decision_id: &str,
    option_id: &str,
) -> Result<VoteOutcome, AppError> {
    visible_decision(&state.db, decision_id, &user.id).await?;

    let mut tx = db::begin_write(&state.db).await?;
    let (status,): (DecisionStatus,) = sqlx::query_as("SELECT status FROM decisions WHERE id = ?")
        .bind(decision_id)
        .fetch_one(&mut *tx)
        .await?;
    if status.is_terminal() {
        return Err(AppError::Conflict(format!("Decision is already {status}")));
    }

    let option_exists: Option<(String,)> =
        sqlx::query_as("SELECT id FROM decision_options WHERE id = ? AND decision_id = ?")
            .bind(option_id)
            .bind(decision_id)
            .fetch_optional(&mut *tx)
            .await?;
    if option_exists.is_none() {
        return Err(AppError::invalid("option_id", "Option does not belong to this decision"));
    }

    let previous: Option<Vote> =
        sqlx::query_as("SELECT * FROM decision_votes WHERE decision_id = ? AND user_id = ?")
            .bind(decision_id)
            .bind(&user.id)
            .fetch_optional(&mut *tx)
            .await?;

    let candidate = Vote::new(decision_id.to_string(), user.id.clone(), option_id.to_string());
    sqlx::query(
        r#"
        INSERT INTO decision_votes (id, decision_id, user_id, option_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (decision_id, user_id)
        DO UPDATE SET option_id = excluded.option_id, updated_at = excluded.updated_at
        "#
    )
    .bind(&candidate.id)
    .bind(&candidate.decision_id)
    .bind(&candidate.user_id)
    .bind(&candidate.option_id)
    .bind(&candidate.created_at)
    .bind(&candidate.updated_at)
    .execute(&mut *tx)
    .await?;

    let stored: Vote = sqlx::query_as("SELECT * FROM decision_votes WHERE decision_id = ? AND user_id = ?")
        .bind(decision_id)
        .bind(&user.id)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;

    let event = match previous {
        Some(old) => RowEvent::update(old, stored.clone()),
        None => RowEvent::insert(stored.clone()),
    };
    state
        .feed
        .publish(&Topic::Decision(decision_id.to_string()), Change::DecisionVotes(event));

    let resolution = resolve(state, decision_id, &user.id).await?;
    Ok(VoteOutcome { vote: stored, resolution })
}

/// Withdraw the caller's ballot from an open decision.
pub async fn retract_vote(state: &AppState, user: &User, decision_id: &str) -> Result<Resolution, AppError> {
    let decision = visible_decision(&state.db, decision_id, &user.id).await?;
    if decision.status.is_terminal() {
        return Err(AppError::Conflict(format!("Decision is already {}", decision.status)));
    }

    let mut tx = db::begin_write(&state.db).await?;
    let existing: Option<Vote> =
        sqlx::query_as("SELECT * FROM decision_votes WHERE decision_id = ? AND user_id = ?")
            .bind(decision_id)
            .bind(&user.id)
            .fetch_optional(&mut *tx)
            .await?;
    let Some(existing) = existing else {
        return Ok(Resolution::Pending);
    };
    sqlx::query("DELETE FROM decision_votes WHERE id = ?")
        .bind(&existing.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    state.feed.publish(
        &Topic::Decision(decision_id.to_string()),
        Change::DecisionVotes(RowEvent::delete(existing)),
    );

    resolve(state, decision_id, &user.id).await
}

/// Evaluate the majority rule and, if it is met, close the decision.
///
/// The tallies, the member count and the status change are read and written
/// in one write-locked transaction, and the status update only applies while
/// the decision is still open. Resolvers of one decision in this process run
/// one at a time, each seeing the votes committed before it started. Approval
/// materializes the proposal as an [`Activity`] exactly once.
pub async fn resolve(state: &AppState, decision_id: &str, actor_id: &str) -> Result<Resolution, AppError> {
    let _guard = state.resolving.begin(decision_id).await;

    let mut tx = db::begin_write(&state.db).await?;
    let decision: Decision = sqlx::query_as("SELECT * FROM decisions WHERE id = ?")
        .bind(decision_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound)?;
    if decision.status.is_terminal() {
        return Ok(Resolution::AlreadyClosed);
    }

    let tallies: Vec<OptionTally> = sqlx::query_as(
        r#"
        SELECT o.id, o.label, COUNT(v.id) AS votes
        FROM decision_options o
        LEFT JOIN decision_votes v ON v.option_id = o.id
        WHERE o.decision_id = ?
        GROUP BY o.id, o.label
        "#
    )
    .bind(decision_id)
    .fetch_all(&mut *tx)
    .await?;
    let votes_for = |label: &str| -> (Option<String>, u64) {
        tallies
            .iter()
            .find(|t| t.label == label)
            .map(|t| (Some(t.id.clone()), u64::try_from(t.votes).unwrap_or(0)))
            .unwrap_or((None, 0))
    };
    let (yes_option, yes) = votes_for(YES_LABEL);
    let (_, no) = votes_for(NO_LABEL);
    let members = groups::member_count(&mut *tx, &decision.group_id).await?;

    let Some(next) = consensus::evaluate(decision.status, yes, no, members) else {
        return Ok(Resolution::Pending);
    };

    let mut closed = decision.clone();
    closed.status = next;
    if next == DecisionStatus::Approved {
        closed.approved_option_id = yes_option;
        closed.approved_by = Some(actor_id.to_string());
        closed.approved_at = Some(Utc::now().to_rfc3339());
    }

    let result = sqlx::query(
        "UPDATE decisions SET status = ?, approved_option_id = ?, approved_by = ?, approved_at = ? WHERE id = ? AND status = ?"
    )
    .bind(closed.status)
    .bind(&closed.approved_option_id)
    .bind(&closed.approved_by)
    .bind(&closed.approved_at)
    .bind(decision_id)
    .bind(DecisionStatus::Open)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tracing::debug!(decision_id, "lost decision resolution race");
        return Ok(Resolution::LostRace);
    }

    if next == DecisionStatus::Approved {
        let activity = Activity::from_decision(&closed, actor_id.to_string());
        sqlx::query(
            r#"
            INSERT INTO activities (id, group_id, decision_id, title, starts_at, location, notes, created_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (decision_id) DO NOTHING
            "#
        )
        .bind(&activity.id)
        .bind(&activity.group_id)
        .bind(&activity.decision_id)
        .bind(&activity.proposal.title)
        .bind(&activity.proposal.starts_at)
        .bind(&activity.proposal.location)
        .bind(&activity.proposal.notes)
        .bind(&activity.created_by)
        .bind(&activity.created_at)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::info!(decision_id, status = %next, yes, no, members, "decision resolved");
    state.feed.publish(
        &Topic::Decision(decision_id.to_string()),
        Change::Decisions(RowEvent::update(decision, closed)),
    );

    Ok(match next {
        DecisionStatus::Approved => Resolution::Approved,
        _ => Resolution::Declined,
    })
}

/// Ground truth for a decision's vote state, used to reset folded state.
pub async fn fetch_vote_snapshot(
    db: &SqlitePool,
    decision_id: &str,
    user_id: &str,
) -> Result<DecisionSnapshot, AppError> {
    let decision = get_decision(db, decision_id).await?;
    let options = list_options(db, decision_id).await?;
    let ballots: Vec<(String, String)> =
        sqlx::query_as("SELECT user_id, option_id FROM decision_votes WHERE decision_id = ?")
            .bind(decision_id)
            .fetch_all(db)
            .await?;

    let mut tally = VoteTally::with_options(options.iter().map(|o| o.id.as_str()));
    for (voter, option_id) in ballots {
        *tally.counts.entry(option_id.clone()).or_insert(0) += 1;
        if voter == user_id {
            tally.my_vote = Some(option_id.clone());
        }
        tally.ballots.insert(voter, option_id);
    }

    Ok(DecisionSnapshot { status: decision.status, tally })
}

pub async fn list_activities(db: &SqlitePool, group_id: &str) -> Result<Vec<Activity>, AppError> {
    let activities = sqlx::query_as(
        "SELECT * FROM activities WHERE group_id = ? ORDER BY starts_at IS NULL, starts_at, created_at"
    )
    .bind(group_id)
    .fetch_all(db)
    .await?;
    Ok(activities)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(title: &str, starts_at: Option<&str>) -> NewDecision {
        NewDecision {
            title: title.to_string(),
            starts_at: starts_at.map(str::to_string),
            location: None,
            notes: None,
        }
    }

    #[test]
    fn title_is_required() {
        assert_eq!(validate_decision(&form(" ", None))["title"], "Title is required");
        assert!(validate_decision(&form("Dinner at the night market", None)).is_empty());
    }

    #[test]
    fn start_time_accepts_rfc3339_and_datetime_local() {
        assert!(validate_decision(&form("Dive", Some("2026-11-02T09:00:00+08:00"))).is_empty());
        assert!(validate_decision(&form("Dive", Some("2026-11-02T09:00"))).is_empty());
        assert!(validate_decision(&form("Dive", Some("tomorrow-ish"))).contains_key("starts_at"));
    }
}
