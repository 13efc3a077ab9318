use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;

use crate::AppState;
use crate::error::AppError;
use crate::feed::{Change, RowEvent, Topic};
use crate::groups;
use crate::models::{ChallengeMember, ChallengeStatus, GroupChallenge, User};

const MAX_DURATION_HOURS: i64 = 24 * 365;

#[derive(Debug, Deserialize)]
pub struct NewChallenge {
    pub title: String,
    pub description: Option<String>,
    pub duration_hours: i64,
}

#[derive(Debug, Serialize, FromRow)]
pub struct ChallengeView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub challenge: GroupChallenge,
    pub my_status: Option<ChallengeStatus>,
    pub expires_at: Option<String>,
}

fn validate_challenge(form: &NewChallenge) -> HashMap<String, String> {
    let mut errors = HashMap::new();

    if form.title.trim().is_empty() {
        errors.insert("title".to_string(), "Title is required".to_string());
    }

    if form.duration_hours < 1 {
        errors.insert("duration_hours".to_string(), "Duration must be at least 1 hour".to_string());
    } else if form.duration_hours > MAX_DURATION_HOURS {
        errors.insert("duration_hours".to_string(), "Duration must be under a year".to_string());
    }

    errors
}

pub async fn create_challenge(
    state: &AppState,
    user: &User,
    group_id: &str,
    form: NewChallenge,
) -> Result<GroupChallenge, AppError> {
    groups::require_member(&state.db, group_id, &user.id).await?;

    let errors = validate_challenge(&form);
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let challenge = GroupChallenge::new(
        group_id.to_string(),
        user.id.clone(),
        form.title.trim().to_string(),
        form.description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
        form.duration_hours,
    );

    sqlx::query(
        "INSERT INTO group_challenges (id, group_id, title, description, duration_hours, created_by, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)"
    )
    .bind(&challenge.id)
    .bind(&challenge.group_id)
    .bind(&challenge.title)
    .bind(&challenge.description)
    .bind(challenge.duration_hours)
    .bind(&challenge.created_by)
    .bind(&challenge.created_at)
    .execute(&state.db)
    .await?;

    Ok(challenge)
}

/// Challenges in a group the user has not declined.
pub async fn list_challenges(db: &SqlitePool, group_id: &str, user_id: &str) -> Result<Vec<ChallengeView>, AppError> {
    let challenges = sqlx::query_as(
        r#"
        SELECT c.*, cm.status AS my_status, cm.expires_at AS expires_at
        FROM group_challenges c
        LEFT JOIN challenge_members cm ON cm.challenge_id = c.id AND cm.user_id = ?
        WHERE c.group_id = ? AND (cm.status IS NULL OR cm.status <> ?)
        ORDER BY c.created_at DESC
        "#
    )
    .bind(user_id)
    .bind(group_id)
    .bind(ChallengeStatus::Declined)
    .fetch_all(db)
    .await?;
    Ok(challenges)
}

async fn visible_challenge(db: &SqlitePool, challenge_id: &str, user_id: &str) -> Result<GroupChallenge, AppError> {
    let challenge: GroupChallenge = sqlx::query_as("SELECT * FROM group_challenges WHERE id = ?")
        .bind(challenge_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound)?;
    groups::require_member(db, &challenge.group_id, user_id).await?;
    Ok(challenge)
}

async fn find_membership(db: &SqlitePool, challenge_id: &str, user_id: &str) -> Result<Option<ChallengeMember>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM challenge_members WHERE challenge_id = ? AND user_id = ?")
        .bind(challenge_id)
        .bind(user_id)
        .fetch_optional(db)
        .await
}

fn publish_membership(state: &AppState, group_id: &str, previous: Option<ChallengeMember>, current: ChallengeMember) {
    let event = match previous {
        Some(old) => RowEvent::update(old, current),
        None => RowEvent::insert(current),
    };
    state.feed.publish(
        &Topic::GroupChallenges(group_id.to_string()),
        Change::ChallengeMembers(event),
    );
}

/// Join, or re-join to restart the expiry clock. A decline is final: joining
/// a declined challenge is refused.
pub async fn join_challenge(state: &AppState, user: &User, challenge_id: &str) -> Result<ChallengeMember, AppError> {
    let challenge = visible_challenge(&state.db, challenge_id, &user.id).await?;
    let previous = find_membership(&state.db, challenge_id, &user.id).await?;
    let member = ChallengeMember::joined(&challenge, user.id.clone());

    let result = sqlx::query(
        r#"
        INSERT INTO challenge_members (challenge_id, user_id, status, joined_at, expires_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (challenge_id, user_id)
        DO UPDATE SET status = excluded.status, joined_at = excluded.joined_at, expires_at = excluded.expires_at
        WHERE challenge_members.status <> ?
        "#
    )
    .bind(&member.challenge_id)
    .bind(&member.user_id)
    .bind(member.status)
    .bind(&member.joined_at)
    .bind(&member.expires_at)
    .bind(ChallengeStatus::Declined)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict("Challenge was declined".to_string()));
    }

    tracing::info!(challenge_id, user_id = %user.id, "challenge joined");
    publish_membership(state, &challenge.group_id, previous, member.clone());
    Ok(member)
}

/// Opt out of a challenge for good. Repeating a decline is harmless.
pub async fn decline_challenge(state: &AppState, user: &User, challenge_id: &str) -> Result<ChallengeMember, AppError> {
    let challenge = visible_challenge(&state.db, challenge_id, &user.id).await?;
    let previous = find_membership(&state.db, challenge_id, &user.id).await?;
    let member = ChallengeMember::declined(&challenge, user.id.clone());

    sqlx::query(
        r#"
        INSERT INTO challenge_members (challenge_id, user_id, status, joined_at, expires_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (challenge_id, user_id)
        DO UPDATE SET status = excluded.status, joined_at = excluded.joined_at, expires_at = excluded.expires_at
        "#
    )
    .bind(&member.challenge_id)
    .bind(&member.user_id)
    .bind(member.status)
    .bind(&member.joined_at)
    .bind(&member.expires_at)
    .execute(&state.db)
    .await?;

    tracing::info!(challenge_id, user_id = %user.id, "challenge declined");
    publish_membership(state, &challenge.group_id, previous, member.clone());
    Ok(member)
}
