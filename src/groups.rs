use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor, SqlitePool};
use std::collections::HashMap;

use crate::AppState;
use crate::db;
use crate::decisions;
use crate::error::AppError;
use crate::feed::{Change, RowEvent, Topic};
use crate::models::{DecisionStatus, Group, GroupMember, MemberRole, User, Vote};

#[derive(Debug, Deserialize)]
pub struct NewGroup {
    pub name: String,
    pub destination: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GroupSummary {
    #[serde(flatten)]
    pub group: Group,
    pub role: MemberRole,
    pub member_count: i64,
}

/// Group row plus the caller's role and the member count
#[derive(FromRow)]
struct GroupWithCount {
    #[sqlx(flatten)]
    group: Group,
    role: MemberRole,
    member_count: i64,
}

#[derive(Debug, Serialize, FromRow)]
pub struct MemberView {
    pub user_id: String,
    pub name: String,
    pub role: MemberRole,
    pub joined_at: String,
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn validate_group(form: &NewGroup) -> HashMap<String, String> {
    let mut errors = HashMap::new();

    if form.name.trim().is_empty() {
        errors.insert("name".to_string(), "Name is required".to_string());
    }

    if form.name.len() > 100 {
        errors.insert("name".to_string(), "Name must be under 100 characters".to_string());
    }

    let start = form.start_date.as_deref().filter(|d| !d.trim().is_empty());
    let end = form.end_date.as_deref().filter(|d| !d.trim().is_empty());
    let start_parsed = start.map(|d| (d, parse_date(d.trim())));
    let end_parsed = end.map(|d| (d, parse_date(d.trim())));

    if let Some((_, None)) = start_parsed {
        errors.insert("start_date".to_string(), "Start date must be YYYY-MM-DD".to_string());
    }
    if let Some((_, None)) = end_parsed {
        errors.insert("end_date".to_string(), "End date must be YYYY-MM-DD".to_string());
    }
    if let (Some((_, Some(s))), Some((_, Some(e)))) = (start_parsed, end_parsed) {
        if e < s {
            errors.insert("end_date".to_string(), "Trip cannot end before it starts".to_string());
        }
    }

    errors
}

/// Create a group and enroll the creator as its owner.
pub async fn create_group(state: &AppState, user: &User, form: NewGroup) -> Result<Group, AppError> {
    let errors = validate_group(&form);
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let group = Group::new(
        user.id.clone(),
        form.name.trim().to_string(),
        blank_to_none(form.destination),
        blank_to_none(form.start_date),
        blank_to_none(form.end_date),
    );
    let owner = GroupMember::new(group.id.clone(), user.id.clone(), MemberRole::Owner);

    let mut tx = state.db.begin().await?;
    sqlx::query(
        "INSERT INTO groups (id, name, destination, start_date, end_date, created_by, invite_code, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
    )
    .bind(&group.id)
    .bind(&group.name)
    .bind(&group.destination)
    .bind(&group.start_date)
    .bind(&group.end_date)
    .bind(&group.created_by)
    .bind(&group.invite_code)
    .bind(&group.created_at)
    .bind(&group.updated_at)
    .execute(&mut *tx)
    .await?;
    insert_member(&mut *tx, &owner).await?;
    tx.commit().await?;

    tracing::info!(group_id = %group.id, user_id = %user.id, "group created");
    Ok(group)
}

async fn insert_member<'e, E: SqliteExecutor<'e>>(
    executor: E,
    member: &GroupMember,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO group_members (group_id, user_id, role, joined_at) VALUES (?, ?, ?, ?)"
    )
    .bind(&member.group_id)
    .bind(&member.user_id)
    .bind(member.role)
    .bind(&member.joined_at)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn list_groups(db: &SqlitePool, user_id: &str) -> Result<Vec<GroupSummary>, AppError> {
    let rows: Vec<GroupWithCount> = sqlx::query_as(
        r#"
        SELECT g.*, me.role AS role,
            (SELECT COUNT(*) FROM group_members gm WHERE gm.group_id = g.id) AS member_count
        FROM groups g
        JOIN group_members me ON me.group_id = g.id AND me.user_id = ?
        ORDER BY g.name
        "#
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| GroupSummary {
            group: row.group,
            role: row.role,
            member_count: row.member_count,
        })
        .collect())
}

pub async fn get_group(db: &SqlitePool, group_id: &str) -> Result<Group, AppError> {
    sqlx::query_as("SELECT * FROM groups WHERE id = ?")
        .bind(group_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound)
}

/// The caller's role in the group. Unknown groups are `NotFound`, groups the
/// caller does not belong to are `Forbidden`.
pub async fn require_member<'e, E: SqliteExecutor<'e>>(
    executor: E,
    group_id: &str,
    user_id: &str,
) -> Result<MemberRole, AppError> {
    let row: Option<(Option<MemberRole>,)> = sqlx::query_as(
        r#"
        SELECT gm.role FROM groups g
        LEFT JOIN group_members gm ON gm.group_id = g.id AND gm.user_id = ?
        WHERE g.id = ?
        "#
    )
    .bind(user_id)
    .bind(group_id)
    .fetch_optional(executor)
    .await?;

    match row {
        None => Err(AppError::NotFound),
        Some((None,)) => Err(AppError::Forbidden),
        Some((Some(role),)) => Ok(role),
    }
}

/// Current member count. Always read at evaluation time: the majority bar
/// follows the group as it is now, not as it was when a decision opened.
pub async fn member_count<'e, E: SqliteExecutor<'e>>(executor: E, group_id: &str) -> Result<u64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM group_members WHERE group_id = ?")
        .bind(group_id)
        .fetch_one(executor)
        .await?;
    Ok(u64::try_from(count).unwrap_or(0))
}

pub async fn list_members(db: &SqlitePool, group_id: &str) -> Result<Vec<MemberView>, AppError> {
    let members = sqlx::query_as(
        r#"
        SELECT gm.user_id, u.name, gm.role, gm.joined_at
        FROM group_members gm
        JOIN users u ON u.id = gm.user_id
        WHERE gm.group_id = ?
        ORDER BY gm.joined_at, u.name
        "#
    )
    .bind(group_id)
    .fetch_all(db)
    .await?;
    Ok(members)
}

pub async fn join_group(state: &AppState, user: &User, invite_code: &str) -> Result<Group, AppError> {
    let group: Group = sqlx::query_as("SELECT * FROM groups WHERE invite_code = ?")
        .bind(invite_code.trim())
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound)?;

    let member = GroupMember::new(group.id.clone(), user.id.clone(), MemberRole::Member);
    if insert_member(&state.db, &member).await? {
        tracing::info!(group_id = %group.id, user_id = %user.id, "member joined");
    }
    Ok(group)
}

/// Remove the caller from the group.
///
/// Their ballots on still-open decisions go with them, and every open decision
/// is re-resolved since the majority bar may have dropped.
pub async fn leave_group(state: &AppState, user: &User, group_id: &str) -> Result<(), AppError> {
    let role = require_member(&state.db, group_id, &user.id).await?;
    if role == MemberRole::Owner {
        return Err(AppError::Conflict("The owner cannot leave the group".to_string()));
    }

    let mut tx = db::begin_write(&state.db).await?;
    let retracted: Vec<Vote> = sqlx::query_as(
        r#"
        SELECT v.* FROM decision_votes v
        JOIN decisions d ON d.id = v.decision_id
        WHERE d.group_id = ? AND d.status = ? AND v.user_id = ?
        "#
    )
    .bind(group_id)
    .bind(DecisionStatus::Open)
    .bind(&user.id)
    .fetch_all(&mut *tx)
    .await?;

    for vote in &retracted {
        sqlx::query("DELETE FROM decision_votes WHERE id = ?")
            .bind(&vote.id)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query("DELETE FROM group_members WHERE group_id = ? AND user_id = ?")
        .bind(group_id)
        .bind(&user.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    for vote in retracted {
        let topic = Topic::Decision(vote.decision_id.clone());
        state.feed.publish(&topic, Change::DecisionVotes(RowEvent::delete(vote)));
    }
    tracing::info!(group_id, user_id = %user.id, "member left");

    let open: Vec<(String,)> = sqlx::query_as("SELECT id FROM decisions WHERE group_id = ? AND status = ?")
        .bind(group_id)
        .bind(DecisionStatus::Open)
        .fetch_all(&state.db)
        .await?;
    // The leaver is no longer a member, so closures they trigger are
    // credited to the owner.
    let group = get_group(&state.db, group_id).await?;
    for (decision_id,) in open {
        if let Err(e) = decisions::resolve(state, &decision_id, &group.created_by).await {
            tracing::error!(%decision_id, "re-resolving after member left failed: {e}");
        }
    }

    Ok(())
}
