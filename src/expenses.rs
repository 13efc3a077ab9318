use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{SqliteExecutor, SqlitePool};
use std::collections::HashMap;

use crate::AppState;
use crate::db;
use crate::error::AppError;
use crate::feed::{Change, RowEvent, Topic};
use crate::groups;
use crate::models::{Budget, Expense, User};
use crate::reducer::ExpenseLedger;

/// Largest accepted amount, in major units.
const MAX_AMOUNT: f64 = 1_000_000_000.0;

#[derive(Debug, Deserialize)]
pub struct ExpenseForm {
    #[serde(default)]
    pub item: String,
    /// A number or a numeric string; anything else is rejected.
    #[serde(default)]
    pub amount: Value,
    pub occurred_on: Option<String>,
    pub paid_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BudgetForm {
    #[serde(default)]
    pub amount: Value,
}

#[derive(Debug, Serialize)]
pub struct BudgetSummary {
    pub budget: Option<Budget>,
    pub total_spent_cents: i64,
    pub remaining_cents: Option<i64>,
}

struct ValidExpense {
    item: String,
    amount_cents: i64,
    occurred_on: String,
    paid_by: String,
}

/// Parse a user-supplied money amount into integer cents.
pub fn parse_amount(value: &Value) -> Result<i64, String> {
    let amount = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| "Amount must be a number".to_string())?;

    if !amount.is_finite() || amount <= 0.0 {
        return Err("Amount must be a positive number".to_string());
    }
    if amount > MAX_AMOUNT {
        return Err("Amount is too large".to_string());
    }

    let cents = (amount * 100.0).round() as i64;
    if cents <= 0 {
        return Err("Amount must be at least 0.01".to_string());
    }
    Ok(cents)
}

fn validate_expense(form: ExpenseForm, user: &User) -> Result<ValidExpense, AppError> {
    let mut errors = HashMap::new();

    let item = form.item.trim().to_string();
    if item.is_empty() {
        errors.insert("item".to_string(), "Item is required".to_string());
    }
    if item.len() > 200 {
        errors.insert("item".to_string(), "Item must be under 200 characters".to_string());
    }

    let amount_cents = parse_amount(&form.amount)
        .map_err(|e| errors.insert("amount".to_string(), e))
        .unwrap_or(0);

    let occurred_on = match form.occurred_on.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        Some(date) => {
            if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
                errors.insert("occurred_on".to_string(), "Date must be YYYY-MM-DD".to_string());
            }
            date.to_string()
        }
        None => Utc::now().date_naive().to_string(),
    };

    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let paid_by = form
        .paid_by
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| user.name.clone());

    Ok(ValidExpense { item, amount_cents, occurred_on, paid_by })
}

async fn get_expense<'e, E: SqliteExecutor<'e>>(executor: E, expense_id: &str) -> Result<Expense, AppError> {
    sqlx::query_as("SELECT * FROM expenses WHERE id = ?")
        .bind(expense_id)
        .fetch_optional(executor)
        .await?
        .ok_or(AppError::NotFound)
}

/// Record a new line item. Not idempotent: two identical submissions are two
/// expenses.
pub async fn add_expense(
    state: &AppState,
    user: &User,
    group_id: &str,
    form: ExpenseForm,
) -> Result<Expense, AppError> {
    groups::require_member(&state.db, group_id, &user.id).await?;
    let valid = validate_expense(form, user)?;

    let expense = Expense::new(
        group_id.to_string(),
        valid.item,
        valid.amount_cents,
        valid.occurred_on,
        valid.paid_by,
        user.id.clone(),
    );

    sqlx::query(
        "INSERT INTO expenses (id, group_id, item, amount_cents, occurred_on, paid_by, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
    )
    .bind(&expense.id)
    .bind(&expense.group_id)
    .bind(&expense.item)
    .bind(expense.amount_cents)
    .bind(&expense.occurred_on)
    .bind(&expense.paid_by)
    .bind(&expense.created_by)
    .bind(&expense.created_at)
    .bind(&expense.updated_at)
    .execute(&state.db)
    .await?;

    state.feed.publish(
        &Topic::GroupExpenses(group_id.to_string()),
        Change::Expenses(RowEvent::insert(expense.clone())),
    );
    Ok(expense)
}

/// Edit an expense. The row is re-read under the write lock so the published
/// `old` is the version this update replaced.
pub async fn update_expense(
    state: &AppState,
    user: &User,
    expense_id: &str,
    form: ExpenseForm,
) -> Result<Expense, AppError> {
    let mut tx = db::begin_write(&state.db).await?;
    let existing = get_expense(&mut *tx, expense_id).await?;
    groups::require_member(&mut *tx, &existing.group_id, &user.id).await?;
    let valid = validate_expense(form, user)?;

    let updated = Expense {
        item: valid.item,
        amount_cents: valid.amount_cents,
        occurred_on: valid.occurred_on,
        paid_by: valid.paid_by,
        updated_at: Utc::now().to_rfc3339(),
        ..existing.clone()
    };

    sqlx::query(
        "UPDATE expenses SET item = ?, amount_cents = ?, occurred_on = ?, paid_by = ?, updated_at = ? WHERE id = ?"
    )
    .bind(&updated.item)
    .bind(updated.amount_cents)
    .bind(&updated.occurred_on)
    .bind(&updated.paid_by)
    .bind(&updated.updated_at)
    .bind(expense_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    state.feed.publish(
        &Topic::GroupExpenses(updated.group_id.clone()),
        Change::Expenses(RowEvent::update(existing, updated.clone())),
    );
    Ok(updated)
}

pub async fn delete_expense(state: &AppState, user: &User, expense_id: &str) -> Result<(), AppError> {
    let mut tx = db::begin_write(&state.db).await?;
    let existing = get_expense(&mut *tx, expense_id).await?;
    groups::require_member(&mut *tx, &existing.group_id, &user.id).await?;

    sqlx::query("DELETE FROM expenses WHERE id = ?")
        .bind(expense_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    state.feed.publish(
        &Topic::GroupExpenses(existing.group_id.clone()),
        Change::Expenses(RowEvent::delete(existing)),
    );
    Ok(())
}

/// Ground truth for a group's ledger, newest first.
pub async fn fetch_expense_snapshot(db: &SqlitePool, group_id: &str) -> Result<ExpenseLedger, AppError> {
    let expenses: Vec<Expense> = sqlx::query_as(
        "SELECT * FROM expenses WHERE group_id = ? ORDER BY created_at DESC, rowid DESC"
    )
    .bind(group_id)
    .fetch_all(db)
    .await?;
    Ok(ExpenseLedger::from_expenses(expenses))
}

/// Set the group's budget. There is at most one per group.
pub async fn upsert_budget(
    state: &AppState,
    user: &User,
    group_id: &str,
    form: BudgetForm,
) -> Result<Budget, AppError> {
    groups::require_member(&state.db, group_id, &user.id).await?;
    let amount_cents = parse_amount(&form.amount).map_err(|e| AppError::invalid("amount", &e))?;

    let budget = Budget {
        group_id: group_id.to_string(),
        amount_cents,
        updated_by: user.id.clone(),
        updated_at: Utc::now().to_rfc3339(),
    };

    sqlx::query(
        r#"
        INSERT INTO budgets (group_id, amount_cents, updated_by, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (group_id)
        DO UPDATE SET amount_cents = excluded.amount_cents, updated_by = excluded.updated_by, updated_at = excluded.updated_at
        "#
    )
    .bind(&budget.group_id)
    .bind(budget.amount_cents)
    .bind(&budget.updated_by)
    .bind(&budget.updated_at)
    .execute(&state.db)
    .await?;

    Ok(budget)
}

pub async fn budget_summary(db: &SqlitePool, group_id: &str) -> Result<BudgetSummary, AppError> {
    let budget: Option<Budget> = sqlx::query_as("SELECT * FROM budgets WHERE group_id = ?")
        .bind(group_id)
        .fetch_optional(db)
        .await?;
    let (total_spent_cents,): (i64,) =
        sqlx::query_as("SELECT COALESCE(SUM(amount_cents), 0) FROM expenses WHERE group_id = ?")
            .bind(group_id)
            .fetch_one(db)
            .await?;

    let remaining_cents = budget.as_ref().map(|b| b.amount_cents - total_spent_cents);
    Ok(BudgetSummary { budget, total_spent_cents, remaining_cents })
}
