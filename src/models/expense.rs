use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A line item in a group's shared ledger. Amounts are integer cents so
/// running totals stay exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Expense {
    pub id: String,
    pub group_id: String,
    pub item: String,
    pub amount_cents: i64,
    pub occurred_on: String,
    pub paid_by: String,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Expense {
    pub fn new(
        group_id: String,
        item: String,
        amount_cents: i64,
        occurred_on: String,
        paid_by: String,
        created_by: String,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            group_id,
            item,
            amount_cents,
            occurred_on,
            paid_by,
            created_by,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Budget {
    pub group_id: String,
    pub amount_cents: i64,
    pub updated_by: String,
    pub updated_at: String,
}
