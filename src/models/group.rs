use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub destination: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub created_by: String,
    pub invite_code: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Group {
    pub fn new(
        created_by: String,
        name: String,
        destination: Option<String>,
        start_date: Option<String>,
        end_date: Option<String>,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            destination,
            start_date,
            end_date,
            created_by,
            invite_code: Uuid::new_v4().to_string(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GroupMember {
    pub group_id: String,
    pub user_id: String,
    pub role: MemberRole,
    pub joined_at: String,
}

impl GroupMember {
    pub fn new(group_id: String, user_id: String, role: MemberRole) -> Self {
        Self {
            group_id,
            user_id,
            role,
            joined_at: Utc::now().to_rfc3339(),
        }
    }
}
