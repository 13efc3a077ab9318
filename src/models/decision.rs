use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const YES_LABEL: &str = "Yes";
pub const NO_LABEL: &str = "No";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    #[default]
    Open,
    Approved,
    Declined,
}

impl DecisionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DecisionStatus::Open)
    }

    /// Status only ever moves out of `Open`, and only once.
    pub fn can_transition_to(self, next: DecisionStatus) -> bool {
        self == DecisionStatus::Open && next.is_terminal()
    }
}

impl std::fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionStatus::Open => write!(f, "open"),
            DecisionStatus::Approved => write!(f, "approved"),
            DecisionStatus::Declined => write!(f, "declined"),
        }
    }
}

/// The activity a decision proposes. Becomes an [`Activity`] on approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Proposal {
    pub title: String,
    pub starts_at: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Decision {
    pub id: String,
    pub group_id: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub proposal: Proposal,
    pub status: DecisionStatus,
    pub created_by: String,
    pub created_at: String,
    pub approved_option_id: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<String>,
}

impl Decision {
    pub fn new(group_id: String, created_by: String, proposal: Proposal) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            group_id,
            proposal,
            status: DecisionStatus::Open,
            created_by,
            created_at: Utc::now().to_rfc3339(),
            approved_option_id: None,
            approved_by: None,
            approved_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DecisionOption {
    pub id: String,
    pub decision_id: String,
    pub label: String,
    pub position: i64,
}

impl DecisionOption {
    pub fn new(decision_id: String, label: &str, position: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            decision_id,
            label: label.to_string(),
            position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Vote {
    pub id: String,
    pub decision_id: String,
    pub user_id: String,
    pub option_id: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Vote {
    pub fn new(decision_id: String, user_id: String, option_id: String) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            decision_id,
            user_id,
            option_id,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Activity {
    pub id: String,
    pub group_id: String,
    pub decision_id: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub proposal: Proposal,
    pub created_by: String,
    pub created_at: String,
}

impl Activity {
    pub fn from_decision(decision: &Decision, created_by: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            group_id: decision.group_id.clone(),
            decision_id: decision.id.clone(),
            proposal: decision.proposal.clone(),
            created_by,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}
