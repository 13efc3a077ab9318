use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Joined,
    Declined,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct GroupChallenge {
    pub id: String,
    pub group_id: String,
    pub title: String,
    pub description: Option<String>,
    pub duration_hours: i64,
    pub created_by: String,
    pub created_at: String,
}

impl GroupChallenge {
    pub fn new(
        group_id: String,
        created_by: String,
        title: String,
        description: Option<String>,
        duration_hours: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            group_id,
            title,
            description,
            duration_hours,
            created_by,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChallengeMember {
    pub challenge_id: String,
    pub user_id: String,
    pub status: ChallengeStatus,
    pub joined_at: String,
    pub expires_at: Option<String>,
}

impl ChallengeMember {
    pub fn joined(challenge: &GroupChallenge, user_id: String) -> Self {
        let now = Utc::now();
        Self {
            challenge_id: challenge.id.clone(),
            user_id,
            status: ChallengeStatus::Joined,
            joined_at: now.to_rfc3339(),
            expires_at: Some((now + Duration::hours(challenge.duration_hours)).to_rfc3339()),
        }
    }

    pub fn declined(challenge: &GroupChallenge, user_id: String) -> Self {
        Self {
            challenge_id: challenge.id.clone(),
            user_id,
            status: ChallengeStatus::Declined,
            joined_at: Utc::now().to_rfc3339(),
            expires_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn join_sets_expiry_from_duration() {
        let challenge = GroupChallenge::new("g".into(), "u".into(), "Sunrise hike".into(), None, 48);
        let member = ChallengeMember::joined(&challenge, "u2".into());
        let joined: DateTime<Utc> = member.joined_at.parse().unwrap();
        let expires: DateTime<Utc> = member.expires_at.as_deref().unwrap().parse().unwrap();
        assert_eq!(expires - joined, Duration::hours(48));
        assert_eq!(member.status, ChallengeStatus::Joined);
    }

    #[test]
    fn decline_has_no_expiry() {
        let challenge = GroupChallenge::new("g".into(), "u".into(), "Night swim".into(), None, 2);
        let member = ChallengeMember::declined(&challenge, "u2".into());
        assert_eq!(member.status, ChallengeStatus::Declined);
        assert!(member.expires_at.is_none());
    }
}
