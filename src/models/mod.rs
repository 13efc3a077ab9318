pub mod user;
pub mod group;
pub mod decision;
pub mod expense;
pub mod challenge;

pub use user::User;
pub use group::{Group, GroupMember, MemberRole};
pub use decision::{Activity, Decision, DecisionOption, DecisionStatus, Proposal, Vote, NO_LABEL, YES_LABEL};
pub use expense::{Budget, Expense};
pub use challenge::{ChallengeMember, ChallengeStatus, GroupChallenge};
