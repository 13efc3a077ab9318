pub mod auth;
pub mod challenges;
pub mod decisions;
pub mod expenses;
pub mod groups;
pub mod realtime;
