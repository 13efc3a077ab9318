use clap::{Parser, Subcommand};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::models::User;

#[derive(Parser)]
#[command(name = "isle")]
#[command(about = "Group trip planning service: decisions, expenses and challenges")]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Create a user and print their invite code
    CreateUser {
        /// Display name
        name: String,

        /// Contact email
        #[arg(long)]
        email: Option<String>,
    },
}

pub async fn create_user(pool: &SqlitePool, name: &str, email: Option<&str>) -> Result<User, sqlx::Error> {
    let user = User::new(name.trim().to_string(), email.map(str::to_string));

    sqlx::query(
        "INSERT INTO users (id, name, email, invite_code, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)"
    )
    .bind(&user.id)
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.invite_code)
    .bind(&user.created_at)
    .bind(&user.updated_at)
    .execute(pool)
    .await?;

    tracing::info!(user_id = %user.id, "user created");
    Ok(user)
}
