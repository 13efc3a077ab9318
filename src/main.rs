use clap::Parser;
use isle::cli::{self, Cli, Command};
use isle::{AppState, build_app, db};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.config;
    let pool = db::init_pool(&config.database_url).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let state = AppState::new(pool, config.feed());
            let app = build_app(state, config.secure_cookies).await?;

            let listener = TcpListener::bind(config.bind).await?;
            tracing::info!("listening on {}", config.bind);
            axum::serve(listener, app).await?;
        }
        Command::CreateUser { name, email } => {
            let user = cli::create_user(&pool, &name, email.as_deref()).await?;
            println!("Created user:");
            println!("  ID: {}", user.id);
            println!("  Name: {}", user.name);
            println!("  Invite Code: {}", user.invite_code);
        }
    }

    Ok(())
}
