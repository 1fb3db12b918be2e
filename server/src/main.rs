//! Tideline Server binary.

use std::sync::Arc;
use tideline_server::{AppState, Config, MemoryRepository, PgRepository, Repository};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tideline_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(node_id = %config.node_id, "Starting Tideline Server on {}", config.address());

    let repository: Arc<dyn Repository> = match &config.database_url {
        Some(url) => {
            let repo = PgRepository::connect(url).await?;
            tracing::info!("Running database migrations...");
            repo.run_migrations().await?;
            Arc::new(repo)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, documents are kept in memory only");
            Arc::new(MemoryRepository::new())
        }
    };

    let addr = config.address();
    let state = AppState::new(repository, config);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    tideline_server::serve(listener, state).await?;

    Ok(())
}
