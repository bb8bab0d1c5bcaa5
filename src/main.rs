use sqlx::migrate::Migrator;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::prelude::*;

use pixgate::config::Config;
use pixgate::{create_app, db, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Setup logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Database pool
    let pool = db::create_pool(&config).await?;

    // Run migrations
    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("Database migrations completed");

    let state = AppState::new(pool, config.clone())?;

    // Sweeper: drives the durable delivery queue. Retry schedules live in
    // next_retry_at, so a restart picks up exactly where it left off.
    let sweeper = state.dispatcher.clone();
    let sweep_interval = Duration::from_secs(config.sweep_interval_secs);
    let sweep_batch = config.sweep_batch_size;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = sweeper.process_due(sweep_batch).await {
                tracing::error!(error = %e, "sweeper pass failed");
            }
        }
    });

    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
