use anyhow::Result;
use fitness_scheduler::api::{create_routes, AppState};
use fitness_scheduler::config::{run_migrations, AppConfig, DatabaseConfig, DatabaseSeeder};
use fitness_scheduler::services::NotificationScheduler;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("Starting fitness-scheduler in {} mode", config.environment);
    config.log_integrations();

    let db = DatabaseConfig::from_env()?.create_pool().await?;
    run_migrations(&db).await?;
    info!("Database migrations applied");

    let state = AppState::new(db.clone(), config.clone())?;

    if config.seed_demo_data {
        DatabaseSeeder::new(db.clone(), state.auth.clone()).seed_all().await?;
    }

    let scheduler = if config.enable_scheduler {
        Some(NotificationScheduler::start(state.jobs.clone()).await?)
    } else {
        info!("In-process scheduler disabled; use the /api/cron endpoints");
        None
    };

    let app = create_routes(state);

    let listener = TcpListener::bind(config.server_address()).await?;
    info!("Fitness scheduler listening on http://{}", config.server_address());
    info!("Health check available at http://{}/health", config.server_address());

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    db.close().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
