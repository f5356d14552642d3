use alliance_watch::config::AppConfig;
use alliance_watch::services::ServiceContainer;
use alliance_watch::{database, logging};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    // Initialize logging; the guard flushes the file writer on exit
    let (logging_config, _log_guard) = logging::init_logging(&config.log_dir)?;
    let shutdown = CancellationToken::new();
    logging_config.start_retention_cleanup(shutdown.child_token());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        log_filter = %logging_config.get_filter(),
        "alliance-watch starting"
    );

    // Initialize database
    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let container = ServiceContainer::new(pool, config).await?;
    container.start().await?;
    info!("alliance-watch initialized successfully");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.cancel();
    container.shutdown().await;
    Ok(())
}
