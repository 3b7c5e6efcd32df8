// Main entry point for the crawl orchestration API server

use std::sync::Arc;

use anyhow::{Context, Result};
use crawl_core::{
    domains::crawlers::register_default_crawlers,
    kernel::{
        tasks::{CrawlerRegistry, InMemoryTaskStore, PostgresTaskStore, TaskStore},
        BrowserPool, ServerDeps,
    },
    server::{build_app, AppState},
    Config,
};
use fetch_client::{FetchClient, FetchConfig};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,crawl_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting crawl orchestration API");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    let store: Arc<dyn TaskStore> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Database connected");

            tracing::info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;
            tracing::info!("Migrations complete");

            Arc::new(PostgresTaskStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, tasks are kept in memory and lost on restart");
            Arc::new(InMemoryTaskStore::new())
        }
    };

    // Crawler strategies and their shared clients
    let fetch = FetchClient::reqwest(FetchConfig::default().with_timeout(config.fetch_timeout))
        .context("Failed to build HTTP client")?;
    let browsers = BrowserPool::new(config.browser_config());
    let mut registry = CrawlerRegistry::new();
    register_default_crawlers(&mut registry, &fetch, &browsers);
    tracing::info!(
        crawlers = ?registry.list().iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
        "Crawlers registered"
    );

    let deps = ServerDeps::new(store, Arc::new(registry), config.kernel_settings());

    // Background recycler for tasks stuck in `running`
    let shutdown = CancellationToken::new();
    let recycler = deps.recycler().start(shutdown.clone());

    let app = build_app(AppState::new(deps), &config.allowed_origins);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shutting down");
    shutdown.cancel();
    browsers.close();
    recycler.await.context("Recycler task panicked")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
