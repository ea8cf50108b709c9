use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use ledger_rs::config::{Config, EngineOptions};
use ledger_rs::monitor::ProcessorRegistry;
use ledger_rs::routes::{router, AppState};
use ledger_rs::{db, start_instance_monitor, start_link_relay};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("Starting ledger service...");

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration from environment");

    tracing::info!(
        host = %config.host,
        port = config.port,
        schema_prefix = %config.schema_prefix,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        max_retries = config.max_retries,
        "Configuration loaded"
    );

    // Database connection
    tracing::info!("Connecting to database...");
    db::ensure_schema(&config.database_url, &config.schema_prefix)
        .await
        .expect("Failed to create schema");
    let pool = db::init_pool(&config.database_url, &config.schema_prefix)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    tracing::info!("Running migrations...");
    sqlx::migrate!("./db/migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    // Shutdown signal observed at every idle point
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start the instance monitor and the link fan-out relay
    let opts = EngineOptions::from(&config);
    let registry = Arc::new(ProcessorRegistry::new());
    let monitor_handle =
        start_instance_monitor(pool.clone(), opts, registry.clone(), shutdown_rx.clone());
    let relay_handle = start_link_relay(pool.clone(), config.poll_interval, shutdown_rx.clone());

    // Build the application router
    let state = AppState {
        pool: pool.clone(),
        config: Arc::new(config.clone()),
        registry,
    };
    let app = router(state).layer(
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    );

    // Bind to the configured address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Ledger service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    // Serve until ctrl-c, then drain background tasks
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server failed to start");

    let _ = shutdown_tx.send(true);
    let _ = monitor_handle.await;
    let _ = relay_handle.await;

    tracing::info!("Ledger service stopped");
}
