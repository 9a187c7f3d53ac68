//! purgeq server
//!
//! Receives object change webhooks, queues them durably and drains the queue
//! into batched CDN cache invalidations.

mod api;
mod config;
mod server;
mod shutdown;
mod state;
mod workers;

use clap::{Parser, ValueEnum};
use config::runtime::{CdnConfig, QueueBackend};
use config::{ConfigLoader, get_database_url};
use purgeq_core::config::ConfigStore;
use purgeq_core::invalidation::{CloudFrontClient, HttpPurgeClient, InvalidationClient};
use purgeq_core::queue::{MemoryQueue, MessageQueue, PgQueue};
use server::{build_router, run_server};
use shutdown::{spawn_config_reload_handler, spawn_shutdown_listener};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// purgeq - webhook-driven CDN cache invalidation
#[derive(Parser, Debug)]
#[command(name = "purgeq-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./purgeq-config.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", env = "PURGEQ_LOG_FORMAT")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(args.log_format);

    tracing::info!("Starting purgeq-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    let listen_addr = loaded_config.server.listen;
    tracing::info!("Configuration loaded from {:?}", args.config);

    // Queue
    let (queue, db_pool): (Arc<dyn MessageQueue>, Option<PgPool>) =
        match loaded_config.queue_backend {
            QueueBackend::Memory => {
                tracing::warn!("Using the in-memory queue; pending events are lost on restart");
                (Arc::new(MemoryQueue::new(loaded_config.queue)), None)
            }
            QueueBackend::Postgres => {
                let db_pool = connect_database(args.migrate).await?;
                (
                    Arc::new(PgQueue::new(db_pool.clone(), loaded_config.queue)),
                    Some(db_pool),
                )
            }
        };

    // CDN client
    let distribution_id = loaded_config.cdn.distribution_id().to_string();
    tracing::info!(
        provider = loaded_config.cdn.provider_name(),
        distribution_id = %distribution_id,
        "Configuring CDN client"
    );
    let client: Arc<dyn InvalidationClient> = match loaded_config.cdn {
        CdnConfig::CloudFront {
            request_timeout, ..
        } => Arc::new(CloudFrontClient::from_env(request_timeout).await),
        CdnConfig::Http {
            endpoint,
            api_token,
            request_timeout,
            ..
        } => Arc::new(HttpPurgeClient::new(endpoint, api_token, request_timeout)?),
    };

    let webhook_store = ConfigStore::new(loaded_config.webhook);
    let consumer_store = ConfigStore::new(loaded_config.consumer);

    let shutdown_tx = Arc::new(watch::channel(false).0);
    spawn_shutdown_listener(shutdown_tx.clone())?;
    let reload_handle = spawn_config_reload_handler(
        config_loader,
        webhook_store.clone(),
        consumer_store.clone(),
        shutdown_tx.subscribe(),
    )?;

    let consumers = workers::spawn_consumers(
        loaded_config.consumer.workers,
        queue.clone(),
        client,
        distribution_id,
        consumer_store,
        shutdown_tx.clone(),
    );

    let router = build_router(AppState::new(queue, webhook_store));
    let result = run_server(router, listen_addr, shutdown_tx.subscribe()).await;

    // The server may also stop on its own (bind failure); stop everything else.
    shutdown_tx.send_replace(true);
    if let Err(e) = consumers.await {
        tracing::error!("Consumer supervisor failed: {}", e);
    }
    if let Err(e) = reload_handle.await {
        tracing::error!("Config reload handler failed: {}", e);
    }

    if let Some(db_pool) = db_pool {
        tracing::info!("Closing database connections...");
        db_pool.close().await;
    }
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

async fn connect_database(migrate: bool) -> anyhow::Result<PgPool> {
    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    if migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    Ok(db_pool)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,tower_http=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}
