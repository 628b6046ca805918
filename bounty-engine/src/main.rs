mod blockchain;
mod config;
mod error;
mod handlers;
mod models;
mod network;
mod services;
mod webhook;
mod workers;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::config::Config;
use crate::models::PgWalletDirectory;
use crate::network::NetworkRegistry;
use crate::services::{FeeLedger, FlightGuard, Notifier, PayoutExecutor};
use crate::webhook::WebhookProcessor;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Starting Bounty Engine...");

    let config = Config::from_env()?;
    info!(
        environment = %config.environment,
        networks = config.networks.len(),
        "configuration loaded"
    );

    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    info!("database connection pool established");

    sqlx::migrate!("./migrations").run(&db_pool).await?;
    info!("database migrations completed");

    let registry = Arc::new(NetworkRegistry::from_settings(&config.networks)?);
    registry.verify_chain_ids().await;

    let notifier = Notifier::start(config.notifications.clone());
    let flights = FlightGuard::new();
    let wallets = Arc::new(PgWalletDirectory::new(db_pool.clone()));

    let executor = Arc::new(PayoutExecutor::new(
        db_pool.clone(),
        registry.clone(),
        flights.clone(),
        wallets,
        notifier.clone(),
        config.environment.clone(),
    ));

    let fees = Arc::new(FeeLedger::new(
        registry.clone(),
        flights.clone(),
        config.reconciler.fanout_limit,
    ));

    let processor = Arc::new(WebhookProcessor::new(
        db_pool.clone(),
        executor.clone(),
        notifier.clone(),
    ));

    if config.reconciler.background_enabled {
        let pool = db_pool.clone();
        let registry = registry.clone();
        let reconciler_config = config.reconciler.clone();
        tokio::spawn(async move {
            if let Err(e) = workers::reconciliation::start(pool, registry, reconciler_config).await
            {
                warn!("reconciliation worker error: {}", e);
            }
        });
    }

    let app_state = Arc::new(AppState {
        config: config.clone(),
        db_pool,
        registry,
        executor,
        fees,
        processor,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handlers::health::health_check))
        // Bounty lifecycle
        .route("/api/v1/bounties", post(handlers::bounty::create_bounty))
        .route("/api/v1/bounties/:bounty_id", get(handlers::bounty::bounty_detail))
        .route(
            "/api/v1/bounties/:bounty_id/allowlist",
            post(handlers::bounty::add_allowlist_entry)
                .delete(handlers::bounty::remove_allowlist_entry),
        )
        .route("/api/v1/user/bounties", get(handlers::bounty::user_bounties))
        // Settlement
        .route("/api/v1/payouts/retry", post(handlers::payout::retry_payout))
        .route("/api/v1/refunds/request", post(handlers::refund::request_refund))
        // Admin fee ledger
        .route("/api/v1/admin/fees", get(handlers::admin::get_fees))
        .route("/api/v1/admin/fees/withdraw", post(handlers::admin::withdraw_fees))
        // Inbound webhooks
        .route("/webhooks/github", post(handlers::webhook::github_webhook))
        .route("/webhooks/marketplace", post(handlers::webhook::marketplace_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Bounty Engine listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub struct AppState {
    pub config: Config,
    pub db_pool: sqlx::PgPool,
    pub registry: Arc<NetworkRegistry>,
    pub executor: Arc<PayoutExecutor>,
    pub fees: Arc<FeeLedger>,
    pub processor: Arc<WebhookProcessor>,
}
