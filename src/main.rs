use anyhow::{Context, Result};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use mailbridge::api::{
    create_credential_router, create_oauth_router, create_subscription_router,
    create_token_router, create_webhook_router, ApiState,
};
use mailbridge::broker::TokenBroker;
use mailbridge::config::{load_config, MailbridgeConfig, Secrets};
use mailbridge::crypto::SecretCipher;
use mailbridge::oauth::{run_state_cleanup, FlowEngine, MemoryStateStore, StateStore};
use mailbridge::store::Database;
use mailbridge::subscription::SubscriptionManager;
use mailbridge::webhook::Ingestor;
use mailbridge::worker::{run_processor, EventProcessor};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailbridge=info".into()),
        )
        .init();

    info!("Mailbridge starting...");

    let config_path =
        std::env::var("MAILBRIDGE_CONFIG").unwrap_or_else(|_| "mailbridge.toml".to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        load_config(&config_path)
            .map_err(|e| anyhow::anyhow!("failed to load {}: {}", config_path, e))?
    } else {
        info!(path = %config_path, "No config file found, using defaults");
        MailbridgeConfig::default()
    };

    let secrets = Secrets::from_env().map_err(anyhow::Error::msg)?;
    if secrets.admin_token.is_none() {
        tracing::warn!("MAILBRIDGE_ADMIN_TOKEN not set; admin API is unauthenticated");
    }
    if secrets.service_secret.is_none() {
        tracing::warn!("MAILBRIDGE_SERVICE_SECRET not set; token vending is disabled");
    }

    let cipher = Arc::new(
        SecretCipher::from_key_material(&secrets.master_key)
            .context("Failed to initialize secret cipher")?,
    );

    let db = Arc::new(
        Database::open(&config.database.path).context("Failed to open database")?,
    );
    info!(path = %config.database.path, "Database ready");

    let state_store = MemoryStateStore::new(config.oauth.state_ttl_seconds);
    let states: Arc<dyn StateStore> = Arc::new(state_store.clone());

    let flow = Arc::new(FlowEngine::new(db.clone(), cipher.clone(), states));
    let broker = Arc::new(TokenBroker::new(db.clone(), cipher.clone()));
    let subscriptions = Arc::new(SubscriptionManager::new(db.clone(), broker.clone()));
    let ingestor = Arc::new(Ingestor::new(db.clone()));

    // Background tasks: OAuth state eviction and the event processor
    tokio::spawn(run_state_cleanup(
        state_store,
        config.oauth.state_cleanup_interval_seconds,
    ));

    let processor = Arc::new(EventProcessor::new(
        db.clone(),
        broker.clone(),
        config.worker.batch_size,
        config.worker.max_retries,
    ));
    tokio::spawn(run_processor(
        processor,
        config.worker.poll_interval_seconds,
    ));

    let api_state = Arc::new(ApiState {
        db,
        cipher,
        broker,
        flow,
        subscriptions,
        ingestor,
        admin_token: secrets.admin_token,
        service_secret: secrets.service_secret,
    });

    let router = create_credential_router(api_state.clone())
        .merge(create_oauth_router(api_state.clone()))
        .merge(create_subscription_router(api_state.clone()))
        .merge(create_token_router(api_state.clone()))
        .merge(create_webhook_router(api_state))
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind server port")?;
    info!(addr = %addr, "Mailbridge listening");

    axum::serve(listener, router)
        .await
        .context("Server error")?;

    Ok(())
}
