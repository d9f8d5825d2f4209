//! Server-side code for the call-center core
//!
//! This module contains all backend functionality:
//! - Storage (PostgreSQL via sqlx, or in-memory)
//! - Provider registry and VoIP adapters
//! - Session orchestration and webhook ingest
//! - Tenant-scoped WebSocket hub
//! - AI query routing
//! - Authentication (JWT) and API routes

pub mod ai;
pub mod auth;
pub mod calls;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod hub;
pub mod registry;
pub mod voip;

mod ai_api;
mod events_api;
mod providers_api;
mod sessions_api;
mod ws_api;


use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use axum::http::Method;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::models::CreateProviderRequest;
use config::Config;
use db::Stores;
use error::CoreError;

/// Application state shared across all routes
pub struct AppState {
    pub config: Config,
    pub stores: Stores,
    pub registry: Arc<registry::ProviderRegistry>,
    pub calls: Arc<calls::SessionOrchestrator>,
    pub hub: Arc<hub::Hub>,
    pub ai: Arc<ai::AiOrchestrator>,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the components over `stores`. Starts the hub coordinator, so
    /// this must run inside a Tokio runtime.
    pub async fn new(config: Config, stores: Stores, shutdown: CancellationToken) -> Arc<Self> {
        let http = reqwest::Client::new();
        let hub = hub::Hub::start(config.hub.clone(), shutdown.clone());
        let registry = Arc::new(registry::ProviderRegistry::new(
            stores.providers.clone(),
            config.allow_unsigned_webhooks,
        ));
        let calls = Arc::new(calls::SessionOrchestrator::new(
            stores.sessions.clone(),
            registry.clone(),
            hub.clone(),
            http.clone(),
            shutdown.clone(),
        ));

        let ai = Arc::new(ai::AiOrchestrator::new(
            stores.ai_usage.clone(),
            config.ai_cache_size,
            config.ai_cache_ttl,
        ));
        match &config.anthropic {
            Some(anthropic) => {
                let claude = ai::ClaudeProvider::new(anthropic, http);
                ai.register_provider(ai::claude::PROVIDER_NAME, Arc::new(claude))
                    .await;
            }
            None => tracing::info!("ANTHROPIC_API_KEY not set, no AI provider registered"),
        }

        Arc::new(Self {
            config,
            stores,
            registry,
            calls,
            hub,
            ai,
            shutdown,
        })
    }
}

/// Create the Axum router with all API routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let api = Router::new()
        // Call sessions
        .route("/sessions", get(sessions_api::list_sessions).post(sessions_api::initiate_session))
        .route("/sessions/stats", get(sessions_api::session_stats))
        .route("/sessions/{id}", get(sessions_api::get_session))
        .route("/sessions/{id}/status", get(sessions_api::provider_status))
        .route("/sessions/{id}/transfer", post(sessions_api::transfer_session))
        .route("/sessions/{id}/end", post(sessions_api::end_session))
        .route("/sessions/{id}/artifacts", post(sessions_api::attach_artifacts))

        // Providers and webhooks
        .route("/providers", get(providers_api::list_providers).post(providers_api::create_provider))
        .route("/providers/{id}", get(providers_api::get_provider))
        .route("/providers/{tenant}/webhooks/{provider_id}", post(providers_api::ingest_webhook))
        .route("/webhook-logs", get(providers_api::list_webhook_logs))

        // AI
        .route("/ai/query", post(ai_api::query))
        .route("/ai/providers", get(ai_api::provider_stats))
        .route("/ai/usage", get(ai_api::tenant_usage))

        // Live events
        .route("/events", post(events_api::publish_event))
        .route("/ws/stats", get(ws_api::ws_stats))
        .layer(middleware::from_fn_with_state(state.clone(), enforce_deadline));

    Router::new()
        .route("/health", get(health_check))
        // Long-lived; kept outside the request deadline
        .route("/ws", get(ws_api::ws_handler))
        .merge(api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Health check
async fn health_check() -> &'static str {
    "OK"
}

/// Outer per-request deadline; expiry answers 504.
async fn enforce_deadline(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let deadline = state.config.request_timeout;
    match tokio::time::timeout(deadline, next.run(req)).await {
        Ok(response) => response,
        Err(_) => CoreError::Timeout(format!("request exceeded {}s", deadline.as_secs()))
            .into_response(),
    }
}

/// Register providers listed in a JSON file. Each entry names its tenant.
async fn seed_providers(state: &AppState, path: &str) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path).await?;
    let entries: Vec<CreateProviderRequest> = serde_json::from_str(&raw)?;

    for entry in entries {
        let Some(tenant_id) = entry.tenant_id.clone().filter(|t| !t.is_empty()) else {
            tracing::warn!("Skipping provider '{}' in {}: no tenant_id", entry.name, path);
            continue;
        };
        let name = entry.name.clone();
        if let Err(e) = state
            .registry
            .register(entry.into_provider(&tenant_id, "bootstrap"))
            .await
        {
            tracing::error!(tenant_id = %tenant_id, "Failed to seed provider '{}': {}", name, e);
        }
    }
    Ok(())
}

async fn open_stores(config: &Config) -> anyhow::Result<Stores> {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, using the in-memory store; nothing will persist");
        return Ok(Stores::from_backend(Arc::new(db::memory::MemoryStore::new())));
    };

    let pool = db::init_pool(database_url, config.database_max_connections).await?;

    // Run migrations (non-fatal if already applied)
    if let Err(e) = db::run_migrations(&pool).await {
        tracing::warn!("Migration warning (may be already applied): {}", e);
    }

    Ok(Stores::from_backend(Arc::new(db::PgStore::new(pool))))
}

/// Initialize and start the server
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let stores = open_stores(&config).await?;
    let shutdown = CancellationToken::new();
    let state = AppState::new(config, stores, shutdown.clone()).await;

    if let Some(path) = state.config.providers_file.clone() {
        if let Err(e) = seed_providers(&state, &path).await {
            tracing::error!("Could not load providers from {}: {}", path, e);
        }
    }

    let addr = state.config.bind_addr();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
