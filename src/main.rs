use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod auth;
mod cache;
mod codegen;
mod config;
mod error;
mod handlers;
mod models;
mod services;
mod store;

use auth::TokenVerifier;
use cache::LinkCache;
use services::{allocation::LinkAllocator, analytics::Analytics, redirect::RedirectPipeline};
use store::{ClickStore, LinkStore, MemoryStore, SqliteStore};

// ── Shared application state ───────────────────────────────────────────────

pub struct AppState {
    pub config: config::AppConfig,
    pub links: Arc<dyn LinkStore>,
    pub allocator: LinkAllocator,
    pub redirects: RedirectPipeline,
    pub analytics: Analytics,
    pub tokens: TokenVerifier,
}

impl AppState {
    /// Wire the services around one backend that serves both collections.
    pub fn new<S>(config: config::AppConfig, store: Arc<S>, cache: LinkCache) -> Self
    where
        S: LinkStore + ClickStore,
    {
        let links: Arc<dyn LinkStore> = store.clone();
        let clicks: Arc<dyn ClickStore> = store;

        Self {
            allocator: LinkAllocator::new(
                Arc::clone(&links),
                cache.clone(),
                config.code_length,
                config.max_allocation_attempts,
            ),
            redirects: RedirectPipeline::new(
                Arc::clone(&links),
                Arc::clone(&clicks),
                cache,
                config.record_timeout,
            ),
            analytics: Analytics::new(clicks),
            tokens: TokenVerifier::new(config.jwt_secret.as_deref()),
            links,
            config,
        }
    }
}

// ── Router ─────────────────────────────────────────────────────────────────

pub fn app(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route(
            "/links",
            post(handlers::links::create_link).get(handlers::links::list_links),
        )
        .route("/links/:code", get(handlers::links::get_link))
        .route("/links/:code/stats", get(handlers::links::link_stats));

    Router::new()
        .route("/", get(handlers::links::index))
        .route("/health", get(|| async { axum::http::StatusCode::OK }))
        .nest("/api", api)
        .route("/r/:code", get(handlers::redirect::redirect))
        .with_state(state)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

// ── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (ignore error if file is absent; env vars may already be set)
    dotenvy::dotenv().ok();

    // Initialise structured logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "linkbrief=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::AppConfig::from_env()?;
    tracing::info!("Starting linkbrief on {}:{}", config.host, config.port);
    tracing::info!("Base URL: {}", config.base_url);

    let cache = LinkCache::new();
    let state = if config.uses_memory_store() {
        tracing::warn!("Using the in-memory store; links will not survive a restart");
        AppState::new(config, Arc::new(MemoryStore::new()), cache)
    } else {
        let store = Arc::new(SqliteStore::connect(&config.database_url).await?);
        cache.warm(store.as_ref()).await?;
        AppState::new(config, store, cache)
    };

    let bind_addr = format!("{}:{}", state.config.host, state.config.port);
    let app = app(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
