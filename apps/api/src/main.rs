mod config;
mod db;
mod errors;
mod evaluation;
mod extraction;
mod llm_client;
mod routes;
mod state;
mod storage;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::{InMemorySessionStore, PgSessionStore, SessionStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing credentials or bad numbers)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting evaluator v{}", env!("CARGO_PKG_VERSION"));

    // Storage: PostgreSQL when configured, otherwise process memory
    let store: Arc<dyn SessionStore> = match &config.database_url {
        Some(url) => {
            let store = PgSessionStore::new(create_pool(url).await?);
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            info!("DATABASE_URL not set; sessions are kept in memory");
            Arc::new(InMemorySessionStore::new())
        }
    };

    // Initialize LLM client
    let llm = LlmClient::new(config.llm.clone(), config.qualification)?;
    info!(
        "LLM client initialized (model: {}, credentials: {})",
        llm.model(),
        config.credentials.len()
    );

    let port = config.port;
    let state = AppState::build(config, Arc::new(llm), store);

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
