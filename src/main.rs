mod ai;
mod api;
mod budget;
mod categories;
mod config;
mod error;
mod ingest;
mod merchant;
mod sessions;

use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ai::{AnalysisEngine, GroqProvider};
use api::AppState;
use config::Config;
use sessions::InMemorySessionStore;

const DEFAULT_LOG_FILTER: &str = "budget_chat=info,tower_http=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let mut config = Config::from_env().map_err(anyhow::Error::msg)?;

    // Usage: budget-chat [bind_address]
    let args: Vec<String> = std::env::args().collect();
    if let Some(addr) = args.get(1) {
        config.bind_address = addr.clone();
    }

    if config.uses_fallback_key() {
        warn!("GROQ_API_KEY is not set; chat requests will fail upstream until it is");
    }

    let provider = GroqProvider::new(config.groq_api_key.clone(), config.groq_model.clone())
        .with_endpoint(config.groq_endpoint.clone());
    let engine = AnalysisEngine::new(Arc::new(provider), config.llm_timeout);
    let store = InMemorySessionStore::new(config.session_ttl);

    info!(
        bind = %config.bind_address,
        model = %config.groq_model,
        max_upload_bytes = config.max_upload_bytes,
        session_ttl_secs = config.session_ttl.map(|d| d.as_secs()).unwrap_or(0),
        "starting budget chat server"
    );

    let bind_address = config.bind_address.clone();
    let state = AppState {
        store: Arc::new(store),
        engine,
        config: Arc::new(config),
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
