mod config;
mod models;
mod openai;
mod prompt;
mod routes;
mod sessions;
mod storage;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::openai::OpenAiClient;
use crate::routes::AppState;
use crate::sessions::SessionStore;
use crate::storage::ImageStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env().context("reading configuration")?;
    match config.require_api_key() {
        Ok(_) => tracing::info!("Using API key: {}", config.api_key_hint().unwrap_or_default()),
        Err(e) => {
            tracing::warn!("⚠️ {} Prompt composition still works; image calls will fail.", e)
        }
    }
    let store = ImageStore::new(&config.output_dir, config.save_images);
    if config.save_images {
        tracing::info!("💾 Saving images to {}", store.dir().display());
    }

    let state = AppState {
        sessions: Arc::new(SessionStore::new(
            config.max_sessions,
            chrono::Duration::seconds(config.session_ttl_secs),
        )),
        images: Arc::new(OpenAiClient::from_config(&config)),
        store,
        model: config.model.clone(),
        size: config.size.clone(),
    };

    let app = routes::router(state).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, model = %config.model, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await
        .context("server error")?;
    Ok(())
}
