use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{fmt, EnvFilter};

use recipe_assistant::{
    cache::{CacheStore, FileCacheStore, LocalCache, MemoryCacheStore},
    config::Config,
    gemini::GeminiClient,
    profiles::ProfileRepository,
    repository::RecipeRepository,
    routes::{router, AppState},
    store::{MemoryStore, RecipeStore, RestStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::load();
    tracing::info!("Using model {} at {}", config.gemini_model, config.gemini_base_url);

    let cache_store: Arc<dyn CacheStore> = match &config.cache_path {
        Some(path) => Arc::new(FileCacheStore::open(path)),
        None => Arc::new(MemoryCacheStore::new()),
    };
    let cache = LocalCache::new(cache_store);
    cache.sweep(config.cache_max_age);

    let store: Arc<dyn RecipeStore> = match &config.store_url {
        Some(url) => Arc::new(RestStore::new(url.as_str(), config.store_api_key.as_str())),
        None => {
            tracing::warn!("⚠️ STORE_URL not set, recipes are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let generator = GeminiClient::new(config.gemini_api_key.clone())
        .with_base_url(config.gemini_base_url.as_str())
        .with_model(config.gemini_model.as_str());

    let state = AppState {
        sessions: Arc::default(),
        generator: Arc::new(generator),
        recipes: Arc::new(RecipeRepository::new(store.clone(), cache.clone())),
        profiles: Arc::new(ProfileRepository::new(store)),
        cache,
        cache_max_age: config.cache_max_age,
        community_limit: config.community_limit,
    };

    let app = router(state).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
