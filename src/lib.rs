pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::Context;

use crate::core::clock::SystemClock;
use crate::core::config::{Settings, StoreBackend};
use crate::core::{redis::RedisHandle, state::AppState, telemetry};
use crate::repositories::{memory::MemoryStore, postgres::PgStore, EngineStore};

async fn build_store(settings: &Settings) -> anyhow::Result<Arc<dyn EngineStore>> {
    match settings.store().backend {
        StoreBackend::Postgres => {
            let pool = db::init_pool(settings).await.context("Failed to connect to Postgres")?;
            db::run_migrations(&pool).await.context("Failed to run migrations")?;
            Ok(Arc::new(PgStore::new(pool)))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn connect_redis(settings: &Settings) -> RedisHandle {
    let redis = RedisHandle::new(settings.redis().redis_url());
    if let Err(err) = redis.connect().await {
        tracing::error!(error = %err, "Failed to connect to Redis; continuing without cache");
    } else {
        tracing::info!("Redis connected successfully");
    }
    redis
}

async fn bootstrap(component: &'static str) -> anyhow::Result<AppState> {
    dotenvy::dotenv().ok();

    let settings = Settings::load().context("Failed to load settings")?;
    telemetry::init_tracing(&settings, component)?;
    core::metrics::init(&settings)?;

    let store = build_store(&settings).await?;
    let redis = connect_redis(&settings).await;

    Ok(AppState::new(settings, store, redis, Arc::new(SystemClock)))
}

pub async fn run() -> anyhow::Result<()> {
    let state = bootstrap("api").await?;

    // Without a shared database there is no separate enforcer process to close sessions.
    let enforcer = match state.settings().store().backend {
        StoreBackend::Memory => Some(tasks::scheduler::spawn_enforcer(
            state.clone(),
            core::shutdown::shutdown_channel(),
        )),
        StoreBackend::Postgres => None,
    };

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr())
        .await
        .with_context(|| format!("Failed to bind {}", state.settings().server_addr()))?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        store = state.settings().store().backend.as_str(),
        "Examcore API listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await;

    if let Some(handle) = enforcer {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Deadline enforcer join failed");
        }
    }

    state.redis().disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}

pub async fn run_enforcer() -> anyhow::Result<()> {
    let state = bootstrap("enforcer").await?;

    let result = tasks::scheduler::run(state.clone()).await;

    state.redis().disconnect().await;
    tracing::info!("Redis disconnected");

    result
}
