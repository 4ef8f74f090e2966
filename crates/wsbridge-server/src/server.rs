//! HTTP Server - 在 next handler 之前挂载 WebSocket bridge

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;
use wsbridge_config::Config;
use wsbridge_gateway::{bridge_middleware, Bridge, BridgeConfig};

/// Build the bridge from a validated configuration file model.
pub fn bridge_from_config(config: &Config) -> anyhow::Result<Arc<Bridge>> {
    let interval = config.bridge.interval_duration()?;
    let bridge_config = BridgeConfig::new(
        interval,
        config.bridge.backend_host.clone(),
        config.bridge.backend_paths.clone(),
    )?;
    Ok(Arc::new(Bridge::new(bridge_config)))
}

/// 创建路由
///
/// Requests the bridge does not take fall through to `/healthz` or the
/// 404 fallback.
pub fn router(bridge: Arc<Bridge>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(bridge, bridge_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

/// 启动服务器
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let bridge = bridge_from_config(&config)?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.server.host, config.server.port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!(
        %addr,
        backend = %config.bridge.backend_host,
        paths = ?config.bridge.backend_paths,
        interval = %config.bridge.interval,
        "wsbridge listening"
    );

    axum::serve(listener, router(bridge))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("wsbridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
