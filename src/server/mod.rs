//! HTTP surface: the thin request layer over the orchestrator and the
//! playlist builder.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::orchestrator::StreamOrchestrator;
use crate::playlist::PlaylistBuilder;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub orchestrator: Arc<StreamOrchestrator>,
    pub playlist: Arc<PlaylistBuilder>,
    pub config: Arc<Config>,
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let mut app = Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes());

    // Segments written by the transcoder are served straight from disk for
    // the local backend.
    if ctx.config.storage.local.enabled {
        app = app.nest_service(
            "/streams",
            ServeDir::new(&ctx.config.stream.streams_root),
        );
    }

    app.layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

fn api_routes() -> Router<AppContext> {
    Router::new()
        .route("/stream/start", post(routes::start_stream))
        .route("/stream/stop/:session_id", post(routes::stop_stream))
        .route(
            "/stream/:session_id/:backend/playlist.m3u8",
            get(routes::get_playlist),
        )
        .route(
            "/advertisement/insert",
            post(routes::insert_advertisement),
        )
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Start the HTTP server; returns when the shutdown signal fires.
pub async fn start_server(ctx: AppContext) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port)
        .parse()
        .context("Invalid server address")?;

    let app = create_router(ctx);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
