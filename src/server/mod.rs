//! HTTP server for the travel RAG backend

pub mod extract;
pub mod routes;
pub mod state;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{extract::State, http::HeaderValue, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::AppConfig;
use state::AppState;

/// Build the router with all routes
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config().server.cors_origins);

    Router::new()
        .route("/health", get(health_check))
        .route("/users/me", get(routes::auth::me))
        .nest("/api", routes::api_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Credentials are allowed, so origins are listed and methods/headers mirrored
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}

/// Start the server.
///
/// The RAG service initialises in the background; until it is ready
/// `/api/search` answers 503.
pub async fn serve(config: AppConfig) -> Result<()> {
    config.validate()?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid listen address")?;

    let state = AppState::from_config(config).await?;

    let rag = state.rag().clone();
    tokio::spawn(async move {
        if rag.initialize().await {
            tracing::info!("Taiwan travel RAG service initialised");
        } else {
            tracing::error!("RAG service failed to initialise; search is unavailable");
        }
    });

    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "rag_ready": state.rag().is_ready(),
    }))
}

// ============================================================================
// Tests
// ============================================================================
