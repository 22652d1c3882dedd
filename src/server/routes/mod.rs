//! API routes

pub mod auth;
pub mod history;
pub mod search;

use axum::{
    routing::{get, post},
    Router,
};

use crate::server::state::AppState;

/// Routes under /api
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Auth
        .route("/register", post(auth::register))
        .route("/token", post(auth::login))
        .route("/logout", post(auth::logout))
        // RAG
        .route("/search", post(search::search))
        // History
        .route("/history", get(history::list))
        .route("/history/latest", get(history::latest))
        .route("/history/:id", get(history::get).delete(history::delete))
}
