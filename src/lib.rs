pub mod auth;
pub mod authority;
pub mod company;
pub mod config;
pub mod contingency;
pub mod crypto;
pub mod db;
pub mod documents;
pub mod error;
pub mod models;
pub mod routes;
pub mod signer;
pub mod state;
pub mod store;
pub mod worker;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub fn build_app(state: SharedState) -> Router {
    Router::new()
        .merge(routes::api_routes())
        .route("/health", axum::routing::get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
