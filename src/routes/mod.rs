pub mod contingency;

use axum::Router;
use axum::routing::{delete, get, post};

use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        // Queue
        .route(
            "/api/v1/contingency/queue",
            get(contingency::list_queue).post(contingency::enqueue),
        )
        .route("/api/v1/contingency/queue/{id}", get(contingency::get_queue_item))
        .route(
            "/api/v1/contingency/queue/{id}/reset-retries",
            post(contingency::reset_retries),
        )
        // Events and batches
        .route("/api/v1/contingency/events", get(contingency::list_events))
        .route("/api/v1/contingency/events/{id}", get(contingency::get_event))
        .route("/api/v1/contingency/batches", get(contingency::list_batches))
        .route("/api/v1/contingency/batches/{id}", get(contingency::get_batch))
        // Authority sessions
        .route(
            "/api/v1/contingency/companies/{id}/token",
            delete(contingency::invalidate_token),
        )
}
