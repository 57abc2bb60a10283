//! API routes and handlers.

mod connections;
mod index;
mod values;

use axum::{
    Router,
    routing::{get, post},
};

use super::state::AppState;

/// Build the API router.
pub fn router(state: AppState) -> Router {
    let db_routes = Router::new()
        // Key space
        .route("/estimate", get(index::estimate))
        .route(
            "/index",
            get(index::status).post(index::start).delete(index::cancel),
        )
        .route("/keys", get(index::search))
        // Values; keys may contain '/', so they take the rest of the path
        .route("/value/{*key}", get(values::get_value))
        .route("/inspect/{*key}", get(values::inspect))
        .route("/export/{*key}", post(values::export));

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/v1/connections",
            get(connections::list).post(connections::add),
        )
        .route("/api/v1/connections/locations", get(connections::locations))
        .route(
            "/api/v1/connections/{name}",
            get(connections::get)
                .put(connections::update)
                .delete(connections::remove),
        )
        .nest("/api/v1/db/{connection}", db_routes)
        .with_state(state)
}

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}
