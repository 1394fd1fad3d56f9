//! Thin HTTP status/ack API over the store and engines.

pub mod routes;
pub mod state;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use self::state::AppState;

pub fn router(state: AppState) -> Router {
    routes::api_routes(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
