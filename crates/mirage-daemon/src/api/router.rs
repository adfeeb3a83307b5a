//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main router: the login stub plus a catch-all deception
/// surface for every other path and verb.
pub fn create_router(state: AppState) -> Router {
    let any_path = get(handlers::resolve)
        .post(handlers::resolve)
        .put(handlers::resolve)
        .patch(handlers::resolve)
        .delete(handlers::resolve);

    Router::new()
        .route("/login", post(handlers::login))
        .route("/", any_path.clone())
        .route("/*path", any_path)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
