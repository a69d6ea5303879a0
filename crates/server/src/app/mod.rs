//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: the per-worker service bundle (store, authz, tokens, realtime)
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{
    Extension, Router,
    routing::{get, post},
};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router for one worker.
pub fn build_router(services: Arc<AppServices>) -> Router {
    // Protected routes: require a valid bearer token for a live user.
    let protected = routes::router().layer(axum::middleware::from_fn_with_state(
        Arc::clone(&services),
        middleware::auth_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/auth/token", post(routes::auth::issue_token))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::access_log))
                .layer(Extension(services)),
        )
}
