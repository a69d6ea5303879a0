use axum::{
    Router,
    routing::{get, put},
};

pub mod auth;
pub mod authz;
pub mod stream;
pub mod system;
pub mod users;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/authz/check", get(authz::check))
        .route("/authz/explain", get(authz::explain))
        .route("/users/:username/roles", put(users::replace_roles))
        .route("/users/:username", axum::routing::delete(users::delete_user))
        .route("/stream", get(stream::stream))
}
