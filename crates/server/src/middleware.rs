use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::Level;

use crate::app::services::AppServices;
use crate::context::PrincipalContext;

/// Resolve the bearer token to a live, unblocked user.
pub async fn auth_middleware(
    State(services): State<Arc<AppServices>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_bearer(req.headers())?;

    let claims = services.tokens.validate(token, Utc::now()).map_err(|e| {
        tracing::debug!(error = %e, "bearer token rejected");
        StatusCode::UNAUTHORIZED
    })?;

    let user = services
        .store
        .find_user(&claims.sub)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "cannot resolve token subject");
            StatusCode::SERVICE_UNAVAILABLE
        })?
        .filter(|u| !u.is_deleted() && !u.blocked)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(PrincipalContext::new(user));

    Ok(next.run(req).await)
}

/// One log line per request: method, URI, status and duration.
pub async fn access_log(req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let started = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let level = access_level(response.status());
    if level == Level::ERROR {
        tracing::error!(%method, %uri, status, elapsed_ms, "{method} {uri} {status} {elapsed_ms}ms");
    } else if level == Level::WARN {
        tracing::warn!(%method, %uri, status, elapsed_ms, "{method} {uri} {status} {elapsed_ms}ms");
    } else {
        tracing::info!(%method, %uri, status, elapsed_ms, "{method} {uri} {status} {elapsed_ms}ms");
    }

    response
}

/// Server errors log at error, client errors at warn, the rest at info.
pub fn access_level(status: StatusCode) -> Level {
    if status.is_server_error() {
        Level::ERROR
    } else if status.is_client_error() {
        Level::WARN
    } else {
        Level::INFO
    }
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}
