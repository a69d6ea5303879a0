use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use chrono::Utc;

use hive_auth::AuthError;

use crate::app::dto::{TokenRequest, TokenResponse};
use crate::app::errors;
use crate::app::services::AppServices;

/// POST /auth/token - exchange username/password for a bearer token.
///
/// Unknown users, wrong passwords and blocked users all get the same 401.
pub async fn issue_token(
    Extension(services): Extension<Arc<AppServices>>,
    Json(req): Json<TokenRequest>,
) -> axum::response::Response {
    let user = match services
        .authenticator
        .authenticate(&req.username, &req.password)
        .await
    {
        Ok(user) => user,
        Err(AuthError::InvalidCredentials) => {
            return errors::json_error(
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                "invalid username or password",
            );
        }
        Err(AuthError::Store(e)) => return errors::store_error_to_response(e),
    };

    match services.tokens.issue(user.id, Utc::now()) {
        Ok(access_token) => Json(TokenResponse {
            access_token,
            token_type: "Bearer",
            expires_in: services.tokens.ttl().num_seconds(),
        })
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to sign access token");
            errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "token_error", e.to_string())
        }
    }
}
