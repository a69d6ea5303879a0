use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::app::dto::WhoamiResponse;
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /whoami - the caller and the names of the roles it holds.
///
/// Role ids that no longer resolve are left out.
pub async fn whoami(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    let user = principal.user();

    let mut roles = Vec::with_capacity(user.roles.len());
    for id in &user.roles {
        match services.store.find_role(id).await {
            Ok(Some(role)) => roles.push(role.name),
            Ok(None) => {}
            Err(e) => return errors::store_error_to_response(e),
        }
    }

    Json(WhoamiResponse {
        id: user.id.to_string(),
        username: user.username.clone(),
        roles,
    })
    .into_response()
}
