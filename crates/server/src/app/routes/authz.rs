//! Authorization audit endpoints: "may I?" and "why (not)?" for the caller.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query},
    response::IntoResponse,
};

use hive_auth::PermissionKey;

use crate::app::dto::{CheckResponse, PermissionQuery};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

/// GET /authz/check?action=&subject=
pub async fn check(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<PermissionQuery>,
) -> axum::response::Response {
    match services
        .authorizer
        .can(principal.user(), &query.action, &query.subject)
        .await
    {
        Ok(granted) => Json(CheckResponse {
            action: query.action,
            subject: query.subject,
            granted,
        })
        .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /authz/explain?action=&subject=
pub async fn explain(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<PermissionQuery>,
) -> axum::response::Response {
    let key = PermissionKey::new(query.subject, query.action);
    match services.authorizer.explain(principal.user(), &key).await {
        Ok(explanation) => Json(explanation).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
