use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;

use hive_auth::permissions::{actions, subjects};
use hive_auth::{PermissionKey, User};
use hive_core::{soft_delete, stamp_update};

use crate::app::dto::{RolesUpdateRequest, UserRolesResponse};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

/// PUT /users/:username/roles - replace a user's roles by name.
///
/// Requires `update User`. Publishes `user.roles_updated`.
pub async fn replace_roles(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(username): Path<String>,
    Json(req): Json<RolesUpdateRequest>,
) -> axum::response::Response {
    let required = PermissionKey::new(subjects::USER, actions::UPDATE);
    if let Err(e) = services.authorizer.require(principal.user(), &required).await {
        return errors::authz_error_to_response(e);
    }

    let user = match services.store.find_live_user(&username).await {
        Ok(Some(user)) => user,
        Ok(None) => return errors::json_error(StatusCode::NOT_FOUND, "not_found", "user not found"),
        Err(e) => return errors::store_error_to_response(e),
    };

    let mut roles = Vec::with_capacity(req.roles.len());
    for name in &req.roles {
        match services.store.find_role_by_name(name).await {
            Ok(Some(role)) => roles.push(role.id),
            Ok(None) => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "unknown_role",
                    format!("role '{name}' does not exist"),
                );
            }
            Err(e) => return errors::store_error_to_response(e),
        }
    }

    let updated = stamp_update(User { roles, ..user }, Utc::now());
    if let Err(e) = services.store.save_user(updated).await {
        return errors::store_error_to_response(e);
    }

    tracing::info!(username = %username, roles = ?req.roles, by = %principal.user().username, "user roles replaced");
    services
        .notify("user.roles_updated", json!({ "username": username, "roles": req.roles }))
        .await;

    Json(UserRolesResponse {
        username,
        roles: req.roles,
    })
    .into_response()
}

/// DELETE /users/:username - soft-delete a user.
///
/// Requires `delete User`. The username becomes free for reuse. Publishes
/// `user.deleted`.
pub async fn delete_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(username): Path<String>,
) -> axum::response::Response {
    let required = PermissionKey::new(subjects::USER, actions::DELETE);
    if let Err(e) = services.authorizer.require(principal.user(), &required).await {
        return errors::authz_error_to_response(e);
    }

    let user = match services.store.find_live_user(&username).await {
        Ok(Some(user)) => user,
        Ok(None) => return errors::json_error(StatusCode::NOT_FOUND, "not_found", "user not found"),
        Err(e) => return errors::store_error_to_response(e),
    };

    if let Err(e) = services.store.save_user(soft_delete(user, Utc::now())).await {
        return errors::store_error_to_response(e);
    }

    tracing::info!(username = %username, by = %principal.user().username, "user deleted");
    services
        .notify("user.deleted", json!({ "username": username }))
        .await;

    StatusCode::NO_CONTENT.into_response()
}
