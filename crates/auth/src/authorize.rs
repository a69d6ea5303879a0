use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use hive_core::PermissionId;

use crate::{Permission, PermissionKey, RbacStore, Role, StoreError, User};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of resolving one permission for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Grant {
    UnknownPermission,
    Denied { permission: PermissionId },
    Granted { permission: PermissionId, role: Role },
}

/// Role-based authorization engine.
///
/// Answers "can user U perform action A on subject S" by walking the user's
/// role references. It only reads from the store and keeps no scratch state,
/// so one instance can serve any number of concurrent checks.
pub struct Authorizer<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for Authorizer<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> Authorizer<S>
where
    S: RbacStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Whether `user` may perform `action` on `subject`.
    ///
    /// `Ok(false)` is the ordinary denial. Unknown permissions never authorize,
    /// and role references that no longer resolve grant nothing.
    pub async fn can(&self, user: &User, action: &str, subject: &str) -> Result<bool, StoreError> {
        let key = PermissionKey::new(subject.to_owned(), action.to_owned());
        Ok(matches!(self.grant(user, &key).await?, Grant::Granted { .. }))
    }

    /// Like [`Authorizer::can`], resolving a live user by username first.
    /// Unknown or deleted users are denied.
    pub async fn can_by_username(
        &self,
        username: &str,
        action: &str,
        subject: &str,
    ) -> Result<bool, StoreError> {
        match self.store.find_live_user(username).await? {
            Some(user) => self.can(&user, action, subject).await,
            None => Ok(false),
        }
    }

    /// Require `key` for `user`, turning a denial into [`AuthzError::Forbidden`].
    pub async fn require(&self, user: &User, key: &PermissionKey) -> Result<(), AuthzError> {
        match self.grant(user, key).await? {
            Grant::Granted { .. } => Ok(()),
            Grant::UnknownPermission | Grant::Denied { .. } => {
                tracing::debug!(user = %user.username, permission = %key, "authorization denied");
                Err(AuthzError::Forbidden(key.to_string()))
            }
        }
    }

    /// Explain the decision [`Authorizer::can`] would make.
    pub async fn explain(&self, user: &User, key: &PermissionKey) -> Result<AuthorizationExplanation, StoreError> {
        let explanation = match self.grant(user, key).await? {
            Grant::Granted { permission, role } => AuthorizationExplanation {
                required_permission: key.to_string(),
                granted: true,
                permission_id: Some(permission),
                granted_by: Some(role.name.clone()),
                reason: format!("role '{}' grants '{}'", role.name, key),
                denial: None,
            },
            Grant::Denied { permission } => AuthorizationExplanation {
                required_permission: key.to_string(),
                granted: false,
                permission_id: Some(permission),
                granted_by: None,
                reason: format!("none of the user's {} role(s) grants '{}'", user.roles.len(), key),
                denial: Some(DenialKind::NoGrantingRole),
            },
            Grant::UnknownPermission => AuthorizationExplanation {
                required_permission: key.to_string(),
                granted: false,
                permission_id: None,
                granted_by: None,
                reason: format!("permission '{}' does not exist", key),
                denial: Some(DenialKind::UnknownPermission),
            },
        };
        Ok(explanation)
    }

    async fn grant(&self, user: &User, key: &PermissionKey) -> Result<Grant, StoreError> {
        let target: Permission = match self.store.find_permission_by_key(key).await? {
            Some(p) => p,
            None => return Ok(Grant::UnknownPermission),
        };

        for role_id in &user.roles {
            let Some(role) = self.store.find_role(role_id).await? else {
                continue;
            };
            if role.grants(&target.id) {
                return Ok(Grant::Granted {
                    permission: target.id,
                    role,
                });
            }
        }

        Ok(Grant::Denied { permission: target.id })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of an authorization decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationExplanation {
    /// The permission that was being checked, as `"<action> <subject>"`.
    pub required_permission: String,

    pub granted: bool,

    /// Id of the permission record, if one exists for the key.
    pub permission_id: Option<PermissionId>,

    /// Name of the first role that grants the permission.
    pub granted_by: Option<String>,

    /// Human-readable reason for the decision.
    pub reason: String,

    pub denial: Option<DenialKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    UnknownPermission,
    NoGrantingRole,
}
