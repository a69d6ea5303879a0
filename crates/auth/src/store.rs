//! Storage ports for RBAC records.
//!
//! Implementations live in `hive-infra` (in-memory and Postgres). Every method
//! is an awaited I/O boundary. Single-record operations are atomic; anything
//! spanning several calls is not, which is why the writes that reconciliation
//! relies on are create-or-no-op upserts.

use async_trait::async_trait;
use thiserror::Error;

use hive_core::{PermissionId, RoleId, UserId};

use crate::{Permission, PermissionKey, Role, User};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("uniqueness conflict: {0}")]
    Conflict(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Result of a create-or-no-op upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome<T> {
    /// No record with the natural key existed; this one was written.
    Created(T),
    /// A record with the natural key already existed and was left untouched.
    Existing(T),
}

impl<T> UpsertOutcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            UpsertOutcome::Created(v) | UpsertOutcome::Existing(v) => v,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, UpsertOutcome::Created(_))
    }
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn find_permission(&self, id: &PermissionId) -> Result<Option<Permission>, StoreError>;

    async fn find_permission_by_key(&self, key: &PermissionKey) -> Result<Option<Permission>, StoreError>;

    /// Insert `permission` unless one with the same `(subject, action)` exists.
    async fn upsert_permission(&self, permission: Permission) -> Result<UpsertOutcome<Permission>, StoreError>;

    async fn list_permissions(&self) -> Result<Vec<Permission>, StoreError>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn find_role(&self, id: &RoleId) -> Result<Option<Role>, StoreError>;

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError>;

    /// Insert `role` unless one with the same name exists.
    async fn upsert_role(&self, role: Role) -> Result<UpsertOutcome<Role>, StoreError>;

    /// Overwrite an existing role (matched by id).
    async fn save_role(&self, role: Role) -> Result<(), StoreError>;

    async fn list_roles(&self) -> Result<Vec<Role>, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find by id, including soft-deleted users.
    async fn find_user(&self, id: &UserId) -> Result<Option<User>, StoreError>;

    /// Find the live (non-deleted) user holding `username`.
    async fn find_live_user(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// Insert `user` unless a live user with the same username exists.
    async fn upsert_user(&self, user: User) -> Result<UpsertOutcome<User>, StoreError>;

    /// Overwrite an existing user (matched by id).
    ///
    /// Fails with [`StoreError::Conflict`] if the save would give two live
    /// users the same username.
    async fn save_user(&self, user: User) -> Result<(), StoreError>;
}

/// Everything the authorization engine and reconciliation need.
pub trait RbacStore: PermissionStore + RoleStore + UserStore {}

impl<T> RbacStore for T where T: PermissionStore + RoleStore + UserStore + ?Sized {}
