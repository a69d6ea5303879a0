//! Reconciles the store with a declarative [`RbacSeed`].
//!
//! Runs in three phases (permissions, roles, users). Every reference in a
//! phase is resolved before that phase writes anything, so a bad role or user
//! seed aborts with [`BootstrapError::Validation`] and leaves no partial
//! record behind. Each write is an idempotent upsert, so concurrent runs
//! converge and a repeated run writes nothing.

use std::sync::Arc;

use chrono::Utc;

use hive_auth::password::hash_off_thread;
use hive_auth::{
    PasswordError, PasswordHasher, Permission, PermissionKey, RbacSeed, RbacStore, Role, StoreError,
    UpsertOutcome, User,
};
use hive_core::{PermissionId, RoleId, stamp_insert, stamp_update};

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("invalid seed: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Password(#[from] PasswordError),
}

/// Writes performed by one bootstrap run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub permissions_created: usize,
    pub roles_created: usize,
    pub roles_updated: usize,
    pub users_created: usize,
    pub users_updated: usize,
}

impl BootstrapReport {
    pub fn writes(&self) -> usize {
        self.permissions_created
            + self.roles_created
            + self.roles_updated
            + self.users_created
            + self.users_updated
    }
}

pub struct BootstrapSynchronizer<S: ?Sized> {
    store: Arc<S>,
    hasher: Arc<dyn PasswordHasher>,
}

impl<S> BootstrapSynchronizer<S>
where
    S: RbacStore + ?Sized,
{
    pub fn new(store: Arc<S>, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self { store, hasher }
    }

    #[tracing::instrument(skip_all, err)]
    pub async fn run(&self, seed: &RbacSeed) -> Result<BootstrapReport, BootstrapError> {
        let mut report = BootstrapReport::default();

        self.sync_permissions(seed, &mut report).await?;
        self.sync_roles(seed, &mut report).await?;
        self.sync_users(seed, &mut report).await?;

        tracing::info!(
            permissions_created = report.permissions_created,
            roles_created = report.roles_created,
            roles_updated = report.roles_updated,
            users_created = report.users_created,
            users_updated = report.users_updated,
            "rbac bootstrap complete"
        );
        Ok(report)
    }

    async fn sync_permissions(&self, seed: &RbacSeed, report: &mut BootstrapReport) -> Result<(), BootstrapError> {
        for entry in &seed.permissions {
            let mut permission = Permission::new(entry.subject.clone(), entry.action.clone());
            permission.display_name = entry.display_name.clone();

            if self.store.upsert_permission(permission).await?.was_created() {
                report.permissions_created += 1;
                tracing::debug!(subject = %entry.subject, action = %entry.action, "Add new permission");
            }
        }
        Ok(())
    }

    async fn sync_roles(&self, seed: &RbacSeed, report: &mut BootstrapReport) -> Result<(), BootstrapError> {
        let mut resolved = Vec::with_capacity(seed.roles.len());
        for entry in &seed.roles {
            let mut ids = Vec::with_capacity(entry.permissions.len());
            for (action, subject) in &entry.permissions {
                ids.push(self.resolve_permission(&entry.name, action, subject).await?);
            }
            resolved.push((entry, ids));
        }

        for (entry, permissions) in resolved {
            let mut role = Role::new(entry.name.clone(), permissions.clone());
            role.display_name = entry.display_name.clone();

            let existing = match self.store.upsert_role(role).await? {
                UpsertOutcome::Created(_) => {
                    report.roles_created += 1;
                    tracing::debug!(role = %entry.name, "Add new role");
                    continue;
                }
                UpsertOutcome::Existing(role) => role,
            };

            if existing.permissions != permissions {
                let updated = Role {
                    permissions,
                    ..existing
                };
                self.store.save_role(updated).await?;
                report.roles_updated += 1;
                tracing::debug!(role = %entry.name, "Update role permissions");
            }
        }
        Ok(())
    }

    async fn sync_users(&self, seed: &RbacSeed, report: &mut BootstrapReport) -> Result<(), BootstrapError> {
        let mut resolved = Vec::with_capacity(seed.users.len());
        for entry in &seed.users {
            let mut ids = Vec::with_capacity(entry.roles.len());
            for name in &entry.roles {
                ids.push(self.resolve_role(&entry.username, name).await?);
            }
            resolved.push((entry, ids));
        }

        for (entry, roles) in resolved {
            match self.store.find_live_user(&entry.username).await? {
                None => {
                    let hash = hash_off_thread(Arc::clone(&self.hasher), entry.password.clone()).await?;
                    let user = User::new(entry.username.clone())
                        .with_password_hash(hash)
                        .with_roles(roles);
                    let outcome = self.store.upsert_user(stamp_insert(user, Utc::now())).await?;
                    if outcome.was_created() {
                        report.users_created += 1;
                        tracing::debug!(username = %entry.username, "Add new user");
                    }
                }
                Some(existing) if existing.roles != roles => {
                    let updated = stamp_update(User { roles, ..existing }, Utc::now());
                    self.store.save_user(updated).await?;
                    report.users_updated += 1;
                    tracing::debug!(username = %entry.username, "Update user roles");
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    async fn resolve_permission(&self, role: &str, action: &str, subject: &str) -> Result<PermissionId, BootstrapError> {
        let key = PermissionKey::new(subject.to_string(), action.to_string());
        self.store
            .find_permission_by_key(&key)
            .await?
            .map(|p| p.id)
            .ok_or_else(|| BootstrapError::Validation(format!("role '{role}' references unknown permission '{key}'")))
    }

    async fn resolve_role(&self, username: &str, name: &str) -> Result<RoleId, BootstrapError> {
        self.store
            .find_role_by_name(name)
            .await?
            .map(|r| r.id)
            .ok_or_else(|| BootstrapError::Validation(format!("user '{username}' references unknown role '{name}'")))
    }
}
