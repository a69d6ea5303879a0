use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;

use hive_auth::{
    Permission, PermissionKey, PermissionStore, Role, RoleStore, StoreError, UpsertOutcome, User,
    UserStore,
};
use hive_core::{PermissionId, RoleId, Stamped, UserId};

use super::StoreConnection;

/// In-memory store for tests/dev.
///
/// Each collection sits behind its own lock, so every method is atomic on its
/// own. Records are kept ordered by id. Successful writes are counted, which
/// lets callers assert that an operation wrote nothing.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    permissions: RwLock<BTreeMap<PermissionId, Permission>>,
    roles: RwLock<BTreeMap<RoleId, Role>>,
    users: RwLock<BTreeMap<UserId, User>>,
    writes: AtomicU64,
    closed: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of inserts and saves performed so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store closed".to_string()));
        }
        Ok(())
    }

    fn wrote(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PermissionStore for InMemoryStore {
    async fn find_permission(&self, id: &PermissionId) -> Result<Option<Permission>, StoreError> {
        self.ensure_open()?;
        let map = self.permissions.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.get(id).cloned())
    }

    async fn find_permission_by_key(&self, key: &PermissionKey) -> Result<Option<Permission>, StoreError> {
        self.ensure_open()?;
        let map = self.permissions.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.values().find(|p| p.matches(key)).cloned())
    }

    async fn upsert_permission(&self, permission: Permission) -> Result<UpsertOutcome<Permission>, StoreError> {
        self.ensure_open()?;
        let mut map = self.permissions.write().map_err(|_| StoreError::Poisoned)?;
        let key = permission.key();
        if let Some(existing) = map.values().find(|p| p.matches(&key)) {
            return Ok(UpsertOutcome::Existing(existing.clone()));
        }
        map.insert(permission.id, permission.clone());
        self.wrote();
        Ok(UpsertOutcome::Created(permission))
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, StoreError> {
        self.ensure_open()?;
        let map = self.permissions.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.values().cloned().collect())
    }
}

#[async_trait]
impl RoleStore for InMemoryStore {
    async fn find_role(&self, id: &RoleId) -> Result<Option<Role>, StoreError> {
        self.ensure_open()?;
        let map = self.roles.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.get(id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        self.ensure_open()?;
        let map = self.roles.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.values().find(|r| r.name == name).cloned())
    }

    async fn upsert_role(&self, role: Role) -> Result<UpsertOutcome<Role>, StoreError> {
        self.ensure_open()?;
        let mut map = self.roles.write().map_err(|_| StoreError::Poisoned)?;
        if let Some(existing) = map.values().find(|r| r.name == role.name) {
            return Ok(UpsertOutcome::Existing(existing.clone()));
        }
        map.insert(role.id, role.clone());
        self.wrote();
        Ok(UpsertOutcome::Created(role))
    }

    async fn save_role(&self, role: Role) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut map = self.roles.write().map_err(|_| StoreError::Poisoned)?;
        if !map.contains_key(&role.id) {
            return Err(StoreError::NotFound(format!("role {}", role.id)));
        }
        if map.values().any(|r| r.id != role.id && r.name == role.name) {
            return Err(StoreError::Conflict(format!("role name '{}' already taken", role.name)));
        }
        map.insert(role.id, role);
        self.wrote();
        Ok(())
    }

    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        self.ensure_open()?;
        let map = self.roles.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.values().cloned().collect())
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        self.ensure_open()?;
        let map = self.users.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.get(id).cloned())
    }

    async fn find_live_user(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.ensure_open()?;
        let map = self.users.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map
            .values()
            .find(|u| u.is_live() && u.username == username)
            .cloned())
    }

    async fn upsert_user(&self, user: User) -> Result<UpsertOutcome<User>, StoreError> {
        self.ensure_open()?;
        let mut map = self.users.write().map_err(|_| StoreError::Poisoned)?;
        if let Some(existing) = map.values().find(|u| u.is_live() && u.username == user.username) {
            return Ok(UpsertOutcome::Existing(existing.clone()));
        }
        ensure_email_free(&map, &user)?;
        map.insert(user.id, user.clone());
        self.wrote();
        Ok(UpsertOutcome::Created(user))
    }

    async fn save_user(&self, user: User) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut map = self.users.write().map_err(|_| StoreError::Poisoned)?;
        if !map.contains_key(&user.id) {
            return Err(StoreError::NotFound(format!("user {}", user.id)));
        }
        // Partial uniqueness: only live users compete for a username.
        if user.is_live()
            && map
                .values()
                .any(|u| u.id != user.id && u.is_live() && u.username == user.username)
        {
            return Err(StoreError::Conflict(format!(
                "username '{}' already taken",
                user.username
            )));
        }
        ensure_email_free(&map, &user)?;
        map.insert(user.id, user);
        self.wrote();
        Ok(())
    }
}

/// Live users may not share an email address; users without one never clash.
fn ensure_email_free(users: &BTreeMap<UserId, User>, user: &User) -> Result<(), StoreError> {
    let Some(email) = user.email.as_deref().filter(|_| user.is_live()) else {
        return Ok(());
    };
    let taken = users
        .values()
        .any(|u| u.id != user.id && u.is_live() && u.email.as_deref() == Some(email));
    if taken {
        return Err(StoreError::Conflict(format!("email '{email}' already taken")));
    }
    Ok(())
}

#[async_trait]
impl StoreConnection for InMemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
