use serde::{Deserialize, Serialize};

use hive_core::{PermissionId, RoleId};

/// A named bundle of permissions assignable to users.
///
/// The permission list is kept in the order it was written; reconciliation
/// compares it as a sequence, not as a set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub display_name: Option<String>,
    pub permissions: Vec<PermissionId>,
}

impl Role {
    pub fn new(name: impl Into<String>, permissions: Vec<PermissionId>) -> Self {
        Self {
            id: RoleId::new(),
            name: name.into(),
            display_name: None,
            permissions,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn grants(&self, permission: &PermissionId) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.name)
    }
}
