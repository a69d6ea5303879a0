use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use hive_core::PermissionId;

/// Well-known subjects guarded by the server itself.
pub mod subjects {
    pub const USER: &str = "User";
    pub const ROLE: &str = "Role";
}

/// Well-known actions.
pub mod actions {
    pub const CREATE: &str = "create";
    pub const READ: &str = "read";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
}

/// Natural key of a permission: the `(subject, action)` pair.
///
/// Two permission records never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionKey {
    pub subject: Cow<'static, str>,
    pub action: Cow<'static, str>,
}

impl PermissionKey {
    pub fn new(subject: impl Into<Cow<'static, str>>, action: impl Into<Cow<'static, str>>) -> Self {
        Self {
            subject: subject.into(),
            action: action.into(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn action(&self) -> &str {
        &self.action
    }
}

impl core::fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.action, self.subject)
    }
}

/// A stored permission record.
///
/// Immutable once referenced by a role, apart from its display label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub subject: String,
    pub action: String,
    pub display_name: Option<String>,
}

impl Permission {
    pub fn new(subject: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: PermissionId::new(),
            subject: subject.into(),
            action: action.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn key(&self) -> PermissionKey {
        PermissionKey::new(self.subject.clone(), self.action.clone())
    }

    pub fn matches(&self, key: &PermissionKey) -> bool {
        self.subject == key.subject() && self.action == key.action()
    }
}
