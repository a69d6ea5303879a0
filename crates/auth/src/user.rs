//! User records.
//!
//! Usernames are case-sensitive and unique only among live (non-deleted)
//! users; deleting a user is a soft delete, so the record is retained and the
//! username becomes reusable.

use serde::{Deserialize, Serialize};

use hive_core::{RoleId, Stamped, Stamps, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Opaque password hash; `None` means password login is impossible.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub email: Option<String>,
    pub roles: Vec<RoleId>,
    #[serde(default)]
    pub blocked: bool,
    #[serde(flatten)]
    pub stamps: Stamps,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            username: username.into(),
            password_hash: None,
            email: None,
            roles: Vec::new(),
            blocked: false,
            stamps: Stamps::default(),
        }
    }

    pub fn with_roles(mut self, roles: Vec<RoleId>) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_password_hash(mut self, hash: impl Into<String>) -> Self {
        self.password_hash = Some(hash.into());
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.stamps.deleted
    }
}

impl Stamped for User {
    fn stamps(&self) -> &Stamps {
        &self.stamps
    }

    fn stamps_mut(&mut self) -> &mut Stamps {
        &mut self.stamps
    }
}
