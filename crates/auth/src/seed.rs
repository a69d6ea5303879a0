//! Declarative RBAC seed: the permissions, roles and default users a
//! deployment must contain.

use serde::{Deserialize, Serialize};

use crate::permissions::{actions, subjects};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSeed {
    pub subject: String,
    pub action: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSeed {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// `(action, subject)` pairs, e.g. `["read", "User"]`.
    pub permissions: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSeed {
    pub username: String,
    /// Plain-text initial password; only used when the user is first created.
    pub password: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RbacSeed {
    #[serde(default)]
    pub permissions: Vec<PermissionSeed>,
    #[serde(default)]
    pub roles: Vec<RoleSeed>,
    #[serde(default)]
    pub users: Vec<UserSeed>,
}

impl PermissionSeed {
    pub fn new(subject: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            action: action.into(),
            display_name: None,
        }
    }
}

impl RoleSeed {
    pub fn new<A, S>(name: impl Into<String>, permissions: impl IntoIterator<Item = (A, S)>) -> Self
    where
        A: Into<String>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            display_name: None,
            permissions: permissions
                .into_iter()
                .map(|(a, s)| (a.into(), s.into()))
                .collect(),
        }
    }
}

impl UserSeed {
    pub fn new<R: Into<String>>(
        username: impl Into<String>,
        password: impl Into<String>,
        roles: impl IntoIterator<Item = R>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

impl RbacSeed {
    /// The seed every deployment ships with: CRUD permissions on users and
    /// roles, one admin role for each, and a `superuser` holding both.
    ///
    /// Change the superuser password after the first start.
    pub fn builtin() -> Self {
        const CRUD: [&str; 4] = [actions::CREATE, actions::READ, actions::UPDATE, actions::DELETE];

        let permissions = [subjects::ROLE, subjects::USER]
            .into_iter()
            .flat_map(|subject| CRUD.into_iter().map(move |action| PermissionSeed::new(subject, action)))
            .collect();

        Self {
            permissions,
            roles: vec![
                RoleSeed::new("user-admin", CRUD.map(|action| (action, subjects::USER))),
                RoleSeed::new("role-admin", CRUD.map(|action| (action, subjects::ROLE))),
            ],
            users: vec![UserSeed::new("superuser", "superuser", ["role-admin", "user-admin"])],
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_seed_covers_user_and_role_crud() {
        let seed = RbacSeed::builtin();
        assert_eq!(seed.permissions.len(), 8);
        assert_eq!(seed.roles.len(), 2);
        assert_eq!(seed.roles[0].permissions[1], ("read".to_string(), "User".to_string()));
        assert_eq!(seed.users[0].roles, vec!["role-admin", "user-admin"]);
    }

    #[test]
    fn role_permissions_parse_from_json_pairs() {
        let seed = RbacSeed::from_json(
            r#"{
                "permissions": [{"subject": "User", "action": "read"}],
                "roles": [{"name": "viewer", "permissions": [["read", "User"]]}],
                "users": [{"username": "alice", "password": "x", "roles": ["viewer"]}]
            }"#,
        )
        .unwrap();

        assert_eq!(seed.permissions[0], PermissionSeed::new("User", "read"));
        assert_eq!(seed.roles[0], RoleSeed::new("viewer", [("read", "User")]));
        assert_eq!(seed.users[0], UserSeed::new("alice", "x", ["viewer"]));
    }
}
