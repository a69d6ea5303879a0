//! `hive-auth`: authentication/authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and from concrete storage:
//! the store traits in [`store`] are ports, implemented in `hive-infra`.

pub mod authenticate;
pub mod authorize;
pub mod claims;
pub mod password;
pub mod permissions;
pub mod roles;
pub mod seed;
pub mod store;
pub mod user;

pub use authenticate::{AuthError, Authenticator};
pub use authorize::{AuthorizationExplanation, Authorizer, AuthzError, DenialKind};
pub use claims::{AccessClaims, TokenError, TokenService, validate_claims};
pub use password::{BcryptHasher, PasswordError, PasswordHasher};
pub use permissions::{Permission, PermissionKey};
pub use roles::Role;
pub use seed::{PermissionSeed, RbacSeed, RoleSeed, UserSeed};
pub use store::{PermissionStore, RbacStore, RoleStore, StoreError, UpsertOutcome, UserStore};
pub use user::User;
