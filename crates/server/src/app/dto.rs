//! Request/response DTOs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    /// Seconds until the token expires.
    pub expires_in: i64,
}

/// `?action=read&subject=User`
#[derive(Debug, Deserialize)]
pub struct PermissionQuery {
    pub action: String,
    pub subject: String,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub action: String,
    pub subject: String,
    pub granted: bool,
}

#[derive(Debug, Deserialize)]
pub struct RolesUpdateRequest {
    /// Role names, in the order they should be held.
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct UserRolesResponse {
    pub username: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct WhoamiResponse {
    pub id: String,
    pub username: String,
    pub roles: Vec<String>,
}
