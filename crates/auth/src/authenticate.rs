//! Username/password authentication.
//!
//! Every failure is reported as [`AuthError::InvalidCredentials`]; callers
//! cannot tell an unknown user from a wrong password or a blocked account.
//! The specific reason is only logged at debug level.

use std::sync::Arc;

use thiserror::Error;

use crate::password::verify_off_thread;
use crate::{PasswordHasher, RbacStore, StoreError, User};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy)]
enum CredentialFailure {
    UnknownUser,
    WrongPassword,
    Blocked,
}

impl core::fmt::Display for CredentialFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CredentialFailure::UnknownUser => f.write_str("user does not exist"),
            CredentialFailure::WrongPassword => f.write_str("wrong password"),
            CredentialFailure::Blocked => f.write_str("user blocked"),
        }
    }
}

pub struct Authenticator<S: ?Sized> {
    store: Arc<S>,
    hasher: Arc<dyn PasswordHasher>,
}

impl<S: ?Sized> Clone for Authenticator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            hasher: Arc::clone(&self.hasher),
        }
    }
}

impl<S> Authenticator<S>
where
    S: RbacStore + ?Sized,
{
    pub fn new(store: Arc<S>, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self { store, hasher }
    }

    /// Check `password` for the live user `username`.
    ///
    /// Checks run in order: user exists, password matches, user not blocked.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User, AuthError> {
        let Some(user) = self.store.find_live_user(username).await? else {
            return Err(reject(username, CredentialFailure::UnknownUser));
        };

        let matches = match user.password_hash.clone() {
            Some(hash) => verify_off_thread(Arc::clone(&self.hasher), password.to_owned(), hash).await,
            None => false,
        };
        if !matches {
            return Err(reject(username, CredentialFailure::WrongPassword));
        }

        if user.blocked {
            return Err(reject(username, CredentialFailure::Blocked));
        }

        Ok(user)
    }
}

fn reject(username: &str, failure: CredentialFailure) -> AuthError {
    tracing::debug!(username, reason = %failure, "authentication rejected");
    AuthError::InvalidCredentials
}
