//! Session and identity holder.
//!
//! The session is only ever written from authenticated identity callbacks
//! (`set`) or an explicit sign-out (`clear`). Role is carried in from the
//! identity, never from user input.

pub mod identity;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity provider errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Identity provider error: {0}")]
    Provider(String),

    #[error("Invalid identity claim: {0}")]
    InvalidClaim(String),
}

/// User role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Journalist,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Journalist => "journalist",
            Role::Admin => "admin",
        }
    }

    /// Fallback for providers that carry no role claim: read the role off
    /// the authenticated identity string.
    pub fn derive_from_identity(identity: &str) -> Self {
        let identity = identity.to_ascii_lowercase();
        if identity.contains("admin") {
            Role::Admin
        } else if identity.contains("journalist") {
            Role::Journalist
        } else {
            Role::User
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "journalist" => Ok(Role::Journalist),
            "admin" => Ok(Role::Admin),
            other => Err(IdentityError::InvalidClaim(format!("unknown role '{other}'"))),
        }
    }
}

/// Current authentication state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    is_authenticated: bool,
    user_id: Option<String>,
    username: Option<String>,
    role: Role,
    /// Provider credential. Never persisted.
    credential_token: Option<String>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn credential_token(&self) -> Option<&str> {
        self.credential_token.as_deref()
    }

    /// Overwrite the identity fields and mark the session authenticated.
    pub fn set(&mut self, username: impl Into<String>, id: impl Into<String>, role: Role) {
        self.is_authenticated = true;
        self.username = Some(username.into());
        self.user_id = Some(id.into());
        self.role = role;
    }

    pub fn attach_token(&mut self, token: Option<String>) {
        self.credential_token = token;
    }

    /// Drop identity and credential. The role falls back to `User`.
    pub fn clear(&mut self) {
        *self = Session::default();
    }
}
