//! Identity provider contract and an in-process provider.

use async_trait::async_trait;
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tokio::sync::mpsc;
use tracing::debug;

use super::{IdentityError, Role};
use crate::uuid::user_id_for;

/// An identity the provider has authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    pub user_id: String,
    pub username: String,
    /// Explicit role claim, when the provider issues one.
    pub role_claim: Option<Role>,
    pub access_token: Option<String>,
}

impl AuthenticatedIdentity {
    /// Role for this identity: the explicit claim, else derived from the username.
    pub fn role(&self) -> Role {
        self.role_claim
            .unwrap_or_else(|| Role::derive_from_identity(&self.username))
    }
}

/// One auth-state callback: `Some` on sign-in, `None` on provider-side sign-out.
pub type AuthEvent = Result<Option<AuthenticatedIdentity>, IdentityError>;

/// External identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, username: &str) -> Result<AuthenticatedIdentity, IdentityError>;

    async fn sign_out(&self) -> Result<(), IdentityError>;
}

/// Generate a random credential token (48 alphanumeric chars).
fn generate_token() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

/// Provider that authenticates any non-empty username locally.
///
/// Optionally publishes every state change on an auth event channel, the way
/// a hosted provider would call back into the app.
#[derive(Debug, Default)]
pub struct LocalIdentityProvider {
    role_claim: Option<Role>,
    events: Option<mpsc::UnboundedSender<AuthEvent>>,
}

impl LocalIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue this role as an explicit claim on every identity.
    pub fn with_role_claim(mut self, role: Role) -> Self {
        self.role_claim = Some(role);
        self
    }

    /// Publish auth events; returns the receiving end.
    pub fn with_events(mut self) -> (Self, mpsc::UnboundedReceiver<AuthEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        (self, rx)
    }

    fn publish(&self, event: AuthEvent) {
        if let Some(tx) = &self.events
            && tx.send(event).is_err()
        {
            debug!("auth event listener has gone away");
        }
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn sign_in(&self, username: &str) -> Result<AuthenticatedIdentity, IdentityError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(IdentityError::Provider("username must not be empty".into()));
        }
        let identity = AuthenticatedIdentity {
            user_id: user_id_for(username).to_string(),
            username: username.to_string(),
            role_claim: self.role_claim,
            access_token: Some(generate_token()),
        };
        self.publish(Ok(Some(identity.clone())));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        self.publish(Ok(None));
        Ok(())
    }
}
