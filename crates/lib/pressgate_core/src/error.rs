//! Errors surfaced by the entitlement context.

use thiserror::Error;

use crate::gate::ads::AdPlaybackError;
use crate::session::IdentityError;
use crate::store::storage::StorageError;
use crate::subscription::SubscriptionError;
use crate::subscription::payment::PaymentError;

/// Any failure the context reports to its caller. None of them are fatal.
#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    AdPlayback(#[from] AdPlaybackError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}

impl GateError {
    /// Whether the user can reasonably try the same action again.
    pub fn is_retryable(&self) -> bool {
        match self {
            GateError::Identity(IdentityError::Provider(_)) => true,
            GateError::Identity(IdentityError::InvalidClaim(_)) => false,
            GateError::AdPlayback(_) => true,
            GateError::Payment(PaymentError::NotForSale(_)) => false,
            GateError::Payment(_) => true,
            GateError::Storage(_) => true,
            GateError::Subscription(_) => false,
        }
    }
}
