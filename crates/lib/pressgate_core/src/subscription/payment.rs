//! Payment SDK contract and the subscription purchase flow.
//!
//! `collect_payment` only talks to the SDK; applying the plan is left to the
//! caller so that a failed payment can never touch the subscription.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use super::Plan;
use crate::uuid::uuidv7;

/// Payment errors.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Payment SDK error: {0}")]
    Sdk(String),

    #[error("Payment was cancelled")]
    Cancelled,

    #[error("Payment failed: {0}")]
    Failed(String),

    #[error("The {0} plan is not for sale")]
    NotForSale(Plan),
}

/// Final state reported by the payment sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Completed,
    Cancelled,
    Failed,
}

/// Result of opening a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOutcome {
    pub status: PaymentStatus,
    /// Blockchain / processor transaction id, present on completion.
    pub txid: Option<String>,
}

/// Confirmation of a settled subscription payment.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentReceipt {
    pub payment_id: String,
    pub txid: Option<String>,
    pub plan: Plan,
    pub amount: f64,
}

/// External payment SDK.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_payment(&self, amount: f64, memo: &str) -> Result<String, PaymentError>;

    async fn open_payment(&self, payment_id: &str) -> Result<PaymentOutcome, PaymentError>;

    async fn cancel_payment(&self, payment_id: &str) -> Result<bool, PaymentError>;
}

/// Monthly price per paid plan, in payment units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanPricing {
    pub basic: f64,
    pub premium: f64,
}

impl PlanPricing {
    pub fn price(&self, plan: Plan) -> Option<f64> {
        match plan {
            Plan::Free => None,
            Plan::Basic => Some(self.basic),
            Plan::Premium => Some(self.premium),
        }
    }
}

impl Default for PlanPricing {
    fn default() -> Self {
        Self {
            basic: 3.14,
            premium: 6.28,
        }
    }
}

/// Best-effort cancel of an abandoned payment.
async fn release(provider: &dyn PaymentProvider, payment_id: &str) {
    match provider.cancel_payment(payment_id).await {
        Ok(true) => info!(payment_id, "payment cancelled"),
        Ok(false) => warn!(payment_id, "payment could not be cancelled"),
        Err(e) => warn!(payment_id, error = %e, "payment cancel failed"),
    }
}

/// Run the payment sheet for one month of `plan`.
pub async fn collect_payment(
    provider: &dyn PaymentProvider,
    pricing: &PlanPricing,
    plan: Plan,
) -> Result<PaymentReceipt, PaymentError> {
    let amount = pricing.price(plan).ok_or(PaymentError::NotForSale(plan))?;
    let memo = format!("Pressgate {plan} subscription (1 month)");

    let payment_id = provider.create_payment(amount, &memo).await?;
    info!(%payment_id, %plan, amount, "payment created");

    let outcome = match provider.open_payment(&payment_id).await {
        Ok(outcome) => outcome,
        Err(e) => {
            release(provider, &payment_id).await;
            return Err(e);
        }
    };

    match outcome.status {
        PaymentStatus::Completed => Ok(PaymentReceipt {
            payment_id,
            txid: outcome.txid,
            plan,
            amount,
        }),
        PaymentStatus::Cancelled => {
            release(provider, &payment_id).await;
            Err(PaymentError::Cancelled)
        }
        PaymentStatus::Failed => {
            release(provider, &payment_id).await;
            Err(PaymentError::Failed(format!("payment {payment_id} was declined")))
        }
    }
}

/// Payment provider that settles every payment with a fixed status.
#[derive(Debug)]
pub struct SimulatedPaymentProvider {
    status: PaymentStatus,
    cancelled: Mutex<Vec<String>>,
}

impl SimulatedPaymentProvider {
    pub fn new(status: PaymentStatus) -> Self {
        Self {
            status,
            cancelled: Mutex::new(Vec::new()),
        }
    }

    /// Payment ids passed to `cancel_payment`.
    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for SimulatedPaymentProvider {
    fn default() -> Self {
        Self::new(PaymentStatus::Completed)
    }
}

#[async_trait]
impl PaymentProvider for SimulatedPaymentProvider {
    async fn create_payment(&self, amount: f64, _memo: &str) -> Result<String, PaymentError> {
        if !(amount.is_finite() && amount > 0.0) {
            return Err(PaymentError::Sdk(format!("invalid amount {amount}")));
        }
        Ok(uuidv7().to_string())
    }

    async fn open_payment(&self, payment_id: &str) -> Result<PaymentOutcome, PaymentError> {
        let txid = match self.status {
            PaymentStatus::Completed => Some(format!("tx-{payment_id}")),
            _ => None,
        };
        Ok(PaymentOutcome {
            status: self.status,
            txid,
        })
    }

    async fn cancel_payment(&self, payment_id: &str) -> Result<bool, PaymentError> {
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payment_id.to_string());
        Ok(true)
    }
}
