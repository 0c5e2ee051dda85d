//! Subscription lifecycle tracker.
//!
//! Invariants held by [`Subscription`]:
//! - `status == None` exactly when `plan == Free`;
//! - `Expired` is only entered from `Active` once `end_date < now`.

pub mod payment;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Subscription errors.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("Cannot renew the {0} plan")]
    NotRenewable(Plan),

    #[error("Unknown plan '{0}'")]
    UnknownPlan(String),
}

/// Subscription plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Basic,
    Premium,
}

impl Plan {
    pub fn is_paid(&self) -> bool {
        !matches!(self, Plan::Free)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Basic => "basic",
            Plan::Premium => "premium",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "basic" => Ok(Plan::Basic),
            "premium" => Ok(Plan::Premium),
            other => Err(SubscriptionError::UnknownPlan(other.to_string())),
        }
    }
}

/// Subscription status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    #[default]
    None,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::None => "none",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One billing period from `now`, by calendar month.
fn one_period_from(now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_add_months(Months::new(1))
        .unwrap_or_else(|| now + Duration::days(30))
}

/// Plan, status and end of the paid period.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscription {
    plan: Plan,
    status: SubscriptionStatus,
    end_date: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Rebuild from stored fields, repairing combinations the invariants forbid.
    ///
    /// A paid plan with no end date restores as free; one with an end date but
    /// no status restores as expired.
    pub fn from_parts(
        plan: Plan,
        status: SubscriptionStatus,
        end_date: Option<DateTime<Utc>>,
    ) -> Self {
        if !plan.is_paid() {
            if status != SubscriptionStatus::None || end_date.is_some() {
                warn!(%status, "free plan stored with a paid status; normalising");
            }
            return Self::default();
        }
        // Expired is only meaningful for a period that once ran, so a paid
        // plan without an end date falls back to free.
        let Some(end) = end_date else {
            warn!(%plan, %status, "paid plan stored without a period; restoring as free");
            return Self::default();
        };
        let status = match status {
            SubscriptionStatus::Active => SubscriptionStatus::Active,
            SubscriptionStatus::Expired => SubscriptionStatus::Expired,
            SubscriptionStatus::None => {
                warn!(%plan, %end, "paid plan stored without a status; marking expired");
                SubscriptionStatus::Expired
            }
        };
        Self {
            plan,
            status,
            end_date,
        }
    }

    pub fn plan(&self) -> Plan {
        self.plan
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.status
    }

    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        self.end_date
    }

    /// Switch plan. Paid plans start a fresh one-month period from `now`;
    /// the free plan drops any remaining paid time immediately.
    pub fn set_plan(&mut self, plan: Plan, now: DateTime<Utc>) {
        if plan.is_paid() {
            self.plan = plan;
            self.status = SubscriptionStatus::Active;
            self.end_date = Some(one_period_from(now));
        } else {
            *self = Self::default();
        }
    }

    /// Renew a paid plan: active again, one month from `now`. Remaining time
    /// on the previous period is not carried over.
    pub fn renew(&mut self, plan: Plan, now: DateTime<Utc>) -> Result<(), SubscriptionError> {
        if !plan.is_paid() {
            return Err(SubscriptionError::NotRenewable(plan));
        }
        self.set_plan(plan, now);
        Ok(())
    }

    /// Expire an active subscription whose period has ended. Returns whether
    /// the status changed.
    pub fn check_expiration(&mut self, now: DateTime<Utc>) -> bool {
        match (self.status, self.end_date) {
            (SubscriptionStatus::Active, Some(end)) if end < now => {
                self.status = SubscriptionStatus::Expired;
                true
            }
            _ => false,
        }
    }

    /// Sole authority for ad-free / premium access.
    pub fn is_entitled(&self) -> bool {
        self.plan.is_paid() && self.status == SubscriptionStatus::Active
    }
}
