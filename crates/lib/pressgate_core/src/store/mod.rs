//! Entitlement state and its persisted projection.
//!
//! `PersistedState` is the only shape that reaches durable storage. It is
//! built with [`PersistedState::project`], which leaves out transient and
//! sensitive fields (credential tokens, in-flight ad playback).

pub mod storage;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::gate::{AdUnlock, AdUnlockRecord, ReadCounter};
use crate::session::{Role, Session};
use crate::subscription::{Plan, Subscription, SubscriptionStatus};

/// Everything the gate needs to decide access.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitlementState {
    pub session: Session,
    pub subscription: Subscription,
    pub reads: ReadCounter,
    pub unlocks: AdUnlockRecord,
    pub last_sync: Option<DateTime<Utc>>,
}

impl EntitlementState {
    /// Rebuild in-memory state from a stored record.
    pub fn restore(persisted: PersistedState) -> Self {
        let mut session = Session::default();
        if persisted.is_authenticated
            && let (Some(username), Some(id)) = (persisted.username, persisted.id)
        {
            session.set(username, id, persisted.role);
        }

        let subscription = Subscription::from_parts(
            persisted.subscription_plan,
            persisted.subscription_status,
            persisted.subscription_end_date,
        );

        let reads = ReadCounter::restore(
            persisted.article_read_count,
            persisted.read_articles,
            persisted.read_bucket,
        );

        let unlocks = persisted
            .watched_ads
            .into_iter()
            .map(|ad| AdUnlock {
                article_id: ad.article_id,
                unlocked_at: ad.timestamp,
            })
            .collect();

        Self {
            session,
            subscription,
            reads,
            unlocks,
            last_sync: persisted.last_sync,
        }
    }
}

/// One rewarded-ad unlock as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedAd {
    pub article_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Stored record, one per storage namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    pub is_authenticated: bool,
    pub username: Option<String>,
    pub id: Option<String>,
    pub role: Role,
    pub subscription_plan: Plan,
    pub subscription_status: SubscriptionStatus,
    pub subscription_end_date: Option<DateTime<Utc>>,
    pub article_read_count: u32,
    pub read_articles: Vec<String>,
    pub read_bucket: Option<NaiveDate>,
    pub watched_ads: Vec<WatchedAd>,
    pub last_sync: Option<DateTime<Utc>>,
}

impl PersistedState {
    /// Project full state onto the stored subset, stamped with `synced_at`.
    pub fn project(state: &EntitlementState, synced_at: DateTime<Utc>) -> Self {
        let session = &state.session;
        Self {
            is_authenticated: session.is_authenticated(),
            username: session.username().map(str::to_string),
            id: session.user_id().map(str::to_string),
            role: session.role(),
            subscription_plan: state.subscription.plan(),
            subscription_status: state.subscription.status(),
            subscription_end_date: state.subscription.end_date(),
            article_read_count: state.reads.count(),
            read_articles: state.reads.articles().map(str::to_string).collect(),
            read_bucket: state.reads.bucket(),
            watched_ads: state
                .unlocks
                .iter()
                .map(|unlock| WatchedAd {
                    article_id: unlock.article_id,
                    timestamp: unlock.unlocked_at,
                })
                .collect(),
            last_sync: Some(synced_at),
        }
    }
}
