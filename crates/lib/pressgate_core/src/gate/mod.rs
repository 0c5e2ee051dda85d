//! Consumption gate.
//!
//! Decides whether an article may be opened in full. Access is granted, in
//! order, to entitled subscribers, to articles already counted in the current
//! read bucket, to free reads while under the limit, and to articles unlocked
//! by a rewarded ad. Anything else hits the paywall.

pub mod ads;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::subscription::Subscription;

/// Default number of free full-article views before gating.
pub const FREE_LIMIT: u32 = 5;

/// Where an article access attempt currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateState {
    Allowed,
    LimitReached,
    AdRequired,
    AdInProgress,
    AdCompleted,
    SubscribeRequired,
}

/// A way past the paywall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnlockOption {
    WatchAd,
    Subscribe,
}

impl UnlockOption {
    /// Gate state entered when the user picks this option.
    pub fn state(&self) -> GateState {
        match self {
            UnlockOption::WatchAd => GateState::AdRequired,
            UnlockOption::Subscribe => GateState::SubscribeRequired,
        }
    }
}

/// Why an access was allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowReason {
    Entitled,
    /// Counted against the free limit; `remaining` free reads left after this one.
    FreeRead { remaining: u32 },
    /// Already counted in the current bucket.
    AlreadyRead,
    AdUnlocked,
}

/// Outcome of an access attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed(AllowReason),
    LimitReached { options: Vec<UnlockOption> },
}

impl AccessDecision {
    fn paywall() -> Self {
        AccessDecision::LimitReached {
            options: vec![UnlockOption::WatchAd, UnlockOption::Subscribe],
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed(_))
    }

    pub fn state(&self) -> GateState {
        match self {
            AccessDecision::Allowed(_) => GateState::Allowed,
            AccessDecision::LimitReached { .. } => GateState::LimitReached,
        }
    }
}

/// When the free read counter starts over on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadResetPolicy {
    /// Only an explicit reset clears the counter.
    #[default]
    Never,
    /// The counter belongs to a UTC calendar day.
    Daily,
}

impl FromStr for ReadResetPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(ReadResetPolicy::Never),
            "daily" => Ok(ReadResetPolicy::Daily),
            other => Err(format!("unknown read reset policy '{other}'")),
        }
    }
}

impl fmt::Display for ReadResetPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadResetPolicy::Never => f.write_str("never"),
            ReadResetPolicy::Daily => f.write_str("daily"),
        }
    }
}

/// Free article views counted for the current bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadCounter {
    count: u32,
    articles: BTreeSet<String>,
    /// Day the current bucket belongs to; `None` until the first read.
    bucket: Option<NaiveDate>,
}

impl ReadCounter {
    /// Rebuild a counter from stored fields. The count never drops below the
    /// number of remembered articles.
    pub fn restore(
        count: u32,
        articles: impl IntoIterator<Item = String>,
        bucket: Option<NaiveDate>,
    ) -> Self {
        let articles: BTreeSet<String> = articles.into_iter().collect();
        let floor = u32::try_from(articles.len()).unwrap_or(u32::MAX);
        Self {
            count: count.max(floor),
            articles,
            bucket,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn articles(&self) -> impl Iterator<Item = &str> {
        self.articles.iter().map(String::as_str)
    }

    pub fn bucket(&self) -> Option<NaiveDate> {
        self.bucket
    }

    pub fn has_read(&self, article_id: &str) -> bool {
        self.articles.contains(article_id)
    }

    /// Count a view. Returns `false` if the article was already counted.
    pub fn record(&mut self, article_id: &str, today: NaiveDate) -> bool {
        if self.bucket.is_none() {
            self.bucket = Some(today);
        }
        if !self.articles.insert(article_id.to_string()) {
            return false;
        }
        self.count = self.count.saturating_add(1);
        true
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Start a new bucket if the policy says the current one is over.
    pub fn roll_over(&mut self, policy: ReadResetPolicy, today: NaiveDate) -> bool {
        match (policy, self.bucket) {
            (ReadResetPolicy::Daily, Some(bucket)) if bucket < today => {
                debug!(%bucket, %today, "daily read bucket rolled over");
                self.reset();
                true
            }
            _ => false,
        }
    }
}

/// A single rewarded-ad unlock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdUnlock {
    pub article_id: String,
    pub unlocked_at: DateTime<Utc>,
}

/// Articles unlocked by watching a rewarded ad, unique per article id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdUnlockRecord {
    entries: BTreeMap<String, DateTime<Utc>>,
}

impl AdUnlockRecord {
    /// Set-union insert. The first unlock time for an article is kept.
    /// Returns `false` if the article was already unlocked.
    pub fn insert(&mut self, article_id: &str, at: DateTime<Utc>) -> bool {
        if self.entries.contains_key(article_id) {
            return false;
        }
        self.entries.insert(article_id.to_string(), at);
        true
    }

    pub fn contains(&self, article_id: &str) -> bool {
        self.entries.contains_key(article_id)
    }

    pub fn get(&self, article_id: &str) -> Option<DateTime<Utc>> {
        self.entries.get(article_id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = AdUnlock> + '_ {
        self.entries.iter().map(|(article_id, at)| AdUnlock {
            article_id: article_id.clone(),
            unlocked_at: *at,
        })
    }
}

impl FromIterator<AdUnlock> for AdUnlockRecord {
    fn from_iter<I: IntoIterator<Item = AdUnlock>>(iter: I) -> Self {
        let mut record = Self::default();
        for unlock in iter {
            record.insert(&unlock.article_id, unlock.unlocked_at);
        }
        record
    }
}

/// Decide an access attempt, counting the article if it uses a free read.
pub fn evaluate(
    subscription: &Subscription,
    reads: &mut ReadCounter,
    unlocks: &AdUnlockRecord,
    article_id: &str,
    free_limit: u32,
    today: NaiveDate,
) -> AccessDecision {
    if subscription.is_entitled() {
        return AccessDecision::Allowed(AllowReason::Entitled);
    }
    if reads.has_read(article_id) {
        return AccessDecision::Allowed(AllowReason::AlreadyRead);
    }
    if reads.count() < free_limit {
        reads.record(article_id, today);
        return AccessDecision::Allowed(AllowReason::FreeRead {
            remaining: free_limit.saturating_sub(reads.count()),
        });
    }
    if unlocks.contains(article_id) {
        return AccessDecision::Allowed(AllowReason::AdUnlocked);
    }
    AccessDecision::paywall()
}
