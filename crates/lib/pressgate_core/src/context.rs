//! Entitlement context.
//!
//! Owns the session, subscription, read counter and ad unlocks, and is the
//! only thing that mutates them. Every mutation is a short critical section
//! behind a mutex that is never held across an `.await`; SDK calls and
//! storage writes happen outside it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::GateConfig;
use crate::error::GateError;
use crate::gate::ads::{AdPlaybackError, AdProvider, AdType, SimulatedAdProvider};
use crate::gate::{self, AccessDecision, AllowReason, GateState};
use crate::session::Session;
use crate::session::identity::{AuthEvent, IdentityProvider, LocalIdentityProvider};
use crate::store::storage::{JsonFileStorage, StateStorage};
use crate::store::{EntitlementState, PersistedState};
use crate::subscription::payment::{
    PaymentProvider, PaymentReceipt, SimulatedPaymentProvider, collect_payment,
};
use crate::subscription::{Plan, Subscription};

/// External collaborators the context talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub identity: Arc<dyn IdentityProvider>,
    pub ads: Arc<dyn AdProvider>,
    pub payments: Arc<dyn PaymentProvider>,
    pub storage: Arc<dyn StateStorage>,
}

impl Collaborators {
    /// System clock, simulated SDKs and JSON file storage under
    /// `config.data_dir`.
    pub fn simulated(config: &GateConfig) -> Self {
        Self {
            clock: Arc::new(SystemClock),
            identity: Arc::new(LocalIdentityProvider::new()),
            ads: Arc::new(SimulatedAdProvider::new(config.ad_watch_duration)),
            payments: Arc::new(SimulatedPaymentProvider::default()),
            storage: Arc::new(JsonFileStorage::new(
                &config.data_dir,
                &config.storage_namespace,
            )),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A claimed ad flow for one article. Releasing it (drop) frees the article
/// for another attempt, whether the flow finished, failed or was abandoned.
struct AdFlow<'a> {
    flows: &'a Mutex<HashMap<String, GateState>>,
    article_id: String,
}

impl<'a> AdFlow<'a> {
    fn claim(
        flows: &'a Mutex<HashMap<String, GateState>>,
        article_id: &str,
    ) -> Result<Self, AdPlaybackError> {
        let mut active = lock(flows);
        if active.contains_key(article_id) {
            return Err(AdPlaybackError::AlreadyInProgress(article_id.to_string()));
        }
        active.insert(article_id.to_string(), GateState::AdRequired);
        Ok(Self {
            flows,
            article_id: article_id.to_string(),
        })
    }

    fn advance(&self, state: GateState) {
        lock(self.flows).insert(self.article_id.clone(), state);
    }
}

impl Drop for AdFlow<'_> {
    fn drop(&mut self) {
        lock(self.flows).remove(&self.article_id);
    }
}

/// Process-wide entitlement state with its mutation interface.
pub struct EntitlementContext {
    config: GateConfig,
    collab: Collaborators,
    state: Mutex<EntitlementState>,
    ad_flows: Mutex<HashMap<String, GateState>>,
    /// Set by every mutation, cleared by a successful persist.
    dirty: AtomicBool,
}

impl EntitlementContext {
    pub fn new(config: GateConfig, collab: Collaborators) -> Self {
        Self::with_state(config, collab, EntitlementState::default())
    }

    pub fn with_state(config: GateConfig, collab: Collaborators, state: EntitlementState) -> Self {
        Self {
            config,
            collab,
            state: Mutex::new(state),
            ad_flows: Mutex::new(HashMap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Restore from storage and run the resume checks.
    ///
    /// An unreadable record is logged and replaced by fresh state.
    pub async fn load(config: GateConfig, collab: Collaborators) -> Self {
        let state = match collab.storage.load().await {
            Ok(Some(persisted)) => EntitlementState::restore(persisted),
            Ok(None) => EntitlementState::default(),
            Err(e) => {
                warn!(error = %e, "could not load entitlement state; starting fresh");
                EntitlementState::default()
            }
        };
        let ctx = Self::with_state(config, collab, state);
        ctx.resume();
        ctx
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    fn now(&self) -> DateTime<Utc> {
        self.collab.clock.now()
    }

    fn state(&self) -> MutexGuard<'_, EntitlementState> {
        lock(&self.state)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Whether there are changes not yet written to storage.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> EntitlementState {
        self.state().clone()
    }

    pub fn session(&self) -> Session {
        self.state().session.clone()
    }

    pub fn subscription(&self) -> Subscription {
        self.state().subscription.clone()
    }

    pub fn is_entitled(&self) -> bool {
        self.state().subscription.is_entitled()
    }

    // --- session -----------------------------------------------------------

    /// Apply an identity provider callback. Returns whether the session changed.
    ///
    /// A `None` identity does not sign the user out; only [`sign_out`] does.
    ///
    /// [`sign_out`]: EntitlementContext::sign_out
    pub fn apply_auth_event(&self, event: AuthEvent) -> bool {
        match event {
            Ok(Some(identity)) => {
                let role = identity.role();
                let mut state = self.state();
                let before = state.session.clone();
                state
                    .session
                    .set(&identity.username, &identity.user_id, role);
                state.session.attach_token(identity.access_token);
                let changed = state.session != before;
                drop(state);
                if changed {
                    self.mark_dirty();
                    info!(user_id = %identity.user_id, %role, "session established");
                }
                changed
            }
            Ok(None) => {
                debug!("identity provider reported no user; keeping session");
                false
            }
            Err(e) => {
                warn!(error = %e, "identity provider error; keeping session");
                false
            }
        }
    }

    /// Sign in through the identity provider.
    pub async fn sign_in(&self, username: &str) -> Result<Session, GateError> {
        let identity = match self.collab.identity.sign_in(username).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, "sign-in failed; keeping session");
                return Err(e.into());
            }
        };
        self.apply_auth_event(Ok(Some(identity)));
        Ok(self.session())
    }

    /// Sign out at the provider and clear the local session. A provider
    /// failure is logged; the local session is cleared regardless.
    pub async fn sign_out(&self) {
        if let Err(e) = self.collab.identity.sign_out().await {
            warn!(error = %e, "provider sign-out failed; clearing local session anyway");
        }
        let was_authenticated = {
            let mut state = self.state();
            let was = state.session.is_authenticated();
            state.session.clear();
            was
        };
        self.mark_dirty();
        if was_authenticated {
            info!("session cleared");
        }
    }

    // --- subscription ------------------------------------------------------

    pub fn set_plan(&self, plan: Plan) -> Subscription {
        let now = self.now();
        let subscription = {
            let mut state = self.state();
            state.subscription.set_plan(plan, now);
            state.subscription.clone()
        };
        self.mark_dirty();
        info!(%plan, end_date = ?subscription.end_date(), "plan set");
        subscription
    }

    pub fn renew(&self, plan: Plan) -> Result<Subscription, GateError> {
        let now = self.now();
        let subscription = {
            let mut state = self.state();
            state.subscription.renew(plan, now)?;
            state.subscription.clone()
        };
        self.mark_dirty();
        info!(%plan, end_date = ?subscription.end_date(), "subscription renewed");
        Ok(subscription)
    }

    /// Expire the subscription if its period is over. Returns whether it changed.
    pub fn check_expiration(&self) -> bool {
        let now = self.now();
        let expired = self.state().subscription.check_expiration(now);
        if expired {
            self.mark_dirty();
            info!("subscription expired");
        }
        expired
    }

    /// Checks to run on app foreground / session start: subscription expiry
    /// and the read counter rollover. Returns whether anything changed.
    pub fn resume(&self) -> bool {
        let now = self.now();
        let rolled = self
            .state()
            .reads
            .roll_over(self.config.read_reset, now.date_naive());
        if rolled {
            self.mark_dirty();
        }
        let expired = self.check_expiration();
        rolled || expired
    }

    /// Buy one month of `plan`. The plan only changes once the payment has
    /// completed; any payment failure leaves the subscription as it was.
    pub async fn subscribe(&self, plan: Plan) -> Result<PaymentReceipt, GateError> {
        let receipt =
            match collect_payment(self.collab.payments.as_ref(), &self.config.pricing, plan).await
            {
                Ok(receipt) => receipt,
                Err(e) => {
                    warn!(%plan, error = %e, "subscription payment did not go through");
                    return Err(e.into());
                }
            };

        let now = self.now();
        {
            let mut state = self.state();
            let subscription = &mut state.subscription;
            if subscription.is_entitled() && subscription.plan() == plan {
                subscription.renew(plan, now)?;
            } else {
                subscription.set_plan(plan, now);
            }
        }
        self.mark_dirty();
        info!(
            %plan,
            payment_id = %receipt.payment_id,
            txid = ?receipt.txid,
            "subscription purchased"
        );
        Ok(receipt)
    }

    // --- gate --------------------------------------------------------------

    /// Decide an access attempt, counting it against the free limit when it
    /// uses a free read.
    pub fn access_article(&self, article_id: &str) -> AccessDecision {
        let now = self.now();
        let decision = {
            let mut state = self.state();
            let state = &mut *state;
            gate::evaluate(
                &state.subscription,
                &mut state.reads,
                &state.unlocks,
                article_id,
                self.config.free_limit,
                now.date_naive(),
            )
        };
        if let AccessDecision::Allowed(AllowReason::FreeRead { remaining }) = decision {
            self.mark_dirty();
            debug!(article_id, remaining, "free read counted");
        }
        decision
    }

    /// Where `article_id` stands right now, without counting a read.
    pub fn gate_state(&self, article_id: &str) -> GateState {
        if let Some(state) = lock(&self.ad_flows).get(article_id) {
            return *state;
        }
        self.peek(article_id).state()
    }

    /// Evaluate an access attempt against a copy of the read counter.
    fn peek(&self, article_id: &str) -> AccessDecision {
        let now = self.now();
        let state = self.state();
        let mut reads = state.reads.clone();
        gate::evaluate(
            &state.subscription,
            &mut reads,
            &state.unlocks,
            article_id,
            self.config.free_limit,
            now.date_naive(),
        )
    }

    /// Play a rewarded ad and, once it has been watched in full, unlock
    /// `article_id`.
    ///
    /// No ad is played unless the article is behind the paywall; otherwise
    /// the decision the next access would get is returned and nothing is
    /// counted. Cancelling `cancel` (the user closing the ad) or dropping the
    /// future leaves the read counter and unlocks untouched. Only one flow
    /// per article may run at a time.
    pub async fn watch_ad(
        &self,
        article_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AccessDecision, GateError> {
        let decision = self.peek(article_id);
        if decision.is_allowed() {
            debug!(article_id, ?decision, "article not gated; skipping rewarded ad");
            return Ok(decision);
        }

        let flow = AdFlow::claim(&self.ad_flows, article_id)?;
        if let Err(e) = self.play_ad(&flow, cancel).await {
            warn!(article_id, error = %e, "rewarded ad did not complete");
            return Err(e.into());
        }
        flow.advance(GateState::AdCompleted);

        let now = self.now();
        let inserted = self.state().unlocks.insert(article_id, now);
        if inserted {
            self.mark_dirty();
            info!(article_id, "article unlocked by rewarded ad");
        }
        Ok(AccessDecision::Allowed(AllowReason::AdUnlocked))
    }

    async fn play_ad(
        &self,
        flow: &AdFlow<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), AdPlaybackError> {
        let ads = self.collab.ads.as_ref();
        if !ads.is_ad_ready(AdType::Rewarded).await {
            return Err(AdPlaybackError::NotReady);
        }

        let handle = tokio::select! {
            _ = cancel.cancelled() => return Err(AdPlaybackError::Cancelled),
            shown = ads.show_rewarded_ad(AdType::Rewarded) => shown?,
        };
        flow.advance(GateState::AdInProgress);
        debug!(ad_id = %handle.ad_id, article_id = %flow.article_id, "rewarded ad playing");

        let limit = self.config.ad_timeout();
        tokio::select! {
            _ = cancel.cancelled() => Err(AdPlaybackError::Cancelled),
            finished = tokio::time::timeout(limit, ads.wait_for_completion(&handle)) => {
                finished.unwrap_or(Err(AdPlaybackError::Timeout(limit)))
            }
        }
    }

    /// Clear the free read counter.
    pub fn reset_reads(&self) {
        self.state().reads.reset();
        self.mark_dirty();
        info!("read counter reset");
    }

    // --- persistence -------------------------------------------------------

    /// Write the persisted projection. On failure the in-memory state stays
    /// authoritative and remains dirty, so the next call retries.
    pub async fn persist(&self) -> Result<(), GateError> {
        let now = self.now();
        let record = {
            let state = self.state();
            // Cleared under the lock so a concurrent mutation stays dirty.
            self.dirty.store(false, Ordering::SeqCst);
            PersistedState::project(&state, now)
        };
        match self.collab.storage.save(&record).await {
            Ok(()) => {
                self.state().last_sync = Some(now);
                Ok(())
            }
            Err(e) => {
                self.mark_dirty();
                warn!(error = %e, "could not persist entitlement state; will retry");
                Err(e.into())
            }
        }
    }
}

/// Apply identity provider callbacks as they arrive, persisting after each
/// change. Returns when the provider drops its end of the channel.
pub async fn run_auth_listener(
    ctx: Arc<EntitlementContext>,
    mut events: mpsc::UnboundedReceiver<AuthEvent>,
) {
    while let Some(event) = events.recv().await {
        if ctx.apply_auth_event(event) {
            // Failures are logged by persist and retried on the next write.
            let _ = ctx.persist().await;
        }
    }
    debug!("auth event stream closed");
}

#[cfg(test)]
mod tests;
