use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use super::*;
use crate::clock::ManualClock;
use crate::gate::{ReadResetPolicy, UnlockOption};
use crate::gate::ads::AdHandle;
use crate::session::identity::AuthenticatedIdentity;
use crate::session::{IdentityError, Role};
use crate::store::storage::MemoryStorage;
use crate::subscription::SubscriptionStatus;
use crate::subscription::payment::{PaymentError, PaymentStatus};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 10, 7, 0, 0).unwrap()
}

struct Harness {
    ctx: Arc<EntitlementContext>,
    clock: Arc<ManualClock>,
    ads: Arc<SimulatedAdProvider>,
    payments: Arc<SimulatedPaymentProvider>,
    storage: Arc<MemoryStorage>,
}

fn test_config() -> GateConfig {
    GateConfig {
        data_dir: PathBuf::from("unused"),
        ..GateConfig::default()
    }
}

fn harness_with(config: GateConfig, payment_status: PaymentStatus) -> Harness {
    let clock = Arc::new(ManualClock::new(t0()));
    let ads = Arc::new(SimulatedAdProvider::new(config.ad_watch_duration));
    let payments = Arc::new(SimulatedPaymentProvider::new(payment_status));
    let storage = Arc::new(MemoryStorage::new());
    let collab = Collaborators {
        clock: clock.clone(),
        identity: Arc::new(LocalIdentityProvider::new()),
        ads: ads.clone(),
        payments: payments.clone(),
        storage: storage.clone(),
    };
    Harness {
        ctx: Arc::new(EntitlementContext::new(config, collab)),
        clock,
        ads,
        payments,
        storage,
    }
}

fn harness() -> Harness {
    harness_with(test_config(), PaymentStatus::Completed)
}

/// Use up the free reads on throwaway articles.
fn exhaust_free_reads(ctx: &EntitlementContext) {
    for i in 0..ctx.config().free_limit {
        assert!(ctx.access_article(&format!("seed-{i}")).is_allowed());
    }
}

fn identity(username: &str, role_claim: Option<Role>) -> AuthenticatedIdentity {
    AuthenticatedIdentity {
        user_id: format!("id-{username}"),
        username: username.to_string(),
        role_claim,
        access_token: Some("token".into()),
    }
}

/// Ad SDK whose playback never finishes.
struct StuckAds;

#[async_trait]
impl AdProvider for StuckAds {
    async fn is_ad_ready(&self, _ad_type: AdType) -> bool {
        true
    }

    async fn show_rewarded_ad(&self, ad_type: AdType) -> Result<AdHandle, AdPlaybackError> {
        Ok(AdHandle {
            ad_id: "stuck".into(),
            ad_type,
        })
    }

    async fn wait_for_completion(&self, _handle: &AdHandle) -> Result<(), AdPlaybackError> {
        std::future::pending().await
    }
}

// --- gate --------------------------------------------------------------------

#[test]
fn sixth_distinct_article_hits_the_paywall() {
    let h = harness();
    for i in 0..5 {
        assert!(h.ctx.access_article(&format!("a{i}")).is_allowed());
    }
    assert_eq!(h.ctx.access_article("a5").state(), GateState::LimitReached);
    assert_eq!(h.ctx.snapshot().reads.count(), 5);
}

#[test]
fn limit_reached_offers_ad_and_subscription() {
    let h = harness();
    exhaust_free_reads(&h.ctx);

    let decision = h.ctx.access_article("a42");
    assert_eq!(
        decision,
        AccessDecision::LimitReached {
            options: vec![UnlockOption::WatchAd, UnlockOption::Subscribe]
        }
    );
    assert_eq!(h.ctx.gate_state("a42"), GateState::LimitReached);
    assert_eq!(h.ctx.snapshot().reads.count(), 5);
}

#[test]
fn gate_state_does_not_count() {
    let h = harness();
    assert_eq!(h.ctx.gate_state("a1"), GateState::Allowed);
    assert_eq!(h.ctx.snapshot().reads.count(), 0);
    assert!(!h.ctx.is_dirty());
}

#[tokio::test(start_paused = true)]
async fn ad_is_not_played_while_free_reads_remain() {
    let h = harness();
    h.ctx.access_article("a1");
    let started = tokio::time::Instant::now();

    let decision = h
        .ctx
        .watch_ad("x", &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(
        decision,
        AccessDecision::Allowed(AllowReason::FreeRead { .. })
    ));
    assert_eq!(started.elapsed(), Duration::ZERO);

    let state = h.ctx.snapshot();
    assert!(state.unlocks.is_empty());
    assert_eq!(state.reads.count(), 1);
    assert_eq!(
        h.ctx.access_article("x"),
        AccessDecision::Allowed(AllowReason::FreeRead { remaining: 3 })
    );
}

#[tokio::test(start_paused = true)]
async fn ad_is_not_played_for_subscribers() {
    let h = harness();
    exhaust_free_reads(&h.ctx);
    h.ctx.set_plan(Plan::Basic);
    let decision = h
        .ctx
        .watch_ad("a42", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(decision, AccessDecision::Allowed(AllowReason::Entitled));
    assert!(h.ctx.snapshot().unlocks.is_empty());
}

#[tokio::test(start_paused = true)]
async fn watched_ad_unlocks_only_that_article() {
    let h = harness();
    exhaust_free_reads(&h.ctx);

    let decision = h
        .ctx
        .watch_ad("a42", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(decision, AccessDecision::Allowed(AllowReason::AdUnlocked));

    let state = h.ctx.snapshot();
    assert_eq!(state.unlocks.len(), 1);
    assert_eq!(state.unlocks.get("a42"), Some(t0()));

    assert_eq!(
        h.ctx.access_article("a42"),
        AccessDecision::Allowed(AllowReason::AdUnlocked)
    );
    assert_eq!(h.ctx.access_article("a43").state(), GateState::LimitReached);
    assert_eq!(h.ctx.snapshot().reads.count(), 5);
}

#[tokio::test(start_paused = true)]
async fn ad_takes_the_configured_watch_time() {
    let h = harness();
    exhaust_free_reads(&h.ctx);
    let started = tokio::time::Instant::now();
    h.ctx
        .watch_ad("a42", &CancellationToken::new())
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_secs(15));
}

#[tokio::test(start_paused = true)]
async fn overlapping_ad_flow_for_same_article_is_rejected() {
    let h = harness();
    exhaust_free_reads(&h.ctx);

    let ctx = h.ctx.clone();
    let first =
        tokio::spawn(async move { ctx.watch_ad("a42", &CancellationToken::new()).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.ctx.gate_state("a42"), GateState::AdInProgress);

    let second = h.ctx.watch_ad("a42", &CancellationToken::new()).await;
    assert!(matches!(
        second,
        Err(GateError::AdPlayback(AdPlaybackError::AlreadyInProgress(ref id))) if id == "a42"
    ));

    // A different article is independent.
    assert_eq!(h.ctx.gate_state("a43"), GateState::LimitReached);

    first.await.unwrap().unwrap();
    assert_eq!(h.ctx.snapshot().unlocks.len(), 1);
    assert_eq!(h.ctx.gate_state("a42"), GateState::Allowed);
}

#[tokio::test(start_paused = true)]
async fn repeated_unlock_keeps_one_entry() {
    let h = harness();
    exhaust_free_reads(&h.ctx);
    let cancel = CancellationToken::new();
    h.ctx.watch_ad("a42", &cancel).await.unwrap();
    h.clock.advance(chrono::Duration::minutes(10));
    h.ctx.watch_ad("a42", &cancel).await.unwrap();

    let state = h.ctx.snapshot();
    assert_eq!(state.unlocks.len(), 1);
    assert_eq!(state.unlocks.get("a42"), Some(t0()));
}

#[tokio::test(start_paused = true)]
async fn closing_the_ad_gives_no_credit() {
    let h = harness();
    exhaust_free_reads(&h.ctx);
    assert_eq!(h.ctx.access_article("a42").state(), GateState::LimitReached);
    let before = h.ctx.snapshot();

    let cancel = CancellationToken::new();
    let closer = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        closer.cancel();
    });

    let result = h.ctx.watch_ad("a42", &cancel).await;
    assert!(matches!(
        result,
        Err(GateError::AdPlayback(AdPlaybackError::Cancelled))
    ));
    assert_eq!(h.ctx.snapshot(), before);
    assert_eq!(h.ctx.gate_state("a42"), GateState::LimitReached);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_ad_flow_releases_the_article() {
    let h = harness();
    exhaust_free_reads(&h.ctx);
    let before = h.ctx.snapshot();

    let cancel = CancellationToken::new();
    let abandoned =
        tokio::time::timeout(Duration::from_secs(3), h.ctx.watch_ad("a42", &cancel)).await;
    assert!(abandoned.is_err());
    assert_eq!(h.ctx.snapshot(), before);
    assert_eq!(h.ctx.gate_state("a42"), GateState::LimitReached);

    // The article can be retried afterwards.
    h.ctx.watch_ad("a42", &cancel).await.unwrap();
    assert!(h.ctx.snapshot().unlocks.contains("a42"));
}

#[tokio::test(start_paused = true)]
async fn failed_playback_is_retryable_and_mutates_nothing() {
    let h = harness();
    exhaust_free_reads(&h.ctx);
    let before = h.ctx.snapshot();

    h.ads.set_fail_playback(true);
    let err = h
        .ctx
        .watch_ad("a42", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::AdPlayback(AdPlaybackError::Sdk(_))));
    assert!(err.is_retryable());
    assert_eq!(h.ctx.snapshot(), before);
    assert_eq!(h.ctx.gate_state("a42"), GateState::LimitReached);

    h.ads.set_fail_playback(false);
    h.ctx
        .watch_ad("a42", &CancellationToken::new())
        .await
        .unwrap();
    assert!(h.ctx.access_article("a42").is_allowed());
}

#[tokio::test]
async fn no_ad_ready_is_reported() {
    let h = harness();
    exhaust_free_reads(&h.ctx);
    h.ads.set_ready(false);
    let err = h
        .ctx
        .watch_ad("a42", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::AdPlayback(AdPlaybackError::NotReady)));
}

#[tokio::test(start_paused = true)]
async fn stuck_ad_times_out_after_grace() {
    let clock = Arc::new(ManualClock::new(t0()));
    let config = test_config();
    let collab = Collaborators {
        clock,
        identity: Arc::new(LocalIdentityProvider::new()),
        ads: Arc::new(StuckAds),
        payments: Arc::new(SimulatedPaymentProvider::default()),
        storage: Arc::new(MemoryStorage::new()),
    };
    let ctx = EntitlementContext::new(config, collab);
    exhaust_free_reads(&ctx);

    let err = ctx
        .watch_ad("a42", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GateError::AdPlayback(AdPlaybackError::Timeout(limit)) if limit == Duration::from_secs(20)
    ));
    assert!(ctx.snapshot().unlocks.is_empty());
}

// --- subscription ------------------------------------------------------------

#[tokio::test]
async fn subscribing_lifts_the_paywall() {
    let h = harness();
    exhaust_free_reads(&h.ctx);
    assert_eq!(h.ctx.access_article("a42").state(), GateState::LimitReached);

    let receipt = h.ctx.subscribe(Plan::Basic).await.unwrap();
    assert_eq!(receipt.plan, Plan::Basic);
    assert!(receipt.txid.is_some());
    assert!(h.ctx.is_entitled());
    assert_eq!(
        h.ctx.access_article("a42"),
        AccessDecision::Allowed(AllowReason::Entitled)
    );
    assert_eq!(h.ctx.snapshot().reads.count(), 5);
}

#[tokio::test]
async fn failed_payment_leaves_plan_unchanged() {
    let h = harness_with(test_config(), PaymentStatus::Cancelled);
    let err = h.ctx.subscribe(Plan::Premium).await.unwrap_err();
    assert!(matches!(err, GateError::Payment(PaymentError::Cancelled)));
    assert_eq!(h.ctx.subscription(), Subscription::default());
    assert_eq!(h.payments.cancelled().len(), 1);
    assert!(!h.ctx.is_dirty());
}

#[tokio::test]
async fn repurchase_renews_from_now() {
    let h = harness();
    h.ctx.subscribe(Plan::Premium).await.unwrap();
    h.clock.advance(chrono::Duration::days(10));
    h.ctx.subscribe(Plan::Premium).await.unwrap();

    let sub = h.ctx.subscription();
    let expected = (t0() + chrono::Duration::days(10))
        .checked_add_months(chrono::Months::new(1))
        .unwrap();
    assert_eq!(sub.end_date(), Some(expected));
    assert_eq!(sub.status(), SubscriptionStatus::Active);
}

#[test]
fn premium_then_free_drops_entitlement_immediately() {
    let h = harness();
    h.ctx.set_plan(Plan::Premium);
    let sub = h.ctx.set_plan(Plan::Free);
    assert!(!h.ctx.is_entitled());
    assert_eq!(sub.status(), SubscriptionStatus::None);
    assert!(sub.end_date().is_none());
}

#[test]
fn renewing_free_is_an_error() {
    let h = harness();
    assert!(matches!(
        h.ctx.renew(Plan::Free),
        Err(GateError::Subscription(_))
    ));
}

#[test]
fn expiry_is_detected_on_resume() {
    let h = harness();
    h.ctx.set_plan(Plan::Basic);
    h.clock.advance(chrono::Duration::days(31));
    assert!(h.ctx.resume());
    assert!(!h.ctx.is_entitled());
    assert_eq!(h.ctx.subscription().status(), SubscriptionStatus::Expired);
    assert!(!h.ctx.check_expiration());
    assert_eq!(h.ctx.subscription().status(), SubscriptionStatus::Expired);
}

#[test]
fn daily_policy_restores_free_reads_next_day() {
    let config = GateConfig {
        read_reset: ReadResetPolicy::Daily,
        ..test_config()
    };
    let h = harness_with(config, PaymentStatus::Completed);
    exhaust_free_reads(&h.ctx);
    assert!(!h.ctx.access_article("a42").is_allowed());

    h.clock.advance(chrono::Duration::days(1));
    assert!(h.ctx.resume());
    assert!(h.ctx.access_article("a42").is_allowed());
}

#[test]
fn never_policy_keeps_counter_until_reset() {
    let h = harness();
    exhaust_free_reads(&h.ctx);
    h.clock.advance(chrono::Duration::days(3));
    assert!(!h.ctx.resume());
    assert!(!h.ctx.access_article("a42").is_allowed());

    h.ctx.reset_reads();
    assert!(h.ctx.access_article("a42").is_allowed());
}

// --- session -----------------------------------------------------------------

#[test]
fn auth_event_establishes_session_with_claimed_role() {
    let h = harness();
    assert!(h.ctx.apply_auth_event(Ok(Some(identity("admin_fan", Some(Role::User))))));
    let session = h.ctx.session();
    assert!(session.is_authenticated());
    assert_eq!(session.role(), Role::User);
    assert_eq!(session.credential_token(), Some("token"));
}

#[test]
fn auth_event_without_claim_derives_role() {
    let h = harness();
    h.ctx
        .apply_auth_event(Ok(Some(identity("journalist_kim", None))));
    assert_eq!(h.ctx.session().role(), Role::Journalist);
}

#[test]
fn null_and_failed_auth_events_keep_session() {
    let h = harness();
    h.ctx.apply_auth_event(Ok(Some(identity("alice", None))));
    let before = h.ctx.session();

    assert!(!h.ctx.apply_auth_event(Ok(None)));
    assert!(!h.ctx.apply_auth_event(Err(IdentityError::Provider("offline".into()))));
    assert_eq!(h.ctx.session(), before);
}

#[tokio::test]
async fn failed_sign_in_keeps_previous_session() {
    let h = harness();
    h.ctx.sign_in("alice").await.unwrap();
    let before = h.ctx.session();

    let err = h.ctx.sign_in("  ").await.unwrap_err();
    assert!(matches!(err, GateError::Identity(IdentityError::Provider(_))));
    assert_eq!(h.ctx.session(), before);
}

#[tokio::test]
async fn sign_out_clears_identity_and_token() {
    let h = harness();
    let session = h.ctx.sign_in("alice").await.unwrap();
    assert!(session.credential_token().is_some());

    h.ctx.sign_out().await;
    let session = h.ctx.session();
    assert!(!session.is_authenticated());
    assert!(session.username().is_none());
    assert!(session.credential_token().is_none());
}

#[tokio::test]
async fn auth_listener_applies_provider_callbacks() {
    let h = harness();
    let (provider, events) = LocalIdentityProvider::new()
        .with_role_claim(Role::Admin)
        .with_events();
    let listener = tokio::spawn(run_auth_listener(h.ctx.clone(), events));

    provider.sign_in("editor").await.unwrap();
    provider.sign_out().await.unwrap();
    drop(provider);
    listener.await.unwrap();

    // Provider-side sign-out is not an explicit sign-out.
    let session = h.ctx.session();
    assert!(session.is_authenticated());
    assert_eq!(session.username(), Some("editor"));
    assert_eq!(session.role(), Role::Admin);

    let stored = h.storage.record().unwrap();
    assert_eq!(stored.username.as_deref(), Some("editor"));
    assert_eq!(stored.role, Role::Admin);
}

// --- persistence -------------------------------------------------------------

#[tokio::test]
async fn failed_write_keeps_state_and_retries() {
    let h = harness();
    h.ctx.access_article("a1");
    h.storage.set_fail_writes(true);

    let err = h.ctx.persist().await.unwrap_err();
    assert!(matches!(err, GateError::Storage(_)));
    assert!(h.ctx.is_dirty());
    assert_eq!(h.ctx.snapshot().reads.count(), 1);
    assert!(h.ctx.snapshot().last_sync.is_none());

    h.storage.set_fail_writes(false);
    h.ctx.persist().await.unwrap();
    assert!(!h.ctx.is_dirty());
    assert_eq!(h.ctx.snapshot().last_sync, Some(t0()));
    let stored = h.storage.record().unwrap();
    assert_eq!(stored.article_read_count, 1);
    assert_eq!(stored.read_articles, vec!["a1".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clean_context_matches_the_stored_record() {
    let h = harness();
    let ctx = h.ctx.clone();
    let reader = tokio::spawn(async move {
        for i in 0..200 {
            if i % 7 == 0 {
                ctx.reset_reads();
            } else {
                ctx.access_article(&format!("w{i}"));
            }
            tokio::task::yield_now().await;
        }
    });
    for _ in 0..200 {
        h.ctx.persist().await.unwrap();
        tokio::task::yield_now().await;
    }
    reader.await.unwrap();

    if !h.ctx.is_dirty() {
        let stored = h.storage.record().unwrap();
        let reads = h.ctx.snapshot().reads;
        assert_eq!(stored.article_read_count, reads.count());
    }
    h.ctx.persist().await.unwrap();
    assert!(!h.ctx.is_dirty());
    assert_eq!(
        h.storage.record().unwrap().article_read_count,
        h.ctx.snapshot().reads.count()
    );
}

#[tokio::test]
async fn persisted_record_never_holds_the_token() {
    let h = harness();
    let session = h.ctx.sign_in("alice").await.unwrap();
    let token = session.credential_token().unwrap().to_string();
    h.ctx.persist().await.unwrap();

    let json = serde_json::to_string(&h.storage.record().unwrap()).unwrap();
    assert!(!json.contains(&token));
}

#[tokio::test]
async fn load_restores_and_expires_stale_subscription() {
    let record = PersistedState {
        is_authenticated: true,
        username: Some("alice".into()),
        id: Some("id-alice".into()),
        subscription_plan: Plan::Premium,
        subscription_status: SubscriptionStatus::Active,
        subscription_end_date: Some(t0() - chrono::Duration::days(1)),
        article_read_count: 2,
        read_articles: vec!["a1".into(), "a2".into()],
        ..Default::default()
    };
    let collab = Collaborators {
        clock: Arc::new(ManualClock::new(t0())),
        identity: Arc::new(LocalIdentityProvider::new()),
        ads: Arc::new(SimulatedAdProvider::new(Duration::ZERO)),
        payments: Arc::new(SimulatedPaymentProvider::default()),
        storage: Arc::new(MemoryStorage::with_record(record)),
    };

    let ctx = EntitlementContext::load(test_config(), collab).await;
    assert_eq!(ctx.session().username(), Some("alice"));
    assert_eq!(ctx.subscription().status(), SubscriptionStatus::Expired);
    assert!(ctx.is_dirty());
    assert_eq!(ctx.snapshot().reads.count(), 2);
    assert_eq!(
        ctx.access_article("a1"),
        AccessDecision::Allowed(AllowReason::AlreadyRead)
    );
}
