//! Command execution against a loaded entitlement context.

use std::path::PathBuf;
use std::sync::Arc;

use pressgate_core::config::GateConfig;
use pressgate_core::gate::{AccessDecision, AllowReason, GateState, UnlockOption};
use pressgate_core::session::identity::LocalIdentityProvider;
use pressgate_core::subscription::Subscription;
use pressgate_core::subscription::payment::SimulatedPaymentProvider;
use pressgate_core::{Collaborators, EntitlementContext};
use tokio_util::sync::CancellationToken;

use crate::cli::EntitlementCommand;
use crate::{Error, Result};

/// Load state, run one command, persist whatever changed.
///
/// The process is the whole session, so a failed write is reported as an
/// error rather than left for a later retry.
pub async fn run(data_dir: Option<PathBuf>, command: EntitlementCommand) -> Result<()> {
    let mut config = GateConfig::from_env();
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }

    let mut collab = Collaborators::simulated(&config);
    match &command {
        EntitlementCommand::SignIn {
            role: Some(role), ..
        } => {
            collab.identity = Arc::new(LocalIdentityProvider::new().with_role_claim(*role));
        }
        EntitlementCommand::Subscribe { simulate, .. } => {
            collab.payments = Arc::new(SimulatedPaymentProvider::new(simulate.status()));
        }
        _ => {}
    }

    let ctx = EntitlementContext::load(config, collab).await;
    let outcome = execute(&ctx, &command).await;

    if ctx.is_dirty()
        && let Err(e) = ctx.persist().await
    {
        outcome?;
        return Err(Error::NotSaved(e));
    }
    outcome
}

async fn execute(ctx: &EntitlementContext, command: &EntitlementCommand) -> Result<()> {
    match command {
        EntitlementCommand::Status => print_status(ctx),
        EntitlementCommand::SignIn { username, .. } => {
            let session = ctx.sign_in(username).await?;
            println!(
                "signed in as {} ({})",
                session.username().unwrap_or_default(),
                session.role()
            );
        }
        EntitlementCommand::SignOut => {
            ctx.sign_out().await;
            println!("signed out");
        }
        EntitlementCommand::Read { article_id } => {
            let article_id = non_empty(article_id)?;
            print_decision(article_id, &ctx.access_article(article_id));
        }
        EntitlementCommand::WatchAd { article_id } => {
            let article_id = non_empty(article_id)?;
            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_ctrl_c.cancel();
                }
            });
            if ctx.gate_state(article_id) == GateState::LimitReached {
                println!(
                    "playing rewarded ad for {article_id} ({}s)...",
                    ctx.config().ad_watch_duration.as_secs()
                );
            }
            let decision = ctx.watch_ad(article_id, &cancel).await?;
            print_decision(article_id, &decision);
        }
        EntitlementCommand::Subscribe { plan, .. } => {
            let receipt = ctx.subscribe(*plan).await?;
            println!(
                "subscribed: {} (payment {}, tx {})",
                receipt.plan,
                receipt.payment_id,
                receipt.txid.as_deref().unwrap_or("-")
            );
            println!("plan: {}", describe_subscription(&ctx.subscription()));
        }
        EntitlementCommand::SetPlan { plan } => {
            let subscription = ctx.set_plan(*plan);
            println!("plan: {}", describe_subscription(&subscription));
        }
        EntitlementCommand::CheckExpiration => {
            if ctx.check_expiration() {
                println!("subscription expired");
            } else {
                println!("plan: {}", describe_subscription(&ctx.subscription()));
            }
        }
        EntitlementCommand::ResetReads => {
            ctx.reset_reads();
            println!("free reads: 0/{}", ctx.config().free_limit);
        }
    }
    Ok(())
}

fn non_empty(article_id: &str) -> Result<&str> {
    let trimmed = article_id.trim();
    if trimmed.is_empty() {
        return Err(Error::Custom("article id must not be empty".into()));
    }
    Ok(trimmed)
}

fn describe_subscription(subscription: &Subscription) -> String {
    match subscription.end_date() {
        Some(end) => format!(
            "{} ({}, until {})",
            subscription.plan(),
            subscription.status(),
            end.format("%Y-%m-%d %H:%M UTC")
        ),
        None => format!("{} ({})", subscription.plan(), subscription.status()),
    }
}

fn print_decision(article_id: &str, decision: &AccessDecision) {
    match decision {
        AccessDecision::Allowed(reason) => {
            let why = match reason {
                AllowReason::Entitled => "subscriber".to_string(),
                AllowReason::FreeRead { remaining } => {
                    format!("free read, {remaining} remaining")
                }
                AllowReason::AlreadyRead => "already read".to_string(),
                AllowReason::AdUnlocked => "unlocked by ad".to_string(),
            };
            println!("allowed: {article_id} ({why})");
        }
        AccessDecision::LimitReached { options } => {
            println!("limit reached: {article_id}");
            let options: Vec<&str> = options
                .iter()
                .map(|option| match option {
                    UnlockOption::WatchAd => "watch-ad",
                    UnlockOption::Subscribe => "subscribe",
                })
                .collect();
            println!("options: {}", options.join(", "));
        }
    }
}

fn print_status(ctx: &EntitlementContext) {
    let state = ctx.snapshot();
    match state.session.username() {
        Some(username) if state.session.is_authenticated() => {
            println!("session: {username} ({})", state.session.role());
        }
        _ => println!("session: signed out"),
    }
    println!("plan: {}", describe_subscription(&state.subscription));
    println!(
        "free reads: {}/{}",
        state.reads.count(),
        ctx.config().free_limit
    );
    let unlocked: Vec<String> = state.unlocks.iter().map(|u| u.article_id).collect();
    if unlocked.is_empty() {
        println!("ad unlocks: none");
    } else {
        println!("ad unlocks: {}", unlocked.join(", "));
    }
    if let Some(last_sync) = state.last_sync {
        println!("last sync: {}", last_sync.format("%Y-%m-%d %H:%M:%S UTC"));
    }
}
