use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use pressgate_core::session::Role;
use pressgate_core::subscription::Plan;
use pressgate_core::subscription::payment::PaymentStatus;

/// Pressgate: sign in, read articles, and get past the paywall.
#[derive(Parser, Debug)]
#[command(name = "pressgate", about = "Pressgate entitlement CLI")]
pub struct Cli {
    /// Directory holding the persisted entitlement state.
    #[arg(long, global = true, env = "PRESSGATE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(flatten)]
    Entitlement(EntitlementCommand),
    /// Print the version.
    Version,
}

/// Commands that run against the persisted entitlement state.
#[derive(Subcommand, Debug)]
pub enum EntitlementCommand {
    /// Show session, subscription and read counters.
    Status,
    /// Sign in through the local identity provider.
    SignIn {
        username: String,
        /// Role claim the provider issues with the identity.
        #[arg(long)]
        role: Option<Role>,
    },
    /// Sign out and forget the session.
    SignOut,
    /// Try to open an article in full.
    Read { article_id: String },
    /// Watch a rewarded ad to unlock an article.
    WatchAd { article_id: String },
    /// Buy a month of a paid plan.
    Subscribe {
        plan: Plan,
        /// How the simulated payment sheet settles.
        #[arg(long, value_enum, default_value_t = PaymentSimulation::Complete)]
        simulate: PaymentSimulation,
    },
    /// Switch plan without payment.
    SetPlan { plan: Plan },
    /// Expire the subscription if its period has ended.
    CheckExpiration,
    /// Clear the free read counter.
    ResetReads,
}

/// Outcome the simulated payment provider reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PaymentSimulation {
    Complete,
    Cancel,
    Fail,
}

impl PaymentSimulation {
    pub fn status(self) -> PaymentStatus {
        match self {
            PaymentSimulation::Complete => PaymentStatus::Completed,
            PaymentSimulation::Cancel => PaymentStatus::Cancelled,
            PaymentSimulation::Fail => PaymentStatus::Failed,
        }
    }
}
