//! Gate configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::gate::{FREE_LIMIT, ReadResetPolicy};
use crate::store::storage::default_data_dir;
use crate::subscription::payment::PlanPricing;

/// Default rewarded-ad watch time.
pub const DEFAULT_AD_WATCH_SECS: u64 = 15;

/// Extra time allowed on top of the watch time before an ad is given up on.
pub const DEFAULT_AD_GRACE_SECS: u64 = 5;

/// Default storage namespace.
pub const DEFAULT_STORAGE_NAMESPACE: &str = "news-auth-storage";

/// Configuration for the entitlement context.
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    /// Free full-article views before the paywall.
    pub free_limit: u32,
    pub ad_watch_duration: Duration,
    pub ad_grace: Duration,
    pub read_reset: ReadResetPolicy,
    pub storage_namespace: String,
    pub data_dir: PathBuf,
    pub pricing: PlanPricing,
}

impl GateConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                      | Default                          |
    /// |-------------------------------|----------------------------------|
    /// | `PRESSGATE_FREE_LIMIT`        | `5`                              |
    /// | `PRESSGATE_AD_SECONDS`        | `15`                             |
    /// | `PRESSGATE_AD_GRACE_SECONDS`  | `5`                              |
    /// | `PRESSGATE_READ_RESET`        | `never` (`never` / `daily`)      |
    /// | `PRESSGATE_STORAGE_NAMESPACE` | `news-auth-storage`              |
    /// | `PRESSGATE_DATA_DIR`          | platform data dir + `pressgate`  |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`GateConfig::from_env`] but reading from an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            free_limit: parse_or(&lookup, "PRESSGATE_FREE_LIMIT", defaults.free_limit),
            ad_watch_duration: Duration::from_secs(parse_or(
                &lookup,
                "PRESSGATE_AD_SECONDS",
                DEFAULT_AD_WATCH_SECS,
            )),
            ad_grace: Duration::from_secs(parse_or(
                &lookup,
                "PRESSGATE_AD_GRACE_SECONDS",
                DEFAULT_AD_GRACE_SECS,
            )),
            read_reset: parse_or(&lookup, "PRESSGATE_READ_RESET", defaults.read_reset),
            storage_namespace: lookup("PRESSGATE_STORAGE_NAMESPACE")
                .filter(|ns| !ns.trim().is_empty())
                .unwrap_or(defaults.storage_namespace),
            data_dir: lookup("PRESSGATE_DATA_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            pricing: defaults.pricing,
        }
    }

    /// Longest an ad flow may run before it is reported as timed out.
    pub fn ad_timeout(&self) -> Duration {
        self.ad_watch_duration + self.ad_grace
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            free_limit: FREE_LIMIT,
            ad_watch_duration: Duration::from_secs(DEFAULT_AD_WATCH_SECS),
            ad_grace: Duration::from_secs(DEFAULT_AD_GRACE_SECS),
            read_reset: ReadResetPolicy::Never,
            storage_namespace: DEFAULT_STORAGE_NAMESPACE.to_string(),
            data_dir: default_data_dir(),
            pricing: PlanPricing::default(),
        }
    }
}

/// Parse `key` if set, falling back to `default` (with a warning) when the
/// value does not parse.
fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                warn!(key, value = %raw, error = %e, "invalid config value; using default");
                default
            }
        },
    }
}
