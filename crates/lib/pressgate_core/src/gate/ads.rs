//! Rewarded-ad SDK contract and a simulated SDK.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::uuid::uuidv7;

/// Ad playback errors. All of them are retryable from the paywall.
#[derive(Debug, Error)]
pub enum AdPlaybackError {
    #[error("No ad is ready to play")]
    NotReady,

    #[error("Ad SDK error: {0}")]
    Sdk(String),

    #[error("Ad did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Ad was closed before it finished")]
    Cancelled,

    #[error("An ad is already playing for article {0}")]
    AlreadyInProgress(String),
}

/// Kind of ad placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdType {
    Rewarded,
    Interstitial,
}

/// A started playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdHandle {
    pub ad_id: String,
    pub ad_type: AdType,
}

/// External ad SDK.
#[async_trait]
pub trait AdProvider: Send + Sync {
    async fn is_ad_ready(&self, ad_type: AdType) -> bool;

    /// Start playback.
    async fn show_rewarded_ad(&self, ad_type: AdType) -> Result<AdHandle, AdPlaybackError>;

    /// Resolve once the viewer has watched the whole ad.
    async fn wait_for_completion(&self, handle: &AdHandle) -> Result<(), AdPlaybackError>;
}

/// SDK stand-in that "plays" an ad by sleeping for the watch duration.
#[derive(Debug)]
pub struct SimulatedAdProvider {
    watch_duration: Duration,
    ready: AtomicBool,
    fail_playback: AtomicBool,
}

impl SimulatedAdProvider {
    pub fn new(watch_duration: Duration) -> Self {
        Self {
            watch_duration,
            ready: AtomicBool::new(true),
            fail_playback: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Make the next playbacks fail midway.
    pub fn set_fail_playback(&self, fail: bool) {
        self.fail_playback.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AdProvider for SimulatedAdProvider {
    async fn is_ad_ready(&self, _ad_type: AdType) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn show_rewarded_ad(&self, ad_type: AdType) -> Result<AdHandle, AdPlaybackError> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(AdPlaybackError::NotReady);
        }
        let handle = AdHandle {
            ad_id: uuidv7().to_string(),
            ad_type,
        };
        debug!(ad_id = %handle.ad_id, ?ad_type, "simulated ad started");
        Ok(handle)
    }

    async fn wait_for_completion(&self, handle: &AdHandle) -> Result<(), AdPlaybackError> {
        if self.fail_playback.load(Ordering::SeqCst) {
            tokio::time::sleep(self.watch_duration / 2).await;
            return Err(AdPlaybackError::Sdk(format!(
                "playback of {} stalled",
                handle.ad_id
            )));
        }
        tokio::time::sleep(self.watch_duration).await;
        debug!(ad_id = %handle.ad_id, "simulated ad finished");
        Ok(())
    }
}
