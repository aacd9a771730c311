//! Capture-and-deliver orchestration
//!
//! Runs after the scheduler decides to fire (or an operator asks for a snap):
//! resolve the channel, capture, deliver, then optionally delete the artifact.
//! Deletion only ever happens after the upload was acknowledged.

use crate::capture::{CaptureError, CapturePort};
use crate::config::ScheduleConfig;
use crate::delivery::{ChannelHandle, ChannelResolver, DeliveryError, DeliveryPort};
use crate::schedule::FireMode;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Label used for operator-requested captures
pub const SNAP_LABEL: &str = "snap";

/// Error type for a single fire
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Schedule has no channel to deliver to
    #[error("No channel configured")]
    NoChannel,

    /// No joined guild has a text channel with the configured name
    #[error("Channel #{0} not found in any joined server")]
    ChannelNotFound(String),

    /// Channel lookup itself failed
    #[error("Channel lookup failed: {0}")]
    ChannelLookupFailed(#[source] DeliveryError),

    #[error("Capture failed: {0}")]
    CaptureFailed(#[from] CaptureError),

    /// Upload failed; the artifact is left on disk
    #[error("Delivery of {} failed: {source}", artifact.display())]
    DeliveryFailed {
        artifact: PathBuf,
        #[source]
        source: DeliveryError,
    },
}

/// What a successful fire did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireOutcome {
    pub channel: ChannelHandle,
    pub artifact: PathBuf,
    /// Whether the artifact was removed after delivery
    pub deleted: bool,
}

/// Time limits for the slow steps of a fire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireTimeouts {
    pub capture: Duration,
    pub delivery: Duration,
}

impl FireTimeouts {
    /// Longest a whole fire can take: lookup, capture and upload
    pub fn total(&self) -> Duration {
        self.capture + self.delivery * 2
    }
}

impl Default for FireTimeouts {
    fn default() -> Self {
        Self {
            capture: Duration::from_secs(30),
            delivery: Duration::from_secs(60),
        }
    }
}

/// Connects the capture device to the chat channel
pub struct Relay {
    capture: Arc<dyn CapturePort>,
    delivery: Arc<dyn DeliveryPort>,
    resolver: Arc<dyn ChannelResolver>,
    timeouts: FireTimeouts,
}

impl Relay {
    pub fn new(
        capture: Arc<dyn CapturePort>,
        delivery: Arc<dyn DeliveryPort>,
        resolver: Arc<dyn ChannelResolver>,
        timeouts: FireTimeouts,
    ) -> Self {
        Self {
            capture,
            delivery,
            resolver,
            timeouts,
        }
    }

    pub fn resolver(&self) -> &Arc<dyn ChannelResolver> {
        &self.resolver
    }

    pub fn timeouts(&self) -> FireTimeouts {
        self.timeouts
    }

    /// Handle a `Fire` decision from the scheduler
    pub async fn on_fire(
        &self,
        mode: FireMode,
        config: &ScheduleConfig,
    ) -> Result<FireOutcome, ScheduleError> {
        self.capture_and_deliver(mode.label(), config).await
    }

    /// Capture and deliver immediately, outside the schedule
    pub async fn snap(&self, config: &ScheduleConfig) -> Result<FireOutcome, ScheduleError> {
        self.capture_and_deliver(SNAP_LABEL, config).await
    }

    async fn capture_and_deliver(
        &self,
        label: &str,
        config: &ScheduleConfig,
    ) -> Result<FireOutcome, ScheduleError> {
        let name = config.channel().ok_or(ScheduleError::NoChannel)?;

        let channel = with_timeout(self.timeouts.delivery, self.resolver.resolve(name))
            .await
            .map_err(ScheduleError::ChannelLookupFailed)?
            .ok_or_else(|| ScheduleError::ChannelNotFound(name.to_string()))?;

        let capture = tokio::time::timeout(self.timeouts.capture, self.capture.capture(label));
        let artifact = match capture.await {
            Ok(result) => result?,
            Err(_) => return Err(CaptureError::TimedOut(self.timeouts.capture).into()),
        };
        info!(label, artifact = %artifact.display(), "Captured photo");

        if let Err(source) =
            with_timeout(self.timeouts.delivery, self.delivery.deliver(&channel, &artifact)).await
        {
            warn!(
                artifact = %artifact.display(),
                error = %source,
                "Delivery failed, keeping artifact"
            );
            return Err(ScheduleError::DeliveryFailed { artifact, source });
        }
        info!(label, channel = %channel.name, artifact = %artifact.display(), "Delivered photo");

        let deleted = if config.delete_after_upload {
            match self.delivery.delete_artifact(&artifact).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        artifact = %artifact.display(),
                        error = %e,
                        "Failed to delete delivered artifact"
                    );
                    false
                }
            }
        } else {
            false
        };

        Ok(FireOutcome {
            channel,
            artifact,
            deleted,
        })
    }
}

async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, DeliveryError>
where
    F: Future<Output = Result<T, DeliveryError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DeliveryError::TimedOut(limit)),
    }
}
