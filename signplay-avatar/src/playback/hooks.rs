//! Lifecycle hooks
//!
//! The state machine renders nothing itself; it sequences calls into a hook
//! set supplied by the rendering layer and awaits each one before moving to
//! the next phase. Every method is optional (default no-op).

use crate::video::ClonedVideo;
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Hook set driven by the avatar state machine
///
/// A returned error fails the transition: the machine enters ERROR and the
/// caller (usually the queue) decides whether to retry.
#[async_trait]
pub trait PlaybackHooks: Send + Sync {
    /// Loading phase began for `sign_id`
    async fn on_load_start(&self, _sign_id: &str) -> Result<()> {
        Ok(())
    }

    /// Previous sign is leaving, `next` is about to load
    async fn on_transition_out(&self, _previous: &str, _next: &str) -> Result<()> {
        Ok(())
    }

    /// `next` is entering; `previous` is the sign shown before it, if any
    async fn on_transition_in(&self, _next: &str, _previous: Option<&str>) -> Result<()> {
        Ok(())
    }

    /// Hold phase began
    ///
    /// `video` is the clone playing for this sign, or `None` when the clip
    /// is unavailable and a placeholder should be shown instead.
    async fn on_sign_start(&self, _sign_id: &str, _video: Option<&ClonedVideo>) -> Result<()> {
        Ok(())
    }

    /// Hold phase ended
    async fn on_sign_end(&self, _sign_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Hook set that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

#[async_trait]
impl PlaybackHooks for NoHooks {}

/// Hook set that logs every phase
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHooks;

#[async_trait]
impl PlaybackHooks for LoggingHooks {
    async fn on_load_start(&self, sign_id: &str) -> Result<()> {
        info!("[{}] loading", sign_id);
        Ok(())
    }

    async fn on_transition_out(&self, previous: &str, next: &str) -> Result<()> {
        info!("[{}] transition out (next: {})", previous, next);
        Ok(())
    }

    async fn on_transition_in(&self, next: &str, previous: Option<&str>) -> Result<()> {
        info!("[{}] transition in (previous: {})", next, previous.unwrap_or("-"));
        Ok(())
    }

    async fn on_sign_start(&self, sign_id: &str, video: Option<&ClonedVideo>) -> Result<()> {
        match video {
            Some(video) => info!("[{}] signing from {}", sign_id, video.source_uri()),
            None => info!("[{}] signing (placeholder, clip unavailable)", sign_id),
        }
        Ok(())
    }

    async fn on_sign_end(&self, sign_id: &str) -> Result<()> {
        info!("[{}] done", sign_id);
        Ok(())
    }
}
