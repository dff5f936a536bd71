//! Playback types shared across modules

use super::hooks::PlaybackHooks;
use serde::Serialize;
use signplay_common::events::{AvatarState, SpeedMode};
use std::sync::Arc;
use std::time::Duration;

/// Per-request behavior overrides
#[derive(Clone, Default)]
pub struct SignOptions {
    /// Explicit speed mode; auto-selected when `None`
    pub speed: Option<SpeedMode>,
    pub instant_mode: bool,
    pub fast_mode: bool,
    /// Size of the batch this sign was submitted with (0 or 1: no batch)
    pub batch_size: usize,
    /// Another sign follows immediately; stay in SIGNING instead of
    /// bouncing through NEUTRAL
    pub chain_next: bool,
    /// Free-form origin tag ("speech", "keyboard", ...)
    pub source: Option<String>,
    /// Hook set replacing the caller's default for this request
    pub hooks: Option<Arc<dyn PlaybackHooks>>,
}

impl SignOptions {
    pub fn with_speed(mut self, speed: SpeedMode) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn instant(mut self) -> Self {
        self.instant_mode = true;
        self
    }

    pub fn fast(mut self) -> Self {
        self.fast_mode = true;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn PlaybackHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn is_batch(&self) -> bool {
        self.batch_size > 1
    }
}

impl std::fmt::Debug for SignOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignOptions")
            .field("speed", &self.speed)
            .field("instant_mode", &self.instant_mode)
            .field("fast_mode", &self.fast_mode)
            .field("batch_size", &self.batch_size)
            .field("chain_next", &self.chain_next)
            .field("source", &self.source)
            .field("hooks", &self.hooks.as_ref().map(|_| "custom"))
            .finish()
    }
}

/// Outcome of one completed sign transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionResult {
    pub sign_id: String,
    pub previous_sign_id: Option<String>,
    pub speed_mode: SpeedMode,
    /// False when the clip was unavailable and a placeholder was shown
    pub resource_loaded: bool,
    pub hold: Duration,
    pub elapsed: Duration,
    /// SIGNING when chained into a following sign, otherwise NEUTRAL
    pub final_state: AvatarState,
}
