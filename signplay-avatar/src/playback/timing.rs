//! Duration policy and speed-mode selection
//!
//! Speed modes compress transition chrome and hold time by a multiplier, but
//! every scaled value is floored: a recorded clip needs a minimum window on
//! screen to be legible however fast the surrounding sequence runs.

use crate::config::{MachineSettings, TimingSettings};
use signplay_common::events::SpeedMode;
use signplay_common::SignClass;
use std::time::Duration;

/// Scaled, floored durations for each lifecycle phase
#[derive(Debug, Clone)]
pub struct TimingPolicy {
    settings: TimingSettings,
}

impl TimingPolicy {
    pub fn new(settings: TimingSettings) -> Self {
        Self { settings }
    }

    /// Compression factor for a speed mode
    pub fn multiplier(&self, mode: SpeedMode) -> f64 {
        match mode {
            SpeedMode::Normal => 1.0,
            SpeedMode::Fast => self.settings.fast_multiplier,
            SpeedMode::Ultra => self.settings.ultra_multiplier,
            SpeedMode::Instant => self.settings.instant_multiplier,
        }
    }

    pub fn transition_in(&self, mode: SpeedMode) -> Duration {
        self.scaled(self.settings.transition_in, mode, self.settings.min_transition)
    }

    pub fn transition_out(&self, mode: SpeedMode) -> Duration {
        self.scaled(self.settings.transition_out, mode, self.settings.min_transition)
    }

    /// Hold time for a sign, by token class
    pub fn sign_hold(&self, sign_id: &str, mode: SpeedMode) -> Duration {
        let base = match SignClass::of(sign_id) {
            SignClass::Glyph => self.settings.glyph_hold,
            SignClass::Word => self.settings.word_hold,
        };
        self.scaled(base, mode, Duration::ZERO)
            .max(self.settings.min_hold)
    }

    /// Absolute hold floor
    pub fn min_hold(&self) -> Duration {
        self.settings.min_hold
    }

    /// Instant mode still calls the transition-in hook but does not wait
    pub fn skips_transition_in_wait(mode: SpeedMode) -> bool {
        mode == SpeedMode::Instant
    }

    // Transition floors never lift a base configured below them
    fn scaled(&self, base: Duration, mode: SpeedMode, floor: Duration) -> Duration {
        let multiplier = self.multiplier(mode).clamp(0.0, 1.0);
        base.mul_f64(multiplier).max(floor.min(base))
    }
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self::new(TimingSettings::default())
    }
}

/// What the selector knows about one transition request
#[derive(Debug, Clone, Copy, Default)]
pub struct SpeedContext<'a> {
    pub sign_id: &'a str,
    /// Explicit mode requested by the caller
    pub requested: Option<SpeedMode>,
    pub instant_mode: bool,
    pub fast_mode: bool,
    /// Size of the batch this sign was submitted with (0 or 1: no batch)
    pub batch_size: usize,
    /// Clip already cached in the pool
    pub cached: bool,
    /// Previous sign is commonly followed by this one
    pub common_sequence: bool,
}

/// Picks a speed mode from request context when none is given explicitly
#[derive(Debug, Clone, Copy)]
pub struct SpeedModeSelector {
    instant_batch_threshold: usize,
    ultra_batch_threshold: usize,
}

impl SpeedModeSelector {
    pub fn new(instant_batch_threshold: usize, ultra_batch_threshold: usize) -> Self {
        Self {
            instant_batch_threshold,
            ultra_batch_threshold,
        }
    }

    pub fn from_settings(settings: &MachineSettings) -> Self {
        Self::new(settings.instant_batch_threshold, settings.ultra_batch_threshold)
    }

    pub fn select(&self, ctx: &SpeedContext<'_>) -> SpeedMode {
        if let Some(mode) = ctx.requested {
            return mode;
        }
        if ctx.instant_mode
            || ctx.batch_size > self.instant_batch_threshold
            || SignClass::of(ctx.sign_id) == SignClass::Glyph
        {
            return SpeedMode::Instant;
        }
        if ctx.batch_size > self.ultra_batch_threshold || ctx.cached {
            return SpeedMode::Ultra;
        }
        if ctx.fast_mode || ctx.common_sequence {
            return SpeedMode::Fast;
        }
        SpeedMode::Normal
    }
}

impl Default for SpeedModeSelector {
    fn default() -> Self {
        Self::from_settings(&MachineSettings::default())
    }
}
