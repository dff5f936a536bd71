//! Avatar-related type definitions
//!
//! Supporting types for the avatar state machine and its timing tiers.

use serde::{Deserialize, Serialize};

/// Avatar playback state
///
/// `Neutral` is the initial and terminal rest state. `Error` is reachable
/// from every active state and always recovers to `Neutral` or `Loading`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AvatarState {
    Neutral,
    Loading,
    TransitioningIn,
    Signing,
    TransitioningOut,
    Error,
}

impl AvatarState {
    /// All states, in lifecycle order
    pub const ALL: [AvatarState; 6] = [
        AvatarState::Neutral,
        AvatarState::Loading,
        AvatarState::TransitioningIn,
        AvatarState::Signing,
        AvatarState::TransitioningOut,
        AvatarState::Error,
    ];

    /// Allowed destinations from this state
    pub fn allowed_targets(self) -> &'static [AvatarState] {
        use AvatarState::*;
        match self {
            Neutral => &[Loading, Error],
            Loading => &[TransitioningIn, Error, Neutral],
            TransitioningIn => &[Signing, Error],
            Signing => &[TransitioningOut, Error, Loading],
            TransitioningOut => &[Neutral, Loading],
            Error => &[Neutral, Loading],
        }
    }

    /// True when `next` is an allowed destination from this state
    pub fn can_transition_to(self, next: AvatarState) -> bool {
        self.allowed_targets().contains(&next)
    }

    /// True while a sign is moving through its lifecycle
    pub fn is_transitioning(self) -> bool {
        matches!(
            self,
            AvatarState::Loading | AvatarState::TransitioningIn | AvatarState::TransitioningOut
        )
    }
}

impl std::fmt::Display for AvatarState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AvatarState::Neutral => write!(f, "neutral"),
            AvatarState::Loading => write!(f, "loading"),
            AvatarState::TransitioningIn => write!(f, "transitioning_in"),
            AvatarState::Signing => write!(f, "signing"),
            AvatarState::TransitioningOut => write!(f, "transitioning_out"),
            AvatarState::Error => write!(f, "error"),
        }
    }
}

/// Timing-scale tier controlling how aggressively transition chrome and
/// hold durations are compressed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpeedMode {
    #[default]
    Normal,
    Fast,
    Ultra,
    Instant,
}

impl std::fmt::Display for SpeedMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeedMode::Normal => write!(f, "normal"),
            SpeedMode::Fast => write!(f, "fast"),
            SpeedMode::Ultra => write!(f, "ultra"),
            SpeedMode::Instant => write!(f, "instant"),
        }
    }
}

impl std::str::FromStr for SpeedMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(SpeedMode::Normal),
            "fast" => Ok(SpeedMode::Fast),
            "ultra" => Ok(SpeedMode::Ultra),
            "instant" => Ok(SpeedMode::Instant),
            other => Err(crate::Error::InvalidInput(format!("unknown speed mode: {}", other))),
        }
    }
}
