//! Error types for signplay-avatar
//!
//! Resource load failures never appear here: the pool reports them as data
//! (`loaded: false`). Only cloning a never-loaded resource is a hard failure.

use signplay_common::events::AvatarState;
use thiserror::Error;

/// Main error type for signplay-avatar
#[derive(Error, Debug)]
pub enum Error {
    /// Clone requested for a resource that never loaded
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// State change outside the transition table
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: AvatarState, to: AvatarState },

    /// Lifecycle hook failed
    #[error("Hook {phase} failed for '{sign_id}': {message}")]
    Hook {
        sign_id: String,
        phase: HookPhase,
        message: String,
    },

    /// Queue item exhausted its retries
    #[error("Sign '{sign_id}' failed after {attempts} attempts: {message}")]
    QueueItem {
        sign_id: String,
        attempts: u32,
        message: String,
    },

    /// Waiting transition discarded by stop or reset
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Errors from the common crate
    #[error(transparent)]
    Common(#[from] signplay_common::Error),
}

/// Lifecycle phase a hook belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    LoadStart,
    TransitionOut,
    TransitionIn,
    SignStart,
    SignEnd,
}

impl std::fmt::Display for HookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookPhase::LoadStart => write!(f, "on_load_start"),
            HookPhase::TransitionOut => write!(f, "on_transition_out"),
            HookPhase::TransitionIn => write!(f, "on_transition_in"),
            HookPhase::SignStart => write!(f, "on_sign_start"),
            HookPhase::SignEnd => write!(f, "on_sign_end"),
        }
    }
}

/// Convenience Result type using signplay-avatar Error
pub type Result<T> = std::result::Result<T, Error>;
