//! Shared avatar runtime state
//!
//! Holds the current avatar state and sign ids for one avatar instance.
//! Every change goes through `transition`, which checks the transition table
//! unless the state was built unchecked, and broadcasts the change.
//!
//! Uses a std Mutex: critical sections are short and never span an await.

use crate::error::{Error, Result};
use crate::lock;
use serde::Serialize;
use signplay_common::events::{AvatarState, EventBus, SignEvent};
use std::sync::Mutex;
use tracing::{debug, info};

/// Snapshot of one avatar's runtime state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvatarRuntimeState {
    pub current_state: AvatarState,
    pub current_sign_id: Option<String>,
    /// Set when a new sign's loading phase begins
    pub previous_sign_id: Option<String>,
    pub is_transitioning: bool,
    /// Sign that drove the machine into ERROR
    pub error_sign_id: Option<String>,
    pub error_message: Option<String>,
}

impl Default for AvatarRuntimeState {
    fn default() -> Self {
        Self {
            current_state: AvatarState::Neutral,
            current_sign_id: None,
            previous_sign_id: None,
            is_transitioning: false,
            error_sign_id: None,
            error_message: None,
        }
    }
}

/// Shared state accessible by the state machine and its recovery timer
pub struct SharedAvatarState {
    inner: Mutex<AvatarRuntimeState>,
    unchecked: bool,
    events: Option<EventBus>,
}

impl SharedAvatarState {
    /// Create state resting in NEUTRAL
    pub fn new(unchecked: bool, events: Option<EventBus>) -> Self {
        Self {
            inner: Mutex::new(AvatarRuntimeState::default()),
            unchecked,
            events,
        }
    }

    pub fn snapshot(&self) -> AvatarRuntimeState {
        lock(&self.inner).clone()
    }

    pub fn current(&self) -> AvatarState {
        lock(&self.inner).current_state
    }

    pub fn current_sign_id(&self) -> Option<String> {
        lock(&self.inner).current_sign_id.clone()
    }

    /// True when transitions skip the table
    pub fn is_unchecked(&self) -> bool {
        self.unchecked
    }

    /// Validated state change; returns the previous state
    ///
    /// Rejected changes leave the state untouched.
    pub fn transition(&self, to: AvatarState) -> Result<AvatarState> {
        let (from, sign_id) = {
            let mut inner = lock(&self.inner);
            let from = inner.current_state;
            if !self.unchecked && !from.can_transition_to(to) {
                return Err(Error::InvalidTransition { from, to });
            }
            Self::apply(&mut inner, to);
            (from, inner.current_sign_id.clone())
        };
        debug!("Avatar state {} -> {}", from, to);
        self.emit(from, to, sign_id);
        Ok(from)
    }

    /// Unconditional state change, for stop and reset paths
    pub fn force(&self, to: AvatarState) -> AvatarState {
        let (from, sign_id) = {
            let mut inner = lock(&self.inner);
            let from = inner.current_state;
            Self::apply(&mut inner, to);
            if to != AvatarState::Error {
                inner.error_sign_id = None;
                inner.error_message = None;
            }
            (from, inner.current_sign_id.clone())
        };
        if from != to {
            debug!("Avatar state forced {} -> {}", from, to);
            self.emit(from, to, sign_id);
        }
        from
    }

    /// Record the sign whose loading phase is starting
    pub fn begin_sign(&self, sign_id: &str) {
        let mut inner = lock(&self.inner);
        inner.previous_sign_id = inner.current_sign_id.take();
        inner.current_sign_id = Some(sign_id.to_string());
    }

    /// Record the failure that put the machine into ERROR
    pub fn record_error(&self, sign_id: &str, message: &str) {
        let mut inner = lock(&self.inner);
        inner.error_sign_id = Some(sign_id.to_string());
        inner.error_message = Some(message.to_string());
    }

    /// ERROR -> NEUTRAL; returns false when not in ERROR
    pub fn recover(&self) -> bool {
        if self.current() != AvatarState::Error {
            return false;
        }
        match self.transition(AvatarState::Neutral) {
            Ok(_) => {
                let mut inner = lock(&self.inner);
                inner.error_sign_id = None;
                inner.error_message = None;
                info!("Avatar recovered from error");
                true
            }
            Err(_) => false,
        }
    }

    /// Back to the initial state, forgetting sign ids and errors
    pub fn reset(&self) {
        let from = {
            let mut inner = lock(&self.inner);
            let from = inner.current_state;
            *inner = AvatarRuntimeState::default();
            from
        };
        if from != AvatarState::Neutral {
            self.emit(from, AvatarState::Neutral, None);
        }
    }

    fn apply(inner: &mut AvatarRuntimeState, to: AvatarState) {
        inner.current_state = to;
        inner.is_transitioning = to.is_transitioning();
    }

    fn emit(&self, old_state: AvatarState, new_state: AvatarState, sign_id: Option<String>) {
        if let Some(events) = &self.events {
            events.emit_lossy(SignEvent::AvatarStateChanged {
                old_state,
                new_state,
                sign_id,
                timestamp: signplay_common::time::now(),
            });
        }
    }
}

impl Default for SharedAvatarState {
    fn default() -> Self {
        Self::new(false, None)
    }
}
