//! # Signplay Avatar Library (signplay-avatar)
//!
//! Sign playback core for a video-clip avatar.
//!
//! **Purpose:** Turn a burst of recognized sign identifiers into an ordered,
//! retryable, interruptible playback sequence driven through caller-supplied
//! lifecycle hooks.
//!
//! **Architecture:**
//! - `video` - resource pool: one loaded clip per sign, independent clones
//! - `playback::state_machine` - single-avatar lifecycle FSM with speed modes
//! - `playback::queue` - sequencing queue with pause/resume, retry and progress

pub mod config;
pub mod error;
pub mod playback;
pub mod state;
pub mod video;

pub use error::{Error, Result};
pub use playback::{AvatarStateMachine, PlaybackHooks, SignOptions, SignQueue};
pub use state::{AvatarRuntimeState, SharedAvatarState};
pub use video::ResourcePool;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data from a poisoned lock
///
/// Guarded state is plain data that is consistent between statements, so a
/// panic elsewhere never leaves it half-written.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
