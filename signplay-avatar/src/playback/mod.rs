//! Sign playback: lifecycle state machine and sequencing queue

pub mod hooks;
pub mod prediction;
pub mod queue;
pub mod state_machine;
pub mod timing;
pub mod types;

pub use hooks::{LoggingHooks, NoHooks, PlaybackHooks};
pub use prediction::SignPredictor;
pub use queue::{QueueItem, QueueStatus, SignQueue};
pub use state_machine::AvatarStateMachine;
pub use timing::{SpeedContext, SpeedModeSelector, TimingPolicy};
pub use types::{SignOptions, TransitionResult};
