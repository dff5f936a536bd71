//! Event types for the signplay event system
//!
//! Provides shared event definitions and the EventBus used by the queue and
//! the avatar state machine to report progress to whatever UI is listening.

mod avatar_types;
mod queue_types;

pub use avatar_types::{AvatarState, SpeedMode};
pub use queue_types::{QueueCounts, QueueItemStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Signplay event types
///
/// Events are broadcast via EventBus and can be serialized for any status
/// display. Playback correctness never depends on a consumer reacting to them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignEvent {
    /// Drain loop started
    QueueStarted {
        /// Items in the queue when the run started
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// Drain loop reached the end of the queue
    QueueCompleted {
        counts: QueueCounts,
        /// Wall time of the run in milliseconds
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Queue paused (by caller or after an exhausted item)
    QueuePaused {
        /// Cursor position at the time of pausing
        position: usize,
        timestamp: DateTime<Utc>,
    },

    /// Queue resumed
    QueueResumed {
        position: usize,
        timestamp: DateTime<Utc>,
    },

    /// Queue stopped by caller
    QueueStopped {
        position: usize,
        timestamp: DateTime<Utc>,
    },

    /// Queue items discarded
    QueueCleared {
        /// Number of discarded items
        discarded: usize,
        timestamp: DateTime<Utc>,
    },

    /// Queue item began processing
    SignStarted {
        item_id: Uuid,
        sign_id: String,
        /// Zero-based position in the queue
        index: usize,
        /// Attempt number, starting at 1
        attempt: u32,
        timestamp: DateTime<Utc>,
    },

    /// Queue item finished successfully
    SignCompleted {
        item_id: Uuid,
        sign_id: String,
        index: usize,
        duration_ms: u64,
        speed_mode: SpeedMode,
        /// False when the clip was unavailable and the UI showed a placeholder
        resource_loaded: bool,
        timestamp: DateTime<Utc>,
    },

    /// Queue item failed and will be retried
    SignRetrying {
        item_id: Uuid,
        sign_id: String,
        retry_count: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Queue item exhausted its retries
    SignFailed {
        item_id: Uuid,
        sign_id: String,
        index: usize,
        attempts: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Progress snapshot, emitted after every item regardless of outcome
    Progress {
        counts: QueueCounts,
        percentage: f64,
        estimated_remaining_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Avatar state machine changed state
    AvatarStateChanged {
        old_state: AvatarState,
        new_state: AvatarState,
        sign_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Resource pool preload progress
    PreloadProgress {
        total: usize,
        loaded: usize,
        failed: usize,
        percentage: f64,
        timestamp: DateTime<Utc>,
    },
}

impl SignEvent {
    /// Event type name (matches the serialized `type` tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            SignEvent::QueueStarted { .. } => "QueueStarted",
            SignEvent::QueueCompleted { .. } => "QueueCompleted",
            SignEvent::QueuePaused { .. } => "QueuePaused",
            SignEvent::QueueResumed { .. } => "QueueResumed",
            SignEvent::QueueStopped { .. } => "QueueStopped",
            SignEvent::QueueCleared { .. } => "QueueCleared",
            SignEvent::SignStarted { .. } => "SignStarted",
            SignEvent::SignCompleted { .. } => "SignCompleted",
            SignEvent::SignRetrying { .. } => "SignRetrying",
            SignEvent::SignFailed { .. } => "SignFailed",
            SignEvent::Progress { .. } => "Progress",
            SignEvent::AvatarStateChanged { .. } => "AvatarStateChanged",
            SignEvent::PreloadProgress { .. } => "PreloadProgress",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use signplay_common::events::{EventBus, SignEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(SignEvent::QueueStarted {
///     total: 3,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(matches!(rx.try_recv(), Ok(SignEvent::QueueStarted { total: 3, .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SignEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered before the oldest are
    /// dropped for lagging subscribers. 100 is plenty for tests, a UI
    /// following a long fingerspelling run wants more.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SignEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: SignEvent) -> Result<usize, broadcast::error::SendError<SignEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SignEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
