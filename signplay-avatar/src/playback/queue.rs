//! Sequencing Queue
//!
//! Turns sign identifiers arriving incrementally into one ordered run
//! against the avatar state machine.
//!
//! Items are never popped: the queue is an ordered list consumed from a
//! cursor, so history stays inspectable mid-run. Only `clear()` removes
//! items.
//!
//! **Drain loop:** one detached task per run. Pause is cooperative: the loop
//! checks the flag between items and parks the avatar in NEUTRAL while it
//! waits, so a sign is never cut off mid-hold.

use super::hooks::PlaybackHooks;
use super::state_machine::AvatarStateMachine;
use super::types::{SignOptions, TransitionResult};
use crate::config::QueueSettings;
use crate::error::{Error, Result};
use crate::lock;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use signplay_common::events::{EventBus, QueueCounts, QueueItemStatus, SignEvent};
use signplay_common::sign::{is_glyph, SignId};
use signplay_common::time::duration_to_millis;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One unit of queued work
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub sign_id: String,
    #[serde(skip)]
    pub options: SignOptions,
    /// Shared by items submitted in one `add_signs` call
    pub batch_id: Option<Uuid>,
    pub batch_size: usize,
    pub status: QueueItemStatus,
    pub retry_count: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error_message: Option<String>,
    #[serde(skip)]
    started_at: Option<Instant>,
}

impl QueueItem {
    fn new(sign_id: String, options: SignOptions, batch_id: Option<Uuid>, batch_size: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            sign_id,
            options,
            batch_id,
            batch_size,
            status: QueueItemStatus::Pending,
            retry_count: 0,
            start_time: None,
            end_time: None,
            duration_ms: None,
            error_message: None,
            started_at: None,
        }
    }

    /// Attempts made so far, including the one in progress
    pub fn attempts(&self) -> u32 {
        self.retry_count + 1
    }
}

/// Derived queue snapshot
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub counts: QueueCounts,
    pub percentage: f64,
    pub current_item: Option<QueueItem>,
    pub cursor: usize,
    pub is_running: bool,
    pub is_paused: bool,
    pub is_processing: bool,
    pub estimated_remaining_ms: u64,
}

/// Sequencing queue over one avatar state machine
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct SignQueue {
    shared: Arc<QueueShared>,
}

struct QueueShared {
    machine: Arc<AvatarStateMachine>,
    hooks: Arc<dyn PlaybackHooks>,
    settings: QueueSettings,
    events: Option<EventBus>,
    inner: Mutex<QueueInner>,

    /// Bumped on every running/paused/processing change
    signal: watch::Sender<u64>,
}

#[derive(Default)]
struct QueueInner {
    items: Vec<QueueItem>,
    cursor: usize,
    running: bool,
    paused: bool,
    /// A drain task exists
    processing: bool,
    run_started: Option<Instant>,
    /// Completed item durations in the current run
    completed_ms: u64,
    completed_count: u64,
}

impl QueueInner {
    fn counts(&self) -> QueueCounts {
        QueueCounts::from_statuses(self.items.iter().map(|item| item.status))
    }

    fn item_mut(&mut self, id: Uuid) -> Option<&mut QueueItem> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    fn has_pending(&self) -> bool {
        self.cursor < self.items.len()
    }

    /// Move the cursor past the given items; a no-op when they were cleared
    fn advance_past(&mut self, ids: &[Uuid]) {
        while self
            .items
            .get(self.cursor)
            .is_some_and(|item| ids.contains(&item.id))
        {
            self.cursor += 1;
        }
    }

    fn estimated_remaining_ms(&self, fallback: Duration) -> u64 {
        let remaining = self
            .items
            .iter()
            .filter(|item| !item.status.is_finished())
            .count() as u64;
        let average = if self.completed_count > 0 {
            self.completed_ms / self.completed_count
        } else {
            duration_to_millis(fallback)
        };
        remaining * average
    }
}

/// How one item ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Completed,
    Failed,
    /// Abandoned because the queue stopped or the item was cleared
    Abandoned,
}

/// Next unit of work picked by the drain loop
struct Work {
    id: Uuid,
    index: usize,
    sign_id: String,
    options: SignOptions,
}

impl SignQueue {
    pub fn new(
        machine: Arc<AvatarStateMachine>,
        hooks: Arc<dyn PlaybackHooks>,
        settings: QueueSettings,
    ) -> Self {
        Self::build(machine, hooks, settings, None)
    }

    /// Create a queue reporting on `events`
    pub fn with_events(
        machine: Arc<AvatarStateMachine>,
        hooks: Arc<dyn PlaybackHooks>,
        settings: QueueSettings,
        events: EventBus,
    ) -> Self {
        Self::build(machine, hooks, settings, Some(events))
    }

    fn build(
        machine: Arc<AvatarStateMachine>,
        hooks: Arc<dyn PlaybackHooks>,
        settings: QueueSettings,
        events: Option<EventBus>,
    ) -> Self {
        let (signal, _) = watch::channel(0);
        Self {
            shared: Arc::new(QueueShared {
                machine,
                hooks,
                settings,
                events,
                inner: Mutex::new(QueueInner::default()),
                signal,
            }),
        }
    }

    pub fn machine(&self) -> &Arc<AvatarStateMachine> {
        &self.shared.machine
    }

    // ========================================
    // Adding work
    // ========================================

    /// Append one sign; starts the queue when idle and `auto_start` is set
    pub fn add_sign(&self, sign_id: &str, options: SignOptions) -> Result<Uuid> {
        let sign_id = SignId::new(sign_id)?;
        let item = QueueItem::new(sign_id.into(), options, None, 1);
        let id = item.id;

        let position = {
            let mut inner = lock(&self.shared.inner);
            inner.items.push(item);
            inner.items.len() - 1
        };
        debug!("Queued sign at position {}", position);

        self.maybe_auto_start();
        Ok(id)
    }

    /// Append several signs in order
    ///
    /// Two or more signs form a batch: shorter inter-item delays, and the
    /// batch size biases speed-mode selection. Nothing is queued when any
    /// identifier is invalid.
    pub fn add_signs<S: AsRef<str>>(&self, sign_ids: &[S], options: SignOptions) -> Result<Vec<Uuid>> {
        let ids = sign_ids
            .iter()
            .map(|id| SignId::new(id.as_ref()))
            .collect::<signplay_common::Result<Vec<_>>>()?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let batch_size = ids.len();
        let batch_id = (batch_size >= 2).then(Uuid::new_v4);
        let items: Vec<QueueItem> = ids
            .into_iter()
            .map(|id| {
                let options = SignOptions {
                    batch_size,
                    ..options.clone()
                };
                QueueItem::new(id.into(), options, batch_id, batch_size)
            })
            .collect();
        let item_ids = items.iter().map(|item| item.id).collect();

        lock(&self.shared.inner).items.extend(items);
        debug!("Queued batch of {} signs", batch_size);

        self.maybe_auto_start();
        Ok(item_ids)
    }

    fn maybe_auto_start(&self) {
        if self.shared.settings.auto_start && !lock(&self.shared.inner).paused {
            self.start();
        }
    }

    // ========================================
    // Run control
    // ========================================

    /// Begin draining from the cursor
    ///
    /// Returns false (and does nothing) when already running, when nothing
    /// is pending, or outside a tokio runtime.
    pub fn start(&self) -> bool {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("Queue start ignored: no runtime");
                return false;
            }
        };

        let total = {
            let mut inner = lock(&self.shared.inner);
            if inner.running || inner.processing || !inner.has_pending() {
                return false;
            }
            inner.running = true;
            inner.processing = true;
            inner.run_started = Some(Instant::now());
            inner.completed_ms = 0;
            inner.completed_count = 0;
            inner.items.len()
        };
        self.shared.notify();

        info!("Queue started ({} items)", total);
        self.shared.emit(SignEvent::QueueStarted {
            total,
            timestamp: Utc::now(),
        });

        let shared = Arc::clone(&self.shared);
        handle.spawn(async move { shared.drain().await });
        true
    }

    /// Stop after the current item; the avatar returns to NEUTRAL
    pub fn pause(&self) -> bool {
        let position = {
            let mut inner = lock(&self.shared.inner);
            if inner.paused {
                return false;
            }
            inner.paused = true;
            inner.cursor
        };
        self.shared.notify();
        info!("Queue paused at position {}", position);
        self.shared.emit(SignEvent::QueuePaused {
            position,
            timestamp: Utc::now(),
        });
        true
    }

    /// Continue from the cursor; starts a run when none is active
    pub fn resume(&self) -> bool {
        let (position, idle) = {
            let mut inner = lock(&self.shared.inner);
            if !inner.paused {
                return false;
            }
            inner.paused = false;
            (inner.cursor, !inner.running)
        };
        self.shared.notify();
        info!("Queue resumed at position {}", position);
        self.shared.emit(SignEvent::QueueResumed {
            position,
            timestamp: Utc::now(),
        });

        if idle {
            self.start();
        }
        true
    }

    /// Stop the run and wait for in-flight work
    ///
    /// The current sign finishes its lifecycle; nothing after it starts. No
    /// drain task outlives this call.
    pub async fn stop(&self) {
        let position = {
            let mut inner = lock(&self.shared.inner);
            let was_active = inner.running || inner.processing;
            inner.running = false;
            inner.paused = false;
            was_active.then_some(inner.cursor)
        };
        self.shared.notify();

        if let Some(position) = position {
            info!("Queue stopping at position {}", position);
            self.shared.emit(SignEvent::QueueStopped {
                position,
                timestamp: Utc::now(),
            });
        }

        self.shared.machine.stop().await;
        self.wait_until_idle().await;
    }

    /// Discard all items and reset the cursor
    ///
    /// Without `stop_current` an in-flight sign finishes and its result is
    /// dropped.
    pub async fn clear(&self, stop_current: bool) {
        if stop_current {
            self.stop().await;
        }

        let discarded = {
            let mut inner = lock(&self.shared.inner);
            let discarded = inner.items.len();
            inner.items.clear();
            inner.cursor = 0;
            discarded
        };
        self.shared.notify();

        info!("Queue cleared ({} items discarded)", discarded);
        self.shared.emit(SignEvent::QueueCleared {
            discarded,
            timestamp: Utc::now(),
        });
    }

    /// Resolve once no drain task is running
    pub async fn wait_until_idle(&self) {
        self.shared.wait_for(|inner| !inner.processing).await;
    }

    // ========================================
    // Inspection
    // ========================================

    pub fn get_status(&self) -> QueueStatus {
        let inner = lock(&self.shared.inner);
        let counts = inner.counts();
        let current_item = inner
            .items
            .iter()
            .find(|item| {
                matches!(
                    item.status,
                    QueueItemStatus::Processing | QueueItemStatus::Retrying
                )
            })
            .or_else(|| inner.items.get(inner.cursor))
            .cloned();

        QueueStatus {
            counts,
            percentage: counts.percentage(),
            current_item,
            cursor: inner.cursor,
            is_running: inner.running,
            is_paused: inner.paused,
            is_processing: inner.processing,
            estimated_remaining_ms: inner
                .estimated_remaining_ms(self.shared.settings.fallback_item_estimate),
        }
    }

    /// Every item still held, finished ones included
    pub fn items(&self) -> Vec<QueueItem> {
        lock(&self.shared.inner).items.clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.shared.inner).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.inner).running
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.shared.inner).paused
    }
}

impl QueueShared {
    fn emit(&self, event: SignEvent) {
        if let Some(events) = &self.events {
            events.emit_lossy(event);
        }
    }

    fn notify(&self) {
        self.signal.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Wait until `condition` holds for the queue state
    async fn wait_for(&self, condition: impl Fn(&QueueInner) -> bool) {
        let mut rx = self.signal.subscribe();
        loop {
            if condition(&*lock(&self.inner)) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep that ends early when the queue stops
    async fn interruptible_sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.wait_for(|inner| !inner.running) => {}
        }
    }

    // ========================================
    // Drain loop
    // ========================================

    async fn drain(self: Arc<Self>) {
        loop {
            self.run_pending().await;
            if let Err(e) = self.machine.settle().await {
                warn!("Failed to return avatar to neutral: {}", e);
            }
            if self.complete_run() {
                break;
            }
        }
    }

    async fn run_pending(&self) {
        loop {
            let paused = {
                let inner = lock(&self.inner);
                if !inner.running || !inner.has_pending() {
                    return;
                }
                inner.paused
            };

            if paused {
                if let Err(e) = self.machine.settle().await {
                    warn!("Failed to return avatar to neutral: {}", e);
                }
                self.wait_for(|inner| !inner.paused || !inner.running).await;
                continue;
            }

            let group = self.next_work();
            if group.is_empty() {
                return;
            }
            let ids: Vec<Uuid> = group.iter().map(|work| work.id).collect();
            let last_sign = group.last().map(|work| work.sign_id.clone());
            let last_batch = group.last().and_then(|work| self.batch_of(work.id));

            let outcomes = if group.len() == 1 {
                let work = &group[0];
                vec![self.process_item(work).await]
            } else {
                debug!("Dispatching {} signs in parallel", group.len());
                join_all(group.iter().map(|work| self.process_item(work))).await
            };

            if outcomes.contains(&ItemOutcome::Abandoned) {
                continue;
            }

            let failed = outcomes.contains(&ItemOutcome::Failed);
            lock(&self.inner).advance_past(&ids);
            self.emit_progress();

            if failed && self.settings.pause_on_error {
                let position = {
                    let mut inner = lock(&self.inner);
                    inner.paused = true;
                    inner.cursor
                };
                self.notify();
                warn!("Queue paused after failed item at position {}", position);
                self.emit(SignEvent::QueuePaused {
                    position,
                    timestamp: Utc::now(),
                });
                continue;
            }

            if let Some(last_sign) = last_sign {
                self.inter_item_delay(&last_sign, last_batch).await;
            }
        }
    }

    /// Pick the next item, or a parallel batch when enabled
    fn next_work(&self) -> Vec<Work> {
        let inner = lock(&self.inner);
        let Some(first) = inner.items.get(inner.cursor) else {
            return Vec::new();
        };

        let parallel = self.settings.parallel_batches
            && self.machine.is_parallel()
            && first.batch_id.is_some();
        let limit = if parallel {
            self.machine.parallel_batch_size()
        } else {
            1
        };

        inner
            .items
            .iter()
            .enumerate()
            .skip(inner.cursor)
            .take_while(|(_, item)| item.batch_id == first.batch_id)
            .take(limit)
            .map(|(index, item)| Work {
                id: item.id,
                index,
                sign_id: item.sign_id.clone(),
                options: item.options.clone(),
            })
            .collect()
    }

    fn batch_of(&self, id: Uuid) -> Option<Uuid> {
        lock(&self.inner)
            .items
            .iter()
            .find(|item| item.id == id)
            .and_then(|item| item.batch_id)
    }

    /// Run one item to completion or exhaustion, retrying in place
    async fn process_item(&self, work: &Work) -> ItemOutcome {
        loop {
            let Some(attempt) = self.mark_processing(work.id) else {
                return ItemOutcome::Abandoned;
            };
            self.emit(SignEvent::SignStarted {
                item_id: work.id,
                sign_id: work.sign_id.clone(),
                index: work.index,
                attempt,
                timestamp: Utc::now(),
            });

            let (next_sign, chain_next) = self.lookahead(work.id);
            if let Some(next_sign) = next_sign {
                self.machine.preload_hint(&next_sign);
            }

            let options = SignOptions {
                chain_next,
                ..work.options.clone()
            };
            let outcome = self
                .machine
                .transition_to_sign(&work.sign_id, self.hooks.as_ref(), &options)
                .await;

            match outcome {
                Ok(result) => {
                    self.mark_completed(work, &result);
                    return ItemOutcome::Completed;
                }
                Err(Error::Cancelled(reason)) => {
                    debug!("Item '{}' abandoned: {}", work.sign_id, reason);
                    self.mark_pending(work.id);
                    return ItemOutcome::Abandoned;
                }
                Err(e) => {
                    if self.mark_retrying(work, &e) {
                        self.interruptible_sleep(self.settings.retry_delay).await;
                        if !lock(&self.inner).running {
                            self.mark_pending(work.id);
                            return ItemOutcome::Abandoned;
                        }
                        continue;
                    }
                    self.mark_failed(work, &e);
                    return ItemOutcome::Failed;
                }
            }
        }
    }

    /// Item after `id` and whether the avatar should stay in SIGNING for it
    fn lookahead(&self, id: Uuid) -> (Option<String>, bool) {
        let inner = lock(&self.inner);
        let next = inner
            .items
            .iter()
            .skip_while(|item| item.id != id)
            .nth(1)
            .filter(|item| item.status == QueueItemStatus::Pending)
            .map(|item| item.sign_id.clone());
        let chain = next.is_some() && inner.running && !inner.paused;
        (next, chain)
    }

    /// Returns the attempt number, or None when the item is gone
    fn mark_processing(&self, id: Uuid) -> Option<u32> {
        let mut inner = lock(&self.inner);
        let item = inner.item_mut(id)?;
        item.status = QueueItemStatus::Processing;
        if item.started_at.is_none() {
            item.started_at = Some(Instant::now());
            item.start_time = Some(Utc::now());
        }
        Some(item.attempts())
    }

    /// Requeue an interrupted item; the next run starts it afresh
    fn mark_pending(&self, id: Uuid) {
        if let Some(item) = lock(&self.inner).item_mut(id) {
            item.status = QueueItemStatus::Pending;
            item.retry_count = 0;
            item.started_at = None;
            item.start_time = None;
            item.error_message = None;
        }
    }

    fn mark_completed(&self, work: &Work, result: &TransitionResult) {
        let duration_ms = {
            let mut inner = lock(&self.inner);
            let Some(item) = inner.item_mut(work.id) else {
                return;
            };
            let duration_ms = item
                .started_at
                .map(|started| duration_to_millis(started.elapsed()))
                .unwrap_or_default();
            item.status = QueueItemStatus::Completed;
            item.end_time = Some(Utc::now());
            item.duration_ms = Some(duration_ms);
            item.error_message = None;
            inner.completed_ms += duration_ms;
            inner.completed_count += 1;
            duration_ms
        };

        debug!("Sign '{}' completed in {}ms", work.sign_id, duration_ms);
        self.emit(SignEvent::SignCompleted {
            item_id: work.id,
            sign_id: work.sign_id.clone(),
            index: work.index,
            duration_ms,
            speed_mode: result.speed_mode,
            resource_loaded: result.resource_loaded,
            timestamp: Utc::now(),
        });
    }

    /// Record a failed attempt; true when another attempt is allowed
    fn mark_retrying(&self, work: &Work, cause: &Error) -> bool {
        let message = cause.to_string();
        let retry_count = {
            let mut inner = lock(&self.inner);
            let Some(item) = inner.item_mut(work.id) else {
                return false;
            };
            if item.retry_count >= self.settings.max_retries {
                return false;
            }
            item.retry_count += 1;
            item.status = QueueItemStatus::Retrying;
            item.error_message = Some(message.clone());
            item.retry_count
        };

        warn!(
            "Sign '{}' failed, retrying ({}/{}): {}",
            work.sign_id, retry_count, self.settings.max_retries, message
        );
        self.emit(SignEvent::SignRetrying {
            item_id: work.id,
            sign_id: work.sign_id.clone(),
            retry_count,
            error: message,
            timestamp: Utc::now(),
        });
        true
    }

    fn mark_failed(&self, work: &Work, cause: &Error) {
        let attempts = {
            let mut inner = lock(&self.inner);
            let Some(item) = inner.item_mut(work.id) else {
                return;
            };
            item.status = QueueItemStatus::Failed;
            item.end_time = Some(Utc::now());
            item.duration_ms = item
                .started_at
                .map(|started| duration_to_millis(started.elapsed()));
            item.error_message = Some(cause.to_string());
            item.attempts()
        };

        let failure = Error::QueueItem {
            sign_id: work.sign_id.clone(),
            attempts,
            message: cause.to_string(),
        };
        error!("{}", failure);
        self.emit(SignEvent::SignFailed {
            item_id: work.id,
            sign_id: work.sign_id.clone(),
            index: work.index,
            attempts,
            error: cause.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Delay before the item after `previous`
    ///
    /// Near zero for a fast sequence (two glyphs, or a known word pair),
    /// shorter within a batch, otherwise the base delay.
    async fn inter_item_delay(&self, previous: &str, previous_batch: Option<Uuid>) {
        let next = {
            let inner = lock(&self.inner);
            if !inner.running || inner.paused {
                return;
            }
            match inner.items.get(inner.cursor) {
                Some(item) => (item.sign_id.clone(), item.batch_id),
                None => return,
            }
        };
        let (next_sign, next_batch) = next;

        let delay = if self.is_fast_sequence(previous, &next_sign) {
            self.settings.fast_sequence_delay
        } else if previous_batch.is_some() && previous_batch == next_batch {
            self.settings.batch_delay
        } else {
            self.settings.base_delay
        };
        self.interruptible_sleep(delay).await;
    }

    fn is_fast_sequence(&self, previous: &str, next: &str) -> bool {
        (is_glyph(previous) && is_glyph(next))
            || self
                .settings
                .common_pairs
                .contains(&(previous.to_string(), next.to_string()))
    }

    fn emit_progress(&self) {
        let (counts, estimated_remaining_ms) = {
            let inner = lock(&self.inner);
            (
                inner.counts(),
                inner.estimated_remaining_ms(self.settings.fallback_item_estimate),
            )
        };
        self.emit(SignEvent::Progress {
            counts,
            percentage: counts.percentage(),
            estimated_remaining_ms,
            timestamp: Utc::now(),
        });
    }

    /// End the run unless work arrived meanwhile; true when the task exits
    fn complete_run(&self) -> bool {
        let mut inner = lock(&self.inner);
        if inner.running && inner.has_pending() {
            return false;
        }

        let finished_naturally = inner.running;
        inner.running = false;
        inner.processing = false;
        if finished_naturally {
            let counts = inner.counts();
            let elapsed_ms = inner
                .run_started
                .map(|started| duration_to_millis(started.elapsed()))
                .unwrap_or_default();
            info!(
                "Queue complete: {} completed, {} failed in {}ms",
                counts.completed, counts.failed, elapsed_ms
            );
            self.emit(SignEvent::QueueCompleted {
                counts,
                elapsed_ms,
                timestamp: Utc::now(),
            });
        }
        drop(inner);
        self.notify();
        true
    }
}
