//! Avatar State Machine
//!
//! Drives one sign at a time through its lifecycle:
//!
//! ```text
//! NEUTRAL -> LOADING -> TRANSITIONING_IN -> SIGNING -> TRANSITIONING_OUT -> NEUTRAL
//!                                             |                 |
//!                                             +---> (next sign) +---> LOADING
//! ```
//!
//! with ERROR reachable from every active state. A chained sign leaves the
//! previous one through TRANSITIONING_OUT straight into LOADING, skipping the
//! neutral bounce.
//!
//! **Concurrency:** transitions hold a slot for their whole lifecycle. Strict
//! mode has one slot, so a second caller waits for the first to finish.
//! Parallel mode has `parallel_batch_size` slots and implies unchecked
//! transitions, since overlapping lifecycles cannot follow one table.
//!
//! **Cancellation:** `stop()` lets the in-flight transition finish and
//! discards callers still waiting. `force_reset()` also abandons the
//! in-flight transition at its next suspension point.

use super::hooks::PlaybackHooks;
use super::prediction::SignPredictor;
use super::timing::{SpeedContext, SpeedModeSelector, TimingPolicy};
use super::types::{SignOptions, TransitionResult};
use crate::config::{MachineSettings, TimingSettings};
use crate::error::{Error, HookPhase, Result};
use crate::lock;
use crate::state::{AvatarRuntimeState, SharedAvatarState};
use crate::video::{Resource, ResourcePool};
use futures::future::join_all;
use signplay_common::events::{AvatarState, EventBus, SpeedMode};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Single-avatar playback state machine
pub struct AvatarStateMachine {
    settings: MachineSettings,
    timing: TimingPolicy,
    selector: SpeedModeSelector,
    pool: Arc<ResourcePool>,
    state: Arc<SharedAvatarState>,
    predictor: Mutex<SignPredictor>,

    /// Transition slots (1 in strict mode)
    slots: Semaphore,
    slot_count: u32,

    /// Callers waiting for a slot
    waiting: AtomicUsize,

    /// Bumped by `stop()`; waiting callers from an older epoch are discarded
    stop_epoch: AtomicU64,

    /// Bumped by `force_reset()`; in-flight transitions abandon at their
    /// next suspension point
    reset_epoch: AtomicU64,

    /// Pending ERROR -> NEUTRAL self-heal
    recovery: Mutex<Option<JoinHandle<()>>>,
}

/// Epochs captured when a transition was requested
#[derive(Debug, Clone, Copy)]
struct Ticket {
    stop_epoch: u64,
    reset_epoch: u64,
}

impl AvatarStateMachine {
    pub fn new(settings: MachineSettings, timing: TimingSettings, pool: Arc<ResourcePool>) -> Self {
        Self::build(settings, timing, pool, None)
    }

    /// Create a machine that broadcasts state changes on `events`
    pub fn with_events(
        settings: MachineSettings,
        timing: TimingSettings,
        pool: Arc<ResourcePool>,
        events: EventBus,
    ) -> Self {
        Self::build(settings, timing, pool, Some(events))
    }

    fn build(
        settings: MachineSettings,
        timing: TimingSettings,
        pool: Arc<ResourcePool>,
        events: Option<EventBus>,
    ) -> Self {
        let unchecked = settings.unchecked_transitions || settings.parallel_mode;
        let slot_count = if settings.parallel_mode {
            u32::try_from(settings.parallel_batch_size.max(1)).unwrap_or(u32::MAX)
        } else {
            1
        };

        info!(
            "Avatar state machine ready (mode={}, slots={})",
            if settings.parallel_mode { "parallel" } else { "strict" },
            slot_count
        );

        Self {
            timing: TimingPolicy::new(timing),
            selector: SpeedModeSelector::from_settings(&settings),
            predictor: Mutex::new(SignPredictor::from_settings(&settings)),
            state: Arc::new(SharedAvatarState::new(unchecked, events)),
            slots: Semaphore::new(slot_count as usize),
            slot_count,
            waiting: AtomicUsize::new(0),
            stop_epoch: AtomicU64::new(0),
            reset_epoch: AtomicU64::new(0),
            recovery: Mutex::new(None),
            settings,
            pool,
        }
    }

    // ========================================
    // State queries
    // ========================================

    pub fn current_state(&self) -> AvatarState {
        self.state.current()
    }

    pub fn snapshot(&self) -> AvatarRuntimeState {
        self.state.snapshot()
    }

    pub fn is_transitioning(&self) -> bool {
        self.state.current().is_transitioning()
    }

    /// True when `to` would be accepted from the current state
    pub fn can_transition(&self, to: AvatarState) -> bool {
        self.state.is_unchecked() || self.state.current().can_transition_to(to)
    }

    /// Validated state change
    ///
    /// Fails with `InvalidTransition` and leaves the state unchanged when
    /// `to` is not reachable from the current state (strict mode only).
    pub fn set_state(&self, to: AvatarState) -> Result<()> {
        self.state.transition(to).map(|_| ())
    }

    pub fn pool(&self) -> &Arc<ResourcePool> {
        &self.pool
    }

    pub fn timing(&self) -> &TimingPolicy {
        &self.timing
    }

    pub fn is_parallel(&self) -> bool {
        self.settings.parallel_mode
    }

    pub fn parallel_batch_size(&self) -> usize {
        self.slot_count as usize
    }

    /// Likely follow-up to `sign_id`
    pub fn predict_next(&self, sign_id: &str) -> Option<String> {
        lock(&self.predictor).predict_next(sign_id)
    }

    /// Recent signs, oldest first
    pub fn history(&self) -> Vec<String> {
        lock(&self.predictor).history()
    }

    /// Speed mode a request would run with right now
    pub fn speed_mode_for(&self, sign_id: &str, options: &SignOptions) -> SpeedMode {
        let previous = self.state.current_sign_id();
        self.select_speed(sign_id, options, previous.as_deref())
    }

    // ========================================
    // Preloading
    // ========================================

    /// Load a sign's clip through the pool (never fails)
    pub async fn preload_sign(&self, sign_id: &str) -> Resource {
        self.pool.preload_sign(sign_id).await
    }

    /// Detached speculative preload
    pub fn preload_hint(&self, sign_id: &str) {
        self.pool.preload_hint(sign_id);
    }

    // ========================================
    // Transitions
    // ========================================

    /// Run one sign through its full lifecycle
    ///
    /// Waits for a free slot first. A hook failure or invalid transition
    /// moves the machine into ERROR, schedules the self-heal timer and is
    /// returned to the caller. A missing clip is not a failure: hooks still
    /// fire and `on_sign_start` receives no video.
    pub async fn transition_to_sign(
        &self,
        sign_id: &str,
        hooks: &dyn PlaybackHooks,
        options: &SignOptions,
    ) -> Result<TransitionResult> {
        if sign_id.trim().is_empty() {
            return Err(Error::BadRequest("sign identifier must not be empty".to_string()));
        }

        let ticket = self.ticket();

        let permit = {
            let _waiting = WaitingGuard::enter(&self.waiting);
            self.slots.acquire().await
        };
        let _permit = permit.map_err(|_| Error::Cancelled("state machine closed".to_string()))?;

        if self.stop_epoch.load(Ordering::SeqCst) != ticket.stop_epoch
            || self.reset_epoch.load(Ordering::SeqCst) != ticket.reset_epoch
        {
            debug!("Discarding '{}': machine stopped while waiting", sign_id);
            return Err(Error::Cancelled(format!("'{}' discarded by stop", sign_id)));
        }

        self.cancel_recovery();

        let hooks: &dyn PlaybackHooks = match &options.hooks {
            Some(custom) => custom.as_ref(),
            None => hooks,
        };

        match self.run_lifecycle(sign_id, hooks, options, ticket).await {
            Ok(result) => Ok(result),
            Err(Error::Cancelled(message)) => Err(Error::Cancelled(message)),
            Err(e) => {
                self.enter_error(sign_id, &e);
                Err(e)
            }
        }
    }

    /// Run several signs as one batch
    ///
    /// Strict mode plays them in order. Parallel mode dispatches chunks of
    /// `parallel_batch_size` concurrently; results keep submission order but
    /// completion order follows the hooks.
    pub async fn transition_batch(
        &self,
        sign_ids: &[String],
        hooks: &dyn PlaybackHooks,
        options: &SignOptions,
    ) -> Vec<Result<TransitionResult>> {
        let total = sign_ids.len();
        let options_for = |index: usize| SignOptions {
            batch_size: total,
            chain_next: index + 1 < total,
            ..options.clone()
        };

        let mut results = Vec::with_capacity(total);
        if self.settings.parallel_mode {
            for (chunk_index, chunk) in sign_ids.chunks(self.parallel_batch_size()).enumerate() {
                let base = chunk_index * self.parallel_batch_size();
                let chunk_options: Vec<SignOptions> =
                    (0..chunk.len()).map(|i| options_for(base + i)).collect();
                let chunk_results = join_all(
                    chunk
                        .iter()
                        .zip(chunk_options.iter())
                        .map(|(id, opts)| self.transition_to_sign(id, hooks, opts)),
                )
                .await;
                results.extend(chunk_results);
            }
        } else {
            for (index, id) in sign_ids.iter().enumerate() {
                let opts = options_for(index);
                results.push(self.transition_to_sign(id, hooks, &opts).await);
            }
        }
        results
    }

    /// Bring a machine parked in SIGNING back to NEUTRAL
    ///
    /// Waits for any in-flight transition. No-op in any other state.
    pub async fn settle(&self) -> Result<()> {
        let _permits = self
            .slots
            .acquire_many(self.slot_count)
            .await
            .map_err(|_| Error::Cancelled("state machine closed".to_string()))?;
        if self.state.current() == AvatarState::Signing {
            self.state.transition(AvatarState::TransitioningOut)?;
            self.state.transition(AvatarState::Neutral)?;
        }
        Ok(())
    }

    /// Let the in-flight transition finish, discard waiting callers and
    /// force NEUTRAL
    pub async fn stop(&self) {
        self.stop_epoch.fetch_add(1, Ordering::SeqCst);
        match self.slots.acquire_many(self.slot_count).await {
            Ok(_permits) => {
                self.cancel_recovery();
                self.state.force(AvatarState::Neutral);
                info!("Avatar state machine stopped");
            }
            Err(_) => warn!("Stop on closed state machine"),
        }
    }

    /// Immediate unconditional reset
    ///
    /// Discards waiting callers, abandons the in-flight transition at its
    /// next suspension point, clears prediction history and returns to the
    /// initial NEUTRAL state.
    pub fn force_reset(&self) {
        self.stop_epoch.fetch_add(1, Ordering::SeqCst);
        self.reset_epoch.fetch_add(1, Ordering::SeqCst);
        self.cancel_recovery();
        lock(&self.predictor).clear();
        self.state.reset();
        warn!("Avatar state machine force reset");
    }

    /// Run the ERROR -> NEUTRAL self-heal now instead of waiting for the timer
    pub fn recover_now(&self) -> bool {
        self.cancel_recovery();
        self.state.recover()
    }

    /// Cancel a pending self-heal; the machine stays in ERROR
    pub fn cancel_recovery(&self) {
        if let Some(handle) = lock(&self.recovery).take() {
            handle.abort();
        }
    }

    /// True while a self-heal timer is pending
    pub fn recovery_pending(&self) -> bool {
        lock(&self.recovery).as_ref().is_some_and(|h| !h.is_finished())
    }

    // ========================================
    // Lifecycle internals
    // ========================================

    fn ticket(&self) -> Ticket {
        Ticket {
            stop_epoch: self.stop_epoch.load(Ordering::SeqCst),
            reset_epoch: self.reset_epoch.load(Ordering::SeqCst),
        }
    }

    async fn run_lifecycle(
        &self,
        sign_id: &str,
        hooks: &dyn PlaybackHooks,
        options: &SignOptions,
        ticket: Ticket,
    ) -> Result<TransitionResult> {
        let started = Instant::now();
        let entry_state = self.state.current();
        let previous_sign = self.state.current_sign_id();
        let mode = self.select_speed(sign_id, options, previous_sign.as_deref());

        debug!("Transition to '{}' from {} (mode={})", sign_id, entry_state, mode);

        // Leave the sign still on screen
        if entry_state == AvatarState::Signing {
            if let Some(previous) = previous_sign.as_deref() {
                self.state.transition(AvatarState::TransitioningOut)?;
                call_hook(sign_id, HookPhase::TransitionOut, hooks.on_transition_out(previous, sign_id))
                    .await?;
                self.checkpoint(ticket)?;
                self.wait(self.timing.transition_out(mode), ticket).await?;
            }
        }

        // Loading
        self.state.transition(AvatarState::Loading)?;
        self.state.begin_sign(sign_id);
        if let Some(next) = self.predict_next(sign_id) {
            self.pool.preload_hint(&next);
        }
        call_hook(sign_id, HookPhase::LoadStart, hooks.on_load_start(sign_id)).await?;
        self.checkpoint(ticket)?;

        let resource = self.pool.preload_sign(sign_id).await;
        self.checkpoint(ticket)?;
        let mut video = match self.pool.get_clone(sign_id) {
            Ok(video) => Some(video),
            Err(e) => {
                warn!("No clip for '{}', showing placeholder: {}", sign_id, e);
                None
            }
        };

        // Transitioning in
        self.state.transition(AvatarState::TransitioningIn)?;
        call_hook(
            sign_id,
            HookPhase::TransitionIn,
            hooks.on_transition_in(sign_id, previous_sign.as_deref()),
        )
        .await?;
        self.checkpoint(ticket)?;
        if !TimingPolicy::skips_transition_in_wait(mode) {
            self.wait(self.timing.transition_in(mode), ticket).await?;
        }

        // Signing
        self.state.transition(AvatarState::Signing)?;
        if let Some(video) = video.as_mut() {
            video.play();
        }
        call_hook(sign_id, HookPhase::SignStart, hooks.on_sign_start(sign_id, video.as_ref())).await?;
        self.checkpoint(ticket)?;

        let hold = self.timing.sign_hold(sign_id, mode);
        self.wait(hold, ticket).await?;
        if let Some(video) = video.as_mut() {
            video.advance(hold);
        }

        call_hook(sign_id, HookPhase::SignEnd, hooks.on_sign_end(sign_id)).await?;
        self.checkpoint(ticket)?;
        drop(video);

        lock(&self.predictor).record(sign_id);

        let chained = options.chain_next || self.waiting.load(Ordering::SeqCst) > 0;
        if !chained {
            self.state.transition(AvatarState::TransitioningOut)?;
            self.state.transition(AvatarState::Neutral)?;
        }

        let result = TransitionResult {
            sign_id: sign_id.to_string(),
            previous_sign_id: previous_sign,
            speed_mode: mode,
            resource_loaded: resource.loaded,
            hold,
            elapsed: started.elapsed(),
            final_state: self.state.current(),
        };
        debug!(
            "Transition to '{}' complete in {}ms (final={})",
            sign_id,
            result.elapsed.as_millis(),
            result.final_state
        );
        Ok(result)
    }

    fn select_speed(&self, sign_id: &str, options: &SignOptions, previous: Option<&str>) -> SpeedMode {
        let common_sequence = previous
            .is_some_and(|prev| lock(&self.predictor).is_common_sequence(prev, sign_id));
        self.selector.select(&SpeedContext {
            sign_id,
            requested: options.speed,
            instant_mode: options.instant_mode,
            fast_mode: options.fast_mode,
            batch_size: options.batch_size,
            cached: self.pool.is_loaded(sign_id),
            common_sequence,
        })
    }

    async fn wait(&self, duration: Duration, ticket: Ticket) -> Result<()> {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
        self.checkpoint(ticket)
    }

    fn checkpoint(&self, ticket: Ticket) -> Result<()> {
        if self.reset_epoch.load(Ordering::SeqCst) != ticket.reset_epoch {
            return Err(Error::Cancelled("state machine reset".to_string()));
        }
        Ok(())
    }

    /// Move into ERROR along table edges and arm the self-heal timer
    ///
    /// TRANSITIONING_OUT has no ERROR edge, so that case passes through NEUTRAL.
    fn enter_error(&self, sign_id: &str, cause: &Error) {
        let message = cause.to_string();
        error!("Transition to '{}' failed: {}", sign_id, message);

        let current = self.state.current();
        if current != AvatarState::Error && self.state.transition(AvatarState::Error).is_err() {
            if let Err(e) = self.state.transition(AvatarState::Neutral) {
                debug!("No route to ERROR from {}: {}", current, e);
            }
            self.state.force(AvatarState::Error);
        }
        self.state.record_error(sign_id, &message);

        if let Some(delay) = self.settings.error_recovery {
            self.schedule_recovery(delay);
        }
    }

    fn schedule_recovery(&self, delay: Duration) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => return,
        };
        let state = Arc::clone(&self.state);
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            state.recover();
        });
        if let Some(previous) = lock(&self.recovery).replace(task) {
            previous.abort();
        }
    }
}

/// Counts a caller as waiting for a slot until dropped
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for AvatarStateMachine {
    fn drop(&mut self) {
        self.cancel_recovery();
    }
}

async fn call_hook<F>(sign_id: &str, phase: HookPhase, hook: F) -> Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    hook.await.map_err(|e| Error::Hook {
        sign_id: sign_id.to_string(),
        phase,
        message: format!("{:#}", e),
    })
}
