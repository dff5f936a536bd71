//! Shared fixtures for signplay-avatar integration tests
//!
//! - `MockLoader`: counts loads, simulates latency and broken clips
//! - `RecordingHooks`: records every lifecycle hook with its virtual timestamp
//! - builders wiring a pool, state machine and queue together

#![allow(dead_code)]

use async_trait::async_trait;
use signplay_avatar::config::{MachineSettings, PoolSettings, QueueSettings, TimingSettings};
use signplay_avatar::playback::PlaybackHooks;
use signplay_avatar::video::{ClonedVideo, VideoLoader, VideoMetadata};
use signplay_avatar::{AvatarStateMachine, ResourcePool, SignQueue};
use signplay_common::events::{EventBus, SignEvent};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

// ========================================
// Loader
// ========================================

/// Loader resolving every URI after `delay`, failing URIs that name a
/// broken sign
pub struct MockLoader {
    delay: Duration,
    broken: HashSet<String>,
    metadata: VideoMetadata,
    loads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            broken: HashSet::new(),
            metadata: VideoMetadata::new(2.0, 1280, 720),
            loads: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_broken(mut self, sign_id: &str) -> Self {
        self.broken.insert(uri_for(sign_id));
        self
    }

    /// Underlying load operations started
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// URIs in the order their loads started
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl VideoLoader for MockLoader {
    async fn load(&self, source_uri: &str) -> anyhow::Result<VideoMetadata> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(source_uri.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.broken.contains(source_uri) {
            anyhow::bail!("clip not found: {}", source_uri);
        }
        Ok(self.metadata)
    }
}

pub fn uri_for(sign_id: &str) -> String {
    format!("mem://{}", sign_id)
}

// ========================================
// Hooks
// ========================================

/// One recorded hook invocation
#[derive(Debug, Clone)]
pub struct HookCall {
    pub phase: &'static str,
    pub sign_id: String,
    pub at: Instant,
    /// `on_sign_start` only: a playable clone was supplied
    pub had_video: bool,
}

/// Hooks recording every call; `on_sign_start` fails for configured signs
#[derive(Default)]
pub struct RecordingHooks {
    calls: Mutex<Vec<HookCall>>,
    failing: HashSet<String>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(sign_ids: &[&str]) -> Self {
        Self {
            failing: sign_ids.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<HookCall> {
        self.calls.lock().unwrap().clone()
    }

    /// `(phase, sign)` pairs in call order
    pub fn sequence(&self) -> Vec<(&'static str, String)> {
        self.calls()
            .into_iter()
            .map(|call| (call.phase, call.sign_id))
            .collect()
    }

    pub fn count(&self, phase: &str, sign_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.phase == phase && call.sign_id == sign_id)
            .count()
    }

    /// Signs passed to `on_sign_start`, in order
    pub fn started_signs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.phase == "sign_start")
            .map(|call| call.sign_id)
            .collect()
    }

    /// Most signs observed between `on_sign_start` and `on_sign_end` at once
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn record(&self, phase: &'static str, sign_id: &str, had_video: bool) {
        self.calls.lock().unwrap().push(HookCall {
            phase,
            sign_id: sign_id.to_string(),
            at: Instant::now(),
            had_video,
        });
    }
}

#[async_trait]
impl PlaybackHooks for RecordingHooks {
    async fn on_load_start(&self, sign_id: &str) -> anyhow::Result<()> {
        self.record("load_start", sign_id, false);
        Ok(())
    }

    async fn on_transition_out(&self, previous: &str, _next: &str) -> anyhow::Result<()> {
        self.record("transition_out", previous, false);
        Ok(())
    }

    async fn on_transition_in(&self, next: &str, _previous: Option<&str>) -> anyhow::Result<()> {
        self.record("transition_in", next, false);
        Ok(())
    }

    async fn on_sign_start(&self, sign_id: &str, video: Option<&ClonedVideo>) -> anyhow::Result<()> {
        self.record("sign_start", sign_id, video.is_some());
        if self.failing.contains(sign_id) {
            anyhow::bail!("renderer rejected '{}'", sign_id);
        }
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        Ok(())
    }

    async fn on_sign_end(&self, sign_id: &str) -> anyhow::Result<()> {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.record("sign_end", sign_id, false);
        Ok(())
    }
}

// ========================================
// Builders
// ========================================

pub fn pool(loader: Arc<MockLoader>, settings: PoolSettings) -> Arc<ResourcePool> {
    Arc::new(ResourcePool::new(settings, loader, Arc::new(|id: &str| uri_for(id))))
}

pub fn machine(pool: Arc<ResourcePool>, settings: MachineSettings) -> Arc<AvatarStateMachine> {
    Arc::new(AvatarStateMachine::new(settings, TimingSettings::default(), pool))
}

pub fn machine_with_events(
    pool: Arc<ResourcePool>,
    settings: MachineSettings,
    events: EventBus,
) -> Arc<AvatarStateMachine> {
    Arc::new(AvatarStateMachine::with_events(
        settings,
        TimingSettings::default(),
        pool,
        events,
    ))
}

/// Queue, its machine and the hooks it drives, all reporting on one bus
pub struct Harness {
    pub loader: Arc<MockLoader>,
    pub machine: Arc<AvatarStateMachine>,
    pub hooks: Arc<RecordingHooks>,
    pub queue: SignQueue,
    pub events: EventBus,
}

impl Harness {
    pub fn new(hooks: RecordingHooks, settings: QueueSettings) -> Self {
        let loader = Arc::new(MockLoader::new());
        let events = EventBus::new(1024);
        let machine = machine_with_events(
            pool(Arc::clone(&loader), PoolSettings::default()),
            MachineSettings::default(),
            events.clone(),
        );
        let hooks = Arc::new(hooks);
        let queue = SignQueue::with_events(
            Arc::clone(&machine),
            Arc::clone(&hooks) as Arc<dyn PlaybackHooks>,
            settings,
            events.clone(),
        );
        Self {
            loader,
            machine,
            hooks,
            queue,
            events,
        }
    }
}

/// Everything already on the receiver
pub fn drain_events(rx: &mut broadcast::Receiver<SignEvent>) -> Vec<SignEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wait (on the virtual clock) for the first event matching `predicate`
pub async fn wait_for_event<F>(rx: &mut broadcast::Receiver<SignEvent>, predicate: F) -> SignEvent
where
    F: Fn(&SignEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
