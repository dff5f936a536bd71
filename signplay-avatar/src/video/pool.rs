//! Resource Pool
//!
//! Owns one loaded clip per sign identifier and hands out independent clones.
//!
//! - Concurrent `preload` calls for the same sign coalesce into one load
//! - At most `max_concurrent_loads` loads run at once; further requests wait
//!   for a slot in arrival order
//! - A missing or broken clip resolves as `loaded: false`, never as an error.
//!   Only `get_clone` on a never-loaded sign fails, since there is nothing
//!   to copy
//! - Entries live until `dispose()`; there is no eviction

use super::element::{ClonedVideo, MediaFlags, VideoElement, VideoMetadata};
use super::loader::VideoLoader;
use super::resolver::SourceResolver;
use crate::config::PoolSettings;
use crate::error::{Error, Result};
use crate::lock;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use signplay_common::events::{EventBus, SignEvent};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, info, warn};

/// Snapshot of one pooled resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub sign_id: String,
    pub source_uri: String,
    pub loaded: bool,
    pub error_message: Option<String>,
    /// Known only once loaded
    pub metadata: Option<VideoMetadata>,
}

impl Resource {
    fn loaded(sign_id: &str, source_uri: &str, metadata: VideoMetadata) -> Self {
        Self {
            sign_id: sign_id.to_string(),
            source_uri: source_uri.to_string(),
            loaded: true,
            error_message: None,
            metadata: Some(metadata),
        }
    }

    fn failed(sign_id: &str, source_uri: &str, message: String) -> Self {
        Self {
            sign_id: sign_id.to_string(),
            source_uri: source_uri.to_string(),
            loaded: false,
            error_message: Some(message),
            metadata: None,
        }
    }
}

/// Preload progress snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PreloadStatus {
    /// Known signs, including loads still in flight
    pub total: usize,
    pub loaded: usize,
    pub failed: usize,
    /// Loaded share of `total`, 0.0 when empty
    pub percentage: f64,
}

/// Cached entry: the public snapshot plus the pool-owned element
struct PooledResource {
    info: Resource,
    element: Mutex<Option<VideoElement>>,
}

type Slot = Arc<OnceCell<Arc<PooledResource>>>;

/// Clip cache with bounded concurrent loading
pub struct ResourcePool {
    settings: PoolSettings,
    loader: Arc<dyn VideoLoader>,
    resolver: Arc<dyn SourceResolver>,

    /// One slot per sign; an uninitialized slot is a load in flight
    entries: Mutex<HashMap<String, Slot>>,

    /// Load concurrency cap
    load_slots: Semaphore,

    /// Loads currently holding a slot
    in_flight: AtomicUsize,

    events: Option<EventBus>,
}

impl ResourcePool {
    pub fn new(
        settings: PoolSettings,
        loader: Arc<dyn VideoLoader>,
        resolver: Arc<dyn SourceResolver>,
    ) -> Self {
        let load_slots = Semaphore::new(settings.max_concurrent_loads.max(1));
        Self {
            settings,
            loader,
            resolver,
            entries: Mutex::new(HashMap::new()),
            load_slots,
            in_flight: AtomicUsize::new(0),
            events: None,
        }
    }

    /// Report preload progress on the given bus
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// URI the configured resolver assigns to a sign
    pub fn source_uri(&self, sign_id: &str) -> String {
        self.resolver.resolve(sign_id)
    }

    /// Load a sign's clip, or return the cached result
    ///
    /// Never fails: a timeout or loader error yields `loaded: false` with an
    /// error message, and that result stays cached.
    pub async fn preload(&self, sign_id: &str, source_uri: &str) -> Resource {
        let slot = self.slot(sign_id);
        let pooled = slot
            .get_or_init(|| self.load_resource(sign_id, source_uri))
            .await;
        if !self.holds(sign_id, &slot) {
            Self::release_orphan(sign_id, pooled);
        }
        pooled.info.clone()
    }

    /// Preload using the resolver's URI for the sign
    pub async fn preload_sign(&self, sign_id: &str) -> Resource {
        let uri = self.resolver.resolve(sign_id);
        self.preload(sign_id, &uri).await
    }

    /// Detached speculative preload
    ///
    /// Returns immediately. A failed load is logged and otherwise ignored.
    /// Does nothing for signs already cached or in flight, or when called
    /// outside a tokio runtime.
    pub fn preload_hint(self: &Arc<Self>, sign_id: &str) {
        if self.is_known(sign_id) {
            return;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("preload hint for '{}' ignored: no runtime", sign_id);
                return;
            }
        };

        let pool = Arc::clone(self);
        let sign_id = sign_id.to_string();
        handle.spawn(async move {
            let resource = pool.preload_sign(&sign_id).await;
            if !resource.loaded {
                debug!(
                    "Speculative preload of '{}' failed: {}",
                    sign_id,
                    resource.error_message.as_deref().unwrap_or("unknown error")
                );
            }
        });
    }

    /// Preload priority signs fully, then the rest in paced batches
    ///
    /// Priority signs missing from `sources` use the resolver's URI.
    pub async fn preload_batch(
        &self,
        sources: &BTreeMap<String, String>,
        priority_ids: &[String],
    ) -> PreloadStatus {
        let priority: Vec<(String, String)> = priority_ids
            .iter()
            .map(|id| {
                let uri = sources
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| self.resolver.resolve(id));
                (id.clone(), uri)
            })
            .collect();

        if !priority.is_empty() {
            info!("Preloading {} priority signs", priority.len());
            join_all(priority.iter().map(|(id, uri)| self.preload(id, uri))).await;
            self.emit_progress();
        }

        let priority_set: HashSet<&String> = priority_ids.iter().collect();
        let remainder: Vec<(&String, &String)> = sources
            .iter()
            .filter(|(id, _)| !priority_set.contains(id))
            .collect();

        let batches: Vec<_> = remainder.chunks(self.settings.batch_size.max(1)).collect();
        let batch_count = batches.len();
        for (index, batch) in batches.into_iter().enumerate() {
            debug!("Preload batch {}/{} ({} signs)", index + 1, batch_count, batch.len());
            join_all(batch.iter().map(|(id, uri)| self.preload(id, uri))).await;
            self.emit_progress();

            if index + 1 < batch_count && !self.settings.batch_pause.is_zero() {
                tokio::time::sleep(self.settings.batch_pause).await;
            }
        }

        let status = self.get_preload_status();
        info!(
            "Preload complete: {}/{} loaded, {} failed",
            status.loaded, status.total, status.failed
        );
        status
    }

    /// Independent playable copy of a loaded clip
    pub fn get_clone(&self, sign_id: &str) -> Result<ClonedVideo> {
        let pooled = self
            .cached(sign_id)
            .ok_or_else(|| Error::ResourceUnavailable(format!("'{}' not cached", sign_id)))?;

        if !pooled.info.loaded {
            return Err(Error::ResourceUnavailable(format!(
                "'{}' failed to load: {}",
                sign_id,
                pooled.info.error_message.as_deref().unwrap_or("unknown error")
            )));
        }

        let duplicate = lock(&pooled.element).as_ref().map(VideoElement::duplicate);
        duplicate
            .map(|element| ClonedVideo::new(sign_id, element))
            .ok_or_else(|| Error::ResourceUnavailable(format!("'{}' has no element", sign_id)))
    }

    /// True when the sign's clip is cached and loaded
    pub fn is_loaded(&self, sign_id: &str) -> bool {
        self.cached(sign_id).is_some_and(|p| p.info.loaded)
    }

    /// Cached resource snapshot, `None` if never requested or still loading
    pub fn resource(&self, sign_id: &str) -> Option<Resource> {
        self.cached(sign_id).map(|p| p.info.clone())
    }

    /// Progress snapshot
    pub fn get_preload_status(&self) -> PreloadStatus {
        let entries = lock(&self.entries);
        let total = entries.len();
        let (mut loaded, mut failed) = (0, 0);
        for slot in entries.values() {
            match slot.get() {
                Some(p) if p.info.loaded => loaded += 1,
                Some(_) => failed += 1,
                None => {}
            }
        }
        let percentage = if total == 0 {
            0.0
        } else {
            loaded as f64 / total as f64 * 100.0
        };
        PreloadStatus {
            total,
            loaded,
            failed,
            percentage,
        }
    }

    /// Loads currently holding a concurrency slot
    pub fn in_flight_loads(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stop and release every pooled element and clear the cache
    ///
    /// Idempotent. Clones already handed out are unaffected.
    pub fn dispose(&self) {
        let drained: Vec<Slot> = lock(&self.entries).drain().map(|(_, slot)| slot).collect();
        let mut released = 0;
        for slot in drained {
            if let Some(pooled) = slot.get() {
                if let Some(mut element) = lock(&pooled.element).take() {
                    element.release();
                    released += 1;
                }
            }
        }
        if released > 0 {
            info!("Resource pool disposed ({} elements released)", released);
        }
    }

    fn slot(&self, sign_id: &str) -> Slot {
        let mut entries = lock(&self.entries);
        Arc::clone(
            entries
                .entry(sign_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        )
    }

    /// False once `dispose` (or a later reload) replaced the sign's slot
    fn holds(&self, sign_id: &str, slot: &Slot) -> bool {
        lock(&self.entries)
            .get(sign_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    // A load that finished after dispose has no owner left
    fn release_orphan(sign_id: &str, pooled: &PooledResource) {
        if let Some(mut element) = lock(&pooled.element).take() {
            element.release();
            debug!("Released '{}' loaded after dispose", sign_id);
        }
    }

    fn is_known(&self, sign_id: &str) -> bool {
        lock(&self.entries).contains_key(sign_id)
    }

    fn cached(&self, sign_id: &str) -> Option<Arc<PooledResource>> {
        let entries = lock(&self.entries);
        entries.get(sign_id).and_then(|slot| slot.get().cloned())
    }

    async fn load_resource(&self, sign_id: &str, source_uri: &str) -> Arc<PooledResource> {
        let _permit = match self.load_slots.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return Arc::new(PooledResource {
                    info: Resource::failed(sign_id, source_uri, "resource pool closed".to_string()),
                    element: Mutex::new(None),
                })
            }
        };

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        debug!("Loading '{}' from {}", sign_id, source_uri);
        let outcome = tokio::time::timeout(self.settings.load_timeout, self.loader.load(source_uri)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let pooled = match outcome {
            Ok(Ok(metadata)) => {
                let flags = MediaFlags {
                    muted: self.settings.muted,
                    plays_inline: self.settings.plays_inline,
                    cross_origin: self.settings.cross_origin.clone(),
                };
                PooledResource {
                    info: Resource::loaded(sign_id, source_uri, metadata),
                    element: Mutex::new(Some(VideoElement::new(source_uri, flags, metadata))),
                }
            }
            Ok(Err(e)) => {
                warn!("Failed to load '{}': {:#}", sign_id, e);
                PooledResource {
                    info: Resource::failed(sign_id, source_uri, e.to_string()),
                    element: Mutex::new(None),
                }
            }
            Err(_) => {
                let message = format!(
                    "load timed out after {}ms",
                    self.settings.load_timeout.as_millis()
                );
                warn!("Failed to load '{}': {}", sign_id, message);
                PooledResource {
                    info: Resource::failed(sign_id, source_uri, message),
                    element: Mutex::new(None),
                }
            }
        };

        Arc::new(pooled)
    }

    fn emit_progress(&self) {
        if let Some(events) = &self.events {
            let status = self.get_preload_status();
            events.emit_lossy(SignEvent::PreloadProgress {
                total: status.total,
                loaded: status.loaded,
                failed: status.failed,
                percentage: status.percentage,
                timestamp: signplay_common::time::now(),
            });
        }
    }
}

impl Drop for ResourcePool {
    fn drop(&mut self) {
        self.dispose();
    }
}
