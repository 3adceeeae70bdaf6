//! Buffer cache and loader
//!
//! Decoded assets are cached per asset id for the life of the engine. Failed
//! loads are recorded and retried automatically with exponential backoff until
//! the attempt limit is reached; after that only a manual retry loads again.
//!
//! At most one load per asset is in flight at any time, and a pending retry
//! timer suppresses scheduling-driven loads so a failing asset is not hammered
//! by every scheduling pass.

use crate::audio::decoder::{decode_bytes, extension_hint};
use crate::audio::types::DecodedBuffer;
use crate::config::LoaderSettings;
use crate::error::{Error, Result};
use crate::playback::source::AssetSource;
use chrono::{DateTime, Utc};
use cutline_common::AssetId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Record of an asset that failed to load
#[derive(Debug, Clone, PartialEq)]
pub struct FailedLoadInfo {
    pub asset_id: AssetId,
    pub source_uri: String,
    /// Failed attempts since the last success or manual retry
    pub attempt_count: u32,
    pub last_attempt_at: DateTime<Utc>,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadMode {
    /// Requested by a scheduling pass
    Scheduled,
    /// Fired by a backoff timer
    AutomaticRetry,
    /// Requested by the user; ignores the attempt limit
    Manual,
}

#[derive(Default)]
struct CacheState {
    buffers: HashMap<AssetId, Arc<DecodedBuffer>>,
    failures: HashMap<AssetId, FailedLoadInfo>,
    retries: HashMap<AssetId, JoinHandle<()>>,
    /// Assets being loaded, with the cache generation the load started in
    in_flight: HashMap<AssetId, u64>,
    /// Bumped by `clear`; loads that started earlier discard their result
    generation: u64,
}

/// In-flight mark for one load. Removed when the load finishes or its future
/// is dropped mid-fetch.
struct InFlight<'a> {
    cache: &'a BufferCache,
    asset_id: String,
    generation: u64,
    armed: bool,
}

impl InFlight<'_> {
    /// Remove the mark while the caller already holds the state lock
    fn finish(mut self, state: &mut CacheState) {
        self.armed = false;
        remove_in_flight(state, &self.asset_id, self.generation);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("Load of asset {} cancelled", self.asset_id);
            let mut state = self.cache.lock();
            remove_in_flight(&mut state, &self.asset_id, self.generation);
        }
    }
}

fn remove_in_flight(state: &mut CacheState, asset_id: &str, generation: u64) {
    if state.in_flight.get(asset_id) == Some(&generation) {
        state.in_flight.remove(asset_id);
    }
}

/// Delay before automatic retry number `attempt` (1-based):
/// `min(base * 2^(attempt - 1), max)`
pub fn backoff_delay(settings: &LoaderSettings, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    let delay = settings
        .base_delay_ms
        .saturating_mul(factor)
        .min(settings.max_delay_ms);
    Duration::from_millis(delay)
}

/// Shared cache of decoded assets
pub struct BufferCache {
    source: Arc<dyn AssetSource>,
    settings: LoaderSettings,
    state: Mutex<CacheState>,
}

impl BufferCache {
    pub fn new(source: Arc<dyn AssetSource>, settings: LoaderSettings) -> Arc<Self> {
        Arc::new(Self {
            source,
            settings,
            state: Mutex::new(CacheState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load an asset, returning the cached buffer when present.
    ///
    /// Returns `None` without touching the source when the asset has exhausted
    /// its automatic attempts, has a retry timer pending, or is already being
    /// loaded by someone else.
    pub async fn load(self: &Arc<Self>, asset_id: &str, uri: &str) -> Option<Arc<DecodedBuffer>> {
        self.load_with(asset_id, uri, LoadMode::Scheduled).await
    }

    /// Forget an asset's failure record and load it again immediately.
    ///
    /// Returns whether the asset is now available.
    pub async fn retry_load(self: &Arc<Self>, asset_id: &str, uri: &str) -> bool {
        {
            let mut state = self.lock();
            if let Some(timer) = state.retries.remove(asset_id) {
                timer.abort();
            }
            state.failures.remove(asset_id);
        }
        info!("Manual retry for asset {}", asset_id);
        self.load_with(asset_id, uri, LoadMode::Manual).await.is_some()
    }

    async fn load_with(self: &Arc<Self>, asset_id: &str, uri: &str, mode: LoadMode) -> Option<Arc<DecodedBuffer>> {
        let in_flight = {
            let mut state = self.lock();

            if let Some(buffer) = state.buffers.get(asset_id).cloned() {
                if state.failures.remove(asset_id).is_some() {
                    debug!("Cleared stale failure record for cached asset {}", asset_id);
                }
                return Some(buffer);
            }

            if mode != LoadMode::Manual {
                if let Some(failure) = state.failures.get(asset_id) {
                    if failure.attempt_count >= self.settings.max_attempts {
                        debug!(
                            "Asset {} exhausted {} attempts; waiting for manual retry",
                            asset_id, failure.attempt_count
                        );
                        return None;
                    }
                }
            }

            if mode == LoadMode::Scheduled && state.retries.contains_key(asset_id) {
                debug!("Asset {} has a retry pending", asset_id);
                return None;
            }

            if state.in_flight.contains_key(asset_id) {
                debug!("Asset {} is already loading", asset_id);
                return None;
            }
            let generation = state.generation;
            state.in_flight.insert(asset_id.to_string(), generation);
            InFlight {
                cache: self,
                asset_id: asset_id.to_string(),
                generation,
                armed: true,
            }
        };

        let result = self.fetch_and_decode(uri).await;

        let mut state = self.lock();
        let generation = in_flight.generation;
        in_flight.finish(&mut state);
        if state.generation != generation {
            debug!("Cache cleared while loading asset {}; discarding result", asset_id);
            return None;
        }

        match result {
            Ok(buffer) => {
                let buffer = Arc::clone(
                    state
                        .buffers
                        .entry(asset_id.to_string())
                        .or_insert_with(|| Arc::new(buffer)),
                );
                state.failures.remove(asset_id);
                if let Some(timer) = state.retries.remove(asset_id) {
                    timer.abort();
                }
                info!(
                    "Loaded asset {} ({:.2}s at {} Hz)",
                    asset_id,
                    buffer.duration_seconds(),
                    buffer.sample_rate()
                );
                Some(buffer)
            }
            Err(e) => {
                let failure = state
                    .failures
                    .entry(asset_id.to_string())
                    .or_insert_with(|| FailedLoadInfo {
                        asset_id: asset_id.to_string(),
                        source_uri: uri.to_string(),
                        attempt_count: 0,
                        last_attempt_at: cutline_common::time::now(),
                        error: String::new(),
                    });
                failure.attempt_count += 1;
                failure.last_attempt_at = cutline_common::time::now();
                failure.source_uri = uri.to_string();
                failure.error = e.to_string();
                let attempts = failure.attempt_count;

                if attempts < self.settings.max_attempts {
                    let delay = backoff_delay(&self.settings, attempts);
                    warn!(
                        "Failed to load asset {} (attempt {}/{}): {}; retrying in {:?}",
                        asset_id, attempts, self.settings.max_attempts, e, delay
                    );
                    self.schedule_retry(&mut state, asset_id, uri, delay);
                } else {
                    warn!(
                        "Failed to load asset {} after {} attempts: {}; giving up until manual retry",
                        asset_id, attempts, e
                    );
                }
                None
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, state: &mut CacheState, asset_id: &str, uri: &str, delay: Duration) {
        let cache = Arc::clone(self);
        let asset = asset_id.to_string();
        let uri = uri.to_string();

        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            cache.lock().retries.remove(&asset);
            debug!("Automatic retry for asset {}", asset);
            cache.load_with(&asset, &uri, LoadMode::AutomaticRetry).await;
        });

        if let Some(previous) = state.retries.insert(asset_id.to_string(), timer) {
            previous.abort();
        }
    }

    async fn fetch_and_decode(&self, uri: &str) -> Result<DecodedBuffer> {
        let bytes = self.source.fetch(uri).await?;
        let extension = extension_hint(uri).map(str::to_string);
        tokio::task::spawn_blocking(move || decode_bytes(bytes, extension.as_deref()))
            .await
            .map_err(|e| Error::Internal(format!("Decode task failed: {}", e)))?
    }

    /// Cached buffer for an asset, without loading
    pub fn cached(&self, asset_id: &str) -> Option<Arc<DecodedBuffer>> {
        self.lock().buffers.get(asset_id).cloned()
    }

    /// Ids of assets with a failure record, sorted
    pub fn failed_assets(&self) -> Vec<AssetId> {
        let mut ids: Vec<AssetId> = self.lock().failures.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn failure(&self, asset_id: &str) -> Option<FailedLoadInfo> {
        self.lock().failures.get(asset_id).cloned()
    }

    pub fn has_pending_retry(&self, asset_id: &str) -> bool {
        self.lock().retries.contains_key(asset_id)
    }

    /// Cancel retry timers and drop every buffer and failure record
    pub fn clear(&self) {
        let mut state = self.lock();
        for (_, timer) in state.retries.drain() {
            timer.abort();
        }
        state.buffers.clear();
        state.failures.clear();
        state.in_flight.clear();
        state.generation += 1;
        debug!("Buffer cache cleared");
    }
}
