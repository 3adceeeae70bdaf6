//! Audio scheduling engine
//!
//! Keeps the mixer's voices in step with the timeline while the transport
//! plays, seeks and pauses. A scheduling pass looks a short window ahead of
//! the transport time, loads the buffers of clips entering that window and
//! starts one voice (a playback unit) per clip, timed against the mixer clock.
//!
//! Passes are single-flight: a trigger arriving while a pass is suspended on a
//! load only requests a rerun, which the running pass performs before it
//! returns. Every suspension point is followed by a check of the schedule
//! version, so a seek or pause that happened meanwhile discards the work.

use crate::audio::mixer::{Mixer, VoiceEnded, VoiceId, VoiceParams};
use crate::audio::output::{OutputBackend, OutputStream};
use crate::audio::types::DecodedBuffer;
use crate::config::{Config, SchedulerSettings};
use crate::error::{Error, Result};
use crate::playback::cache::{BufferCache, FailedLoadInfo};
use crate::playback::math::{effective_gain, realized_clock, safe_pan, safe_rate, UnitTiming};
use crate::playback::registry::{ClipPlacement, PlaybackUnit, UnitId, UnitRegistry};
use crate::playback::seek::{SeekClassifier, SeekKind, SeekVelocityState};
use crate::playback::source::AssetSource;
use crate::state::{TransportEvent, TransportSnapshot, TransportState};
use cutline_common::{AssetId, Clip, ClipId, Timeline, Track};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Receives the realized audio clock (transport seconds) for drift correction
pub trait ClockSink: Send + Sync {
    fn report_audio_clock(&self, seconds: f64);
}

impl<F> ClockSink for F
where
    F: Fn(f64) + Send + Sync,
{
    fn report_audio_clock(&self, seconds: f64) {
        self(seconds)
    }
}

/// Collaborators the engine consumes
pub struct EngineContext {
    /// Latest timeline snapshot
    pub timeline: watch::Receiver<Arc<Timeline>>,
    pub transport: Arc<TransportState>,
    pub assets: Arc<dyn AssetSource>,
    pub output: Arc<dyn OutputBackend>,
    pub clock_sink: Arc<dyn ClockSink>,
}

/// Read-only view of a live playback unit
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSnapshot {
    pub unit_id: UnitId,
    pub clip_id: ClipId,
    pub voice_id: VoiceId,
    pub scheduled_start_time: f64,
    pub timeline_anchor: f64,
    pub start_delay: f64,
    pub source_offset: f64,
    pub play_duration: f64,
    pub gain: f32,
    pub rate: f64,
    pub pan: f32,
}

impl From<&PlaybackUnit> for UnitSnapshot {
    fn from(unit: &PlaybackUnit) -> Self {
        Self {
            unit_id: unit.unit_id,
            clip_id: unit.clip_id.clone(),
            voice_id: unit.voice.id(),
            scheduled_start_time: unit.scheduled_start_time,
            timeline_anchor: unit.timeline_anchor,
            start_delay: unit.start_delay,
            source_offset: unit.source_offset,
            play_duration: unit.play_duration,
            gain: unit.voice.gain(),
            rate: unit.voice.rate(),
            pan: unit.voice.pan(),
        }
    }
}

struct OutputSlot {
    mixer: Arc<Mixer>,
    stream: Box<dyn OutputStream>,
}

/// Mutable engine state. Never held across an `.await`.
struct EngineState {
    registry: UnitRegistry,
    velocity: SeekVelocityState,
    /// Start of the last pass; `None` lets the next pass skip the debounce
    last_pass_at: Option<Instant>,
    output: Option<OutputSlot>,
    driver: Option<JoinHandle<()>>,
    /// Taken by the driver when it starts
    ended_rx: Option<mpsc::UnboundedReceiver<VoiceEnded>>,
}

/// A clip selected for loading in this pass
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    clip_id: ClipId,
    asset_id: AssetId,
    uri: String,
}

/// Live parameters a clip's unit should have
#[derive(Debug, Clone, Copy, PartialEq)]
struct ClipMix {
    gain: f32,
    rate: f64,
    pan: f32,
    transport_rate: f64,
}

/// Clears the in-progress flag even if the pass future is dropped
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The audio scheduling engine
pub struct AudioEngine {
    settings: SchedulerSettings,
    classifier: SeekClassifier,
    timeline: watch::Receiver<Arc<Timeline>>,
    transport: Arc<TransportState>,
    cache: Arc<BufferCache>,
    output_backend: Arc<dyn OutputBackend>,
    clock_sink: Arc<dyn ClockSink>,
    ended_tx: mpsc::UnboundedSender<VoiceEnded>,
    state: Mutex<EngineState>,
    schedule_version: AtomicU64,
    pass_in_progress: AtomicBool,
    rerun_requested: AtomicBool,
    enabled: AtomicBool,
    shut_down: AtomicBool,
    /// Serializes output initialization and teardown
    init_lock: tokio::sync::Mutex<()>,
}

impl AudioEngine {
    pub fn new(config: &Config, context: EngineContext) -> Arc<Self> {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();

        Arc::new(Self {
            settings: config.scheduler.clone(),
            classifier: SeekClassifier::new(&config.scheduler),
            timeline: context.timeline,
            transport: context.transport,
            cache: BufferCache::new(context.assets, config.loader.clone()),
            output_backend: context.output,
            clock_sink: context.clock_sink,
            ended_tx,
            state: Mutex::new(EngineState {
                registry: UnitRegistry::new(),
                velocity: SeekVelocityState::new(),
                last_pass_at: None,
                output: None,
                driver: None,
                ended_rx: Some(ended_rx),
            }),
            schedule_version: AtomicU64::new(0),
            pass_in_progress: AtomicBool::new(false),
            rerun_requested: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            shut_down: AtomicBool::new(false),
            init_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cache(&self) -> &Arc<BufferCache> {
        &self.cache
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    /// Open the audio output, or resume it if it is already open.
    ///
    /// # Errors
    /// Device failures are returned once; scheduling stays a no-op until a
    /// later call succeeds.
    pub async fn init_audio_output(&self) -> Result<()> {
        let _init = self.init_lock.lock().await;

        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::Internal("Audio engine has been shut down".to_string()));
        }

        {
            let state = self.lock_state();
            if let Some(output) = state.output.as_ref() {
                debug!("Audio output already open; resuming");
                return output.stream.resume();
            }
        }

        let mixer = Arc::new(Mixer::new(self.ended_tx.clone()));
        let backend = Arc::clone(&self.output_backend);
        let stream_mixer = Arc::clone(&mixer);
        let stream = tokio::task::spawn_blocking(move || backend.open(stream_mixer))
            .await
            .map_err(|e| Error::Internal(format!("Output task failed: {}", e)))??;

        info!(
            "Audio output ready: {} Hz, {} channels",
            mixer.sample_rate(),
            mixer.channels()
        );

        let mut state = self.lock_state();
        state.output = Some(OutputSlot { mixer, stream });
        state.last_pass_at = None;
        Ok(())
    }

    pub fn is_audio_output_ready(&self) -> bool {
        self.lock_state().output.is_some()
    }

    /// Mixer behind the open output. Headless hosts render through it.
    pub fn mixer(&self) -> Option<Arc<Mixer>> {
        self.lock_state()
            .output
            .as_ref()
            .map(|output| Arc::clone(&output.mixer))
    }

    /// Engine clock in seconds, if the output is open
    pub fn engine_time(&self) -> Option<f64> {
        self.mixer().map(|mixer| mixer.current_time())
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Run a scheduling pass, or fold into the one already running.
    pub async fn run_scheduling_pass(&self) {
        self.rerun_requested.store(true, Ordering::SeqCst);

        loop {
            let Some(guard) = PassGuard::acquire(&self.pass_in_progress) else {
                trace!("Scheduling pass already running; rerun requested");
                return;
            };

            let mut first = true;
            while self.rerun_requested.swap(false, Ordering::SeqCst) {
                if !first {
                    self.reset_debounce();
                }
                first = false;
                self.pass_once().await;
            }
            drop(guard);

            // A trigger that lost the race for the guard after our last check
            if !self.rerun_requested.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    async fn pass_once(&self) {
        let version = self.schedule_version.load(Ordering::SeqCst);

        if !self.enabled.load(Ordering::SeqCst) || self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        let transport = self.transport.snapshot().await;
        if !transport.is_playing {
            return;
        }

        let timeline = Arc::clone(&self.timeline.borrow());
        let current_time = transport.current_time;

        let candidates = {
            let mut state = self.lock_state();
            if state.output.is_none() {
                trace!("Audio output not ready; skipping pass");
                return;
            }

            let now = Instant::now();
            if let Some(last) = state.last_pass_at {
                if now.saturating_duration_since(last) < self.settings.reschedule_interval() {
                    trace!("Scheduling pass debounced");
                    return;
                }
            }
            state.last_pass_at = Some(now);

            let ahead = state.velocity.look_ahead(&self.settings);
            collect_candidates(&timeline, &state.registry, current_time, current_time + ahead)
        };

        if !candidates.is_empty() {
            debug!(
                "Pass at {:.3}s (version {}): {} clips to schedule",
                current_time,
                version,
                candidates.len()
            );
        }

        for candidate in candidates {
            let buffer = self.cache.load(&candidate.asset_id, &candidate.uri).await;

            if self.schedule_version.load(Ordering::SeqCst) != version {
                debug!(
                    "Schedule changed while loading asset {}; abandoning pass",
                    candidate.asset_id
                );
                self.rerun_requested.store(true, Ordering::SeqCst);
                return;
            }

            let live = self.transport.snapshot().await;
            if !live.is_playing || !self.enabled.load(Ordering::SeqCst) {
                debug!("Playback stopped while loading; abandoning pass");
                return;
            }

            let Some(buffer) = buffer else {
                debug!(
                    "Skipping clip {}: asset {} unavailable",
                    candidate.clip_id, candidate.asset_id
                );
                continue;
            };

            // The clip may have been edited while its asset loaded
            let timeline = Arc::clone(&self.timeline.borrow());
            let Some((track, clip)) = audible_clip(&timeline, &candidate.clip_id) else {
                continue;
            };

            if !self.create_unit(version, track, clip, buffer, &live) {
                return;
            }
        }

        self.refresh_units(version).await;
        self.report_clock();
    }

    /// Start a unit for `clip`. Returns false when the pass must be abandoned.
    fn create_unit(
        &self,
        version: u64,
        track: &Track,
        clip: &Clip,
        buffer: Arc<DecodedBuffer>,
        live: &TransportSnapshot,
    ) -> bool {
        let mut state = self.lock_state();

        // Seeks and pauses bump the version under this lock
        if self.schedule_version.load(Ordering::SeqCst) != version {
            self.rerun_requested.store(true, Ordering::SeqCst);
            return false;
        }
        if state.registry.contains(&clip.id) {
            return true;
        }
        let Some(mixer) = state.output.as_ref().map(|output| Arc::clone(&output.mixer)) else {
            return false;
        };
        let Some(timing) = UnitTiming::compute(clip, live.current_time) else {
            trace!("Clip {} ended before its buffer was ready", clip.id);
            return true;
        };

        let mix = clip_mix(track, clip, live);
        let engine_now = mixer.current_time();
        let start_at = engine_now + engine_delay(timing.start_delay, mix.transport_rate);

        let voice = mixer.start_voice(
            buffer,
            VoiceParams {
                start_at,
                offset_sec: timing.source_offset,
                duration_sec: timing.play_duration,
                rate: mix.rate,
                gain: mix.gain,
                pan: mix.pan,
            },
        );

        let unit = PlaybackUnit {
            unit_id: Uuid::new_v4(),
            clip_id: clip.id.clone(),
            voice,
            scheduled_start_time: start_at,
            timeline_anchor: live.current_time + timing.start_delay,
            transport_rate: mix.transport_rate,
            start_delay: timing.start_delay,
            source_offset: timing.source_offset,
            play_duration: timing.play_duration,
            placement: placement(clip),
        };

        info!(
            "Scheduled clip {} (unit {}): offset {:.3}s, delay {:.3}s, duration {:.3}s",
            clip.id, unit.unit_id, timing.source_offset, timing.start_delay, timing.play_duration
        );
        state.registry.insert(unit);
        true
    }

    /// Push volume, mute, pan and rate changes to live units; evict units whose
    /// clip is gone, muted or moved.
    async fn refresh_units(&self, version: u64) {
        let transport = self.transport.snapshot().await;
        let timeline = Arc::clone(&self.timeline.borrow());

        let mut state = self.lock_state();
        if self.schedule_version.load(Ordering::SeqCst) != version {
            return;
        }
        let Some(engine_now) = state.output.as_ref().map(|output| output.mixer.current_time()) else {
            return;
        };

        let mut evicted = Vec::new();
        let mut moved = false;

        for unit in state.registry.iter_mut() {
            let Some((track, clip)) = audible_clip(&timeline, &unit.clip_id) else {
                evicted.push(unit.clip_id.clone());
                continue;
            };
            if placement(clip) != unit.placement {
                evicted.push(unit.clip_id.clone());
                moved = true;
                continue;
            }

            let mix = clip_mix(track, clip, &transport);
            if unit.voice.gain() != mix.gain {
                unit.voice.set_gain(mix.gain);
            }
            if unit.voice.pan() != mix.pan {
                unit.voice.set_pan(mix.pan);
            }
            if unit.voice.rate() != mix.rate {
                // Re-anchor so the reported clock stays continuous
                if engine_now > unit.scheduled_start_time {
                    unit.timeline_anchor = realized_clock(
                        unit.timeline_anchor,
                        unit.scheduled_start_time,
                        engine_now,
                        unit.transport_rate,
                    );
                    unit.scheduled_start_time = engine_now;
                }
                unit.transport_rate = mix.transport_rate;
                unit.voice.set_rate(mix.rate);
                debug!("Clip {} rate now {:.3}", unit.clip_id, mix.rate);
            }
        }

        for clip_id in evicted {
            if let Some(unit) = state.registry.remove(&clip_id) {
                unit.voice.stop();
                debug!("Evicted unit {} for clip {}", unit.unit_id, clip_id);
            }
        }

        if moved {
            state.last_pass_at = None;
            self.rerun_requested.store(true, Ordering::SeqCst);
        }
    }

    /// Report the clock of the earliest-starting audible unit
    fn report_clock(&self) {
        let clock = {
            let state = self.lock_state();
            let Some(engine_now) = state.output.as_ref().map(|output| output.mixer.current_time()) else {
                return;
            };
            state
                .registry
                .iter()
                .filter(|unit| {
                    unit.scheduled_start_time <= engine_now
                        && !unit.voice.is_finished()
                        && !unit.voice.is_stopped()
                })
                .min_by(|a, b| a.scheduled_start_time.total_cmp(&b.scheduled_start_time))
                .map(|unit| {
                    realized_clock(
                        unit.timeline_anchor,
                        unit.scheduled_start_time,
                        engine_now,
                        unit.transport_rate,
                    )
                })
        };

        if let Some(seconds) = clock {
            trace!("Audio clock {:.3}s", seconds);
            self.clock_sink.report_audio_clock(seconds);
        }
    }

    fn reset_debounce(&self) {
        self.lock_state().last_pass_at = None;
    }

    /// Stop every unit and invalidate in-flight work. Caller holds the state lock.
    fn stop_all_locked(&self, state: &mut EngineState) -> (usize, u64) {
        let stopped = state.registry.stop_all();
        let version = self.schedule_version.fetch_add(1, Ordering::SeqCst) + 1;
        (stopped, version)
    }

    // ------------------------------------------------------------------
    // Transport and completion
    // ------------------------------------------------------------------

    /// React to a transport change and run a pass if it calls for one
    pub async fn handle_transport_event(&self, event: TransportEvent) {
        if self.apply_transport_event(event).await {
            self.run_scheduling_pass().await;
        }
    }

    /// Update engine state for a transport change. Returns whether a pass
    /// should follow.
    async fn apply_transport_event(&self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::TimeChanged(time) => self.observe_time(time).await,
            TransportEvent::PlayStateChanged(true) => {
                let current_time = self.transport.current_time().await;
                let mut state = self.lock_state();
                state.velocity.rebase(current_time, Instant::now());
                state.last_pass_at = None;
                debug!("Playback started at {:.3}s", current_time);
                true
            }
            TransportEvent::PlayStateChanged(false) => {
                let mut state = self.lock_state();
                let (stopped, version) = self.stop_all_locked(&mut state);
                info!("Playback paused: stopped {} units (version {})", stopped, version);
                false
            }
            TransportEvent::VolumeChanged(_)
            | TransportEvent::MuteChanged(_)
            | TransportEvent::RateChanged(_) => {
                self.reset_debounce();
                true
            }
        }
    }

    /// Classify a time update; on a seek during playback, stop everything
    async fn observe_time(&self, time: f64) -> bool {
        let transport = self.transport.snapshot().await;
        let playing = transport.is_playing && self.enabled.load(Ordering::SeqCst);

        let mut state = self.lock_state();
        let kind = state
            .velocity
            .observe(time, Instant::now(), transport.playback_rate, &self.classifier);
        if kind != SeekKind::Seek {
            return false;
        }

        if !playing {
            debug!(
                "Seek to {:.3}s while paused (velocity {:.1}/s)",
                time,
                state.velocity.velocity()
            );
            return false;
        }

        let (stopped, version) = self.stop_all_locked(&mut state);
        state.last_pass_at = None;
        info!(
            "Seek to {:.3}s: stopped {} units (version {}, velocity {:.1}/s)",
            time,
            stopped,
            version,
            state.velocity.velocity()
        );
        true
    }

    /// Re-read the transport after missed events
    async fn resync(&self) {
        let snapshot = self.transport.snapshot().await;
        if snapshot.is_playing {
            self.apply_transport_event(TransportEvent::TimeChanged(snapshot.current_time))
                .await;
            self.reset_debounce();
        } else {
            self.apply_transport_event(TransportEvent::PlayStateChanged(false))
                .await;
        }
    }

    /// Forget a unit whose voice played to its end.
    ///
    /// Only the unit owning that voice is removed; a replacement scheduled for
    /// the same clip stays.
    pub fn handle_voice_ended(&self, ended: VoiceEnded) {
        let mut state = self.lock_state();
        let Some((clip_id, unit_id)) = state.registry.find_by_voice(ended.voice_id) else {
            trace!("Voice {} ended after its unit was replaced", ended.voice_id);
            return;
        };
        if state.registry.remove_if_current(&clip_id, unit_id).is_some() {
            debug!("Clip {} finished (unit {})", clip_id, unit_id);
        }
    }

    /// Spawn the driver: periodic passes, transport events and voice
    /// completions. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut state = self.lock_state();
        if state.driver.is_some() {
            debug!("Scheduling driver already running");
            return;
        }
        let Some(mut ended_rx) = state.ended_rx.take() else {
            warn!("Audio engine has been shut down; driver not started");
            return;
        };

        let mut events = self.transport.subscribe();
        let interval = self.settings.reschedule_interval();
        let weak: Weak<Self> = Arc::downgrade(self);

        state.driver = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(engine) = weak.upgrade() else { break };
                        spawn_pass(engine);
                    }
                    event = events.recv() => {
                        let Some(engine) = weak.upgrade() else { break };
                        match event {
                            Ok(event) => {
                                if engine.apply_transport_event(event).await {
                                    spawn_pass(engine);
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!("Driver missed {} transport events; resyncing", skipped);
                                engine.resync().await;
                                spawn_pass(engine);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    ended = ended_rx.recv() => {
                        let Some(ended) = ended else { break };
                        let Some(engine) = weak.upgrade() else { break };
                        engine.handle_voice_ended(ended);
                    }
                }
            }
            debug!("Scheduling driver stopped");
        }));

        info!("Scheduling driver started ({:?} interval)", interval);
    }

    /// Enable or disable all scheduling. Disabling stops every unit.
    pub fn set_enabled(&self, enabled: bool) {
        if self.enabled.swap(enabled, Ordering::SeqCst) == enabled {
            return;
        }
        let mut state = self.lock_state();
        if enabled {
            state.last_pass_at = None;
            info!("Audio scheduling enabled");
        } else {
            let (stopped, _) = self.stop_all_locked(&mut state);
            info!("Audio scheduling disabled: stopped {} units", stopped);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Loader surface
    // ------------------------------------------------------------------

    /// Manually retry a failed asset, then schedule immediately if it loaded.
    pub async fn retry_load(&self, asset_id: &str) -> bool {
        if self.shut_down.load(Ordering::SeqCst) {
            debug!("Audio engine shut down; ignoring retry of {}", asset_id);
            return false;
        }
        let timeline_uri = self.timeline.borrow().asset(asset_id).map(|asset| asset.uri.clone());
        let Some(uri) = timeline_uri.or_else(|| self.cache.failure(asset_id).map(|f| f.source_uri)) else {
            warn!("Cannot retry unknown asset {}", asset_id);
            return false;
        };

        let available = self.cache.retry_load(asset_id, &uri).await;
        if available {
            self.reset_debounce();
            self.run_scheduling_pass().await;
        }
        available
    }

    pub fn failed_assets(&self) -> Vec<AssetId> {
        self.cache.failed_assets()
    }

    pub fn failure_info(&self, asset_id: &str) -> Option<FailedLoadInfo> {
        self.cache.failure(asset_id)
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub fn schedule_version(&self) -> u64 {
        self.schedule_version.load(Ordering::SeqCst)
    }

    pub fn active_clip_ids(&self) -> Vec<ClipId> {
        self.lock_state().registry.clip_ids()
    }

    pub fn unit(&self, clip_id: &str) -> Option<UnitSnapshot> {
        self.lock_state().registry.get(clip_id).map(UnitSnapshot::from)
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Stop all units, cancel timers and the driver, drop cached audio and
    /// close the output. Idempotent.
    pub async fn shutdown(&self) {
        let _init = self.init_lock.lock().await;
        let Teardown {
            first,
            stopped,
            output,
        } = self.teardown();

        if let Some(output) = output {
            // Closing a device stream joins its thread
            if let Err(e) = tokio::task::spawn_blocking(move || drop(output)).await {
                warn!("Failed to close audio output: {}", e);
            }
        }

        if first {
            info!("Audio engine shut down ({} units stopped)", stopped);
        } else {
            debug!("Audio engine already shut down");
        }
    }

    /// Synchronous part of teardown shared by `shutdown` and `Drop`.
    ///
    /// Marks the engine shut down, stops every unit, invalidates in-flight
    /// passes, aborts the driver and empties the cache. The output is detached
    /// and silenced; the caller decides where to close it.
    fn teardown(&self) -> Teardown {
        let first = !self.shut_down.swap(true, Ordering::SeqCst);

        let (stopped, driver, output) = {
            let mut state = self.lock_state();
            let (stopped, _) = self.stop_all_locked(&mut state);
            state.last_pass_at = None;
            state.ended_rx = None;
            (stopped, state.driver.take(), state.output.take())
        };

        if let Some(driver) = driver {
            driver.abort();
        }
        self.cache.clear();
        if let Some(output) = output.as_ref() {
            output.mixer.clear();
        }

        Teardown {
            first,
            stopped,
            output,
        }
    }
}

struct Teardown {
    first: bool,
    stopped: usize,
    output: Option<OutputSlot>,
}

impl Drop for AudioEngine {
    /// Dropping without `shutdown` closes the output stream inline.
    fn drop(&mut self) {
        let Teardown { first, stopped, .. } = self.teardown();
        if first {
            debug!("Audio engine dropped without shutdown ({} units stopped)", stopped);
        }
    }
}

fn spawn_pass(engine: Arc<AudioEngine>) {
    tokio::spawn(async move {
        engine.run_scheduling_pass().await;
    });
}

/// Track and clip for `clip_id` if the clip can currently produce sound
fn audible_clip<'a>(timeline: &'a Timeline, clip_id: &str) -> Option<(&'a Track, &'a Clip)> {
    let (track, clip) = timeline.find_clip(clip_id)?;
    if track.muted || !track.carries_audio() || !clip.has_finite_bounds() {
        return None;
    }
    let asset = timeline.asset(&clip.asset_id)?;
    asset.has_audio().then_some((track, clip))
}

/// Clips overlapping `[now, window_end)` that can sound and have no unit yet
fn collect_candidates(timeline: &Timeline, registry: &UnitRegistry, now: f64, window_end: f64) -> Vec<Candidate> {
    if !now.is_finite() {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    for track in &timeline.tracks {
        if track.muted || !track.carries_audio() {
            continue;
        }
        for clip in &track.clips {
            if registry.contains(&clip.id) || !clip.has_finite_bounds() {
                continue;
            }
            if !(clip.timeline_in() < window_end && now < clip.timeline_end()) {
                continue;
            }
            let Some(asset) = timeline.asset(&clip.asset_id) else {
                continue;
            };
            if !asset.has_audio() {
                continue;
            }
            candidates.push(Candidate {
                clip_id: clip.id.clone(),
                asset_id: asset.id.clone(),
                uri: asset.uri.clone(),
            });
        }
    }
    candidates
}

fn clip_mix(track: &Track, clip: &Clip, transport: &TransportSnapshot) -> ClipMix {
    let transport_rate = safe_rate(transport.playback_rate);
    ClipMix {
        gain: effective_gain(
            transport.master_volume,
            track.volume,
            clip.audio.volume_db,
            transport.is_muted || clip.audio.muted,
        ),
        rate: transport_rate * clip.safe_speed(),
        pan: safe_pan(clip.audio.pan),
        transport_rate,
    }
}

fn placement(clip: &Clip) -> ClipPlacement {
    ClipPlacement {
        timeline_in: clip.timeline_in(),
        source_in: clip.range.source_in_sec,
        source_out: clip.range.source_out_sec,
        speed: clip.safe_speed(),
    }
}

/// Engine-clock wait for a transport-time delay at the given transport rate
fn engine_delay(start_delay: f64, transport_rate: f64) -> f64 {
    if transport_rate.is_finite() && transport_rate > 0.0 {
        start_delay / transport_rate
    } else {
        start_delay
    }
}
