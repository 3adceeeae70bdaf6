//! Shared transport state
//!
//! The host (editor UI, preview binary) owns the transport: current time,
//! play/pause, master volume, mute and rate. It writes here; the engine reads
//! live values and follows changes through the event channel.

use tokio::sync::{broadcast, RwLock};

/// Point-in-time copy of the transport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportSnapshot {
    /// Transport time in seconds
    pub current_time: f64,
    pub is_playing: bool,
    /// Master volume (0.0-1.0)
    pub master_volume: f32,
    pub is_muted: bool,
    /// Timeline seconds per real second
    pub playback_rate: f64,
}

impl Default for TransportSnapshot {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            is_playing: false,
            master_volume: 1.0,
            is_muted: false,
            playback_rate: 1.0,
        }
    }
}

/// Change notifications, one per setter call that changed something
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportEvent {
    TimeChanged(f64),
    PlayStateChanged(bool),
    VolumeChanged(f32),
    MuteChanged(bool),
    RateChanged(f64),
}

/// Transport shared between the host and the engine
pub struct TransportState {
    inner: RwLock<TransportSnapshot>,

    /// Event broadcaster for transport changes
    event_tx: broadcast::Sender<TransportEvent>,
}

impl TransportState {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            inner: RwLock::new(TransportSnapshot::default()),
            event_tx,
        }
    }

    /// Subscribe to transport changes
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.event_tx.subscribe()
    }

    fn broadcast(&self, event: TransportEvent) {
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }

    pub async fn snapshot(&self) -> TransportSnapshot {
        *self.inner.read().await
    }

    pub async fn current_time(&self) -> f64 {
        self.inner.read().await.current_time
    }

    pub async fn is_playing(&self) -> bool {
        self.inner.read().await.is_playing
    }

    /// Set the transport time. Every finite update is broadcast, so the
    /// engine can classify it as progress or seek.
    pub async fn set_current_time(&self, time: f64) {
        if !time.is_finite() {
            return;
        }
        self.inner.write().await.current_time = time;
        self.broadcast(TransportEvent::TimeChanged(time));
    }

    pub async fn set_playing(&self, playing: bool) {
        let changed = {
            let mut inner = self.inner.write().await;
            let changed = inner.is_playing != playing;
            inner.is_playing = playing;
            changed
        };
        if changed {
            self.broadcast(TransportEvent::PlayStateChanged(playing));
        }
    }

    /// Set master volume (clamped to 0.0-1.0; non-finite input is ignored)
    pub async fn set_master_volume(&self, volume: f32) {
        if !volume.is_finite() {
            return;
        }
        let volume = volume.clamp(0.0, 1.0);
        let changed = {
            let mut inner = self.inner.write().await;
            let changed = inner.master_volume != volume;
            inner.master_volume = volume;
            changed
        };
        if changed {
            self.broadcast(TransportEvent::VolumeChanged(volume));
        }
    }

    pub async fn set_muted(&self, muted: bool) {
        let changed = {
            let mut inner = self.inner.write().await;
            let changed = inner.is_muted != muted;
            inner.is_muted = muted;
            changed
        };
        if changed {
            self.broadcast(TransportEvent::MuteChanged(muted));
        }
    }

    pub async fn set_playback_rate(&self, rate: f64) {
        if !rate.is_finite() {
            return;
        }
        let changed = {
            let mut inner = self.inner.write().await;
            let changed = inner.playback_rate != rate;
            inner.playback_rate = rate;
            changed
        };
        if changed {
            self.broadcast(TransportEvent::RateChanged(rate));
        }
    }
}

impl Default for TransportState {
    fn default() -> Self {
        Self::new()
    }
}
