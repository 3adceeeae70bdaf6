//! Software output graph
//!
//! The mixer owns every live voice (one per playback unit) and renders them
//! into interleaved output frames. Its rendered-frame counter is the engine
//! clock: `current_time()` is the absolute time, in seconds, of the next frame
//! the device will receive. Voices are timed against that clock, so a voice
//! told to start at `t` becomes audible exactly when frame `t * sample_rate`
//! is rendered.
//!
//! Per-voice gain, rate and pan live in atomics behind a [`VoiceHandle`], so
//! the scheduler can adjust or stop a voice without taking the voice lock the
//! audio callback uses.

use crate::audio::types::DecodedBuffer;
use crate::playback::math::balance_gains;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use tokio::sync::mpsc;
use tracing::trace;

pub type VoiceId = u64;

/// Default format until a backend configures the mixer
const DEFAULT_SAMPLE_RATE: u32 = 48_000;
const DEFAULT_CHANNELS: u32 = 2;

/// `lagged_since` value while every block has been rendered
const NOT_LAGGING: u64 = u64::MAX;

/// Timing and level of a new voice
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    /// Mixer clock time at which the voice becomes audible (seconds)
    pub start_at: f64,
    /// Read position within the buffer (seconds)
    pub offset_sec: f64,
    /// Amount of source audio to play (seconds)
    pub duration_sec: f64,
    /// Source seconds consumed per clock second
    pub rate: f64,
    pub gain: f32,
    /// -1.0 (left) to 1.0 (right)
    pub pan: f32,
}

/// Sent when a voice plays through to its end on its own.
///
/// Stopped voices never produce this notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceEnded {
    pub voice_id: VoiceId,
}

struct VoiceControls {
    gain_bits: AtomicU32,
    pan_bits: AtomicU32,
    rate_bits: AtomicU64,
    stopped: AtomicBool,
    finished: AtomicBool,
}

impl VoiceControls {
    fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }

    fn pan(&self) -> f32 {
        f32::from_bits(self.pan_bits.load(Ordering::Relaxed))
    }

    fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Relaxed))
    }
}

/// Control handle for one voice
#[derive(Clone)]
pub struct VoiceHandle {
    id: VoiceId,
    controls: Arc<VoiceControls>,
}

impl std::fmt::Debug for VoiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceHandle")
            .field("id", &self.id)
            .field("gain", &self.controls.gain())
            .field("rate", &self.controls.rate())
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl VoiceHandle {
    pub fn id(&self) -> VoiceId {
        self.id
    }

    pub fn gain(&self) -> f32 {
        self.controls.gain()
    }

    pub fn rate(&self) -> f64 {
        self.controls.rate()
    }

    pub fn pan(&self) -> f32 {
        self.controls.pan()
    }

    pub fn set_gain(&self, gain: f32) {
        self.controls.gain_bits.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub fn set_rate(&self, rate: f64) {
        self.controls.rate_bits.store(rate.to_bits(), Ordering::Relaxed);
    }

    pub fn set_pan(&self, pan: f32) {
        self.controls.pan_bits.store(pan.to_bits(), Ordering::Relaxed);
    }

    /// Stop and disconnect the voice.
    ///
    /// Idempotent; stopping a voice that already finished is a no-op.
    pub fn stop(&self) {
        self.controls.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.controls.stopped.load(Ordering::Acquire)
    }

    /// Whether the voice played through to its end
    pub fn is_finished(&self) -> bool {
        self.controls.finished.load(Ordering::Acquire)
    }
}

struct Voice {
    id: VoiceId,
    buffer: Arc<DecodedBuffer>,
    start_at: f64,
    /// Read position in source frames
    position: f64,
    /// Exclusive end position in source frames
    end_position: f64,
    controls: Arc<VoiceControls>,
}

impl Voice {
    /// Advance the read position over clock frames `[from_frame, to_frame)`
    /// that were rendered silent, as if they had been played.
    fn skip(&mut self, from_frame: u64, to_frame: u64, output_rate: f64) {
        let rate = self.controls.rate();
        if !(rate.is_finite() && rate > 0.0) {
            return;
        }
        let start_frame = (self.start_at * output_rate).ceil().max(0.0) as u64;
        let frames = to_frame.saturating_sub(from_frame.max(start_frame));
        if frames > 0 {
            let step = rate * self.buffer.sample_rate() as f64 / output_rate;
            self.position = (self.position + frames as f64 * step).min(self.end_position);
        }
    }
}

/// Software mixer driven by an output backend
pub struct Mixer {
    voices: Mutex<Vec<Voice>>,
    next_voice_id: AtomicU64,
    frames_rendered: AtomicU64,
    /// First frame of a run of blocks rendered silent because the voice list
    /// was locked, or `NOT_LAGGING`
    lagged_since: AtomicU64,
    sample_rate: AtomicU32,
    channels: AtomicU32,
    ended_tx: mpsc::UnboundedSender<VoiceEnded>,
}

impl Mixer {
    /// Create a mixer that reports natural voice completion on `ended_tx`
    pub fn new(ended_tx: mpsc::UnboundedSender<VoiceEnded>) -> Self {
        Self {
            voices: Mutex::new(Vec::new()),
            next_voice_id: AtomicU64::new(1),
            frames_rendered: AtomicU64::new(0),
            lagged_since: AtomicU64::new(NOT_LAGGING),
            sample_rate: AtomicU32::new(DEFAULT_SAMPLE_RATE),
            channels: AtomicU32::new(DEFAULT_CHANNELS),
            ended_tx,
        }
    }

    /// Set the device format. Called by the backend before rendering starts.
    pub fn set_format(&self, sample_rate: u32, channels: u16) {
        self.sample_rate.store(sample_rate.max(1), Ordering::Release);
        self.channels.store(channels.max(1) as u32, Ordering::Release);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    pub fn channels(&self) -> usize {
        self.channels.load(Ordering::Acquire) as usize
    }

    /// Engine clock: seconds of audio rendered so far
    pub fn current_time(&self) -> f64 {
        self.frames_rendered.load(Ordering::Acquire) as f64 / self.sample_rate() as f64
    }

    /// Number of voices still owned by the mixer
    pub fn active_voices(&self) -> usize {
        self.voices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Add a voice reading `buffer` with the given timing.
    pub fn start_voice(&self, buffer: Arc<DecodedBuffer>, params: VoiceParams) -> VoiceHandle {
        let id = self.next_voice_id.fetch_add(1, Ordering::Relaxed);
        let controls = Arc::new(VoiceControls {
            gain_bits: AtomicU32::new(params.gain.to_bits()),
            pan_bits: AtomicU32::new(params.pan.to_bits()),
            rate_bits: AtomicU64::new(params.rate.to_bits()),
            stopped: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        });

        let source_rate = buffer.sample_rate() as f64;
        let position = (params.offset_sec.max(0.0) * source_rate).max(0.0);
        let end_position = ((params.offset_sec + params.duration_sec.max(0.0)) * source_rate)
            .min(buffer.frame_count() as f64)
            .max(position);

        trace!(
            "Voice {} start_at={:.3}s frames {:.0}..{:.0}",
            id,
            params.start_at,
            position,
            end_position
        );

        self.voices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Voice {
                id,
                buffer,
                start_at: params.start_at,
                position,
                end_position,
                controls: Arc::clone(&controls),
            });

        VoiceHandle { id, controls }
    }

    /// Render the next block of interleaved frames into `out`.
    ///
    /// Always advances the clock by the block length. When the voice list is
    /// momentarily locked by the scheduler the block is silent, and live voices
    /// skip ahead over it on the next block so they stay in step with the clock.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);

        let channels = self.channels();
        let output_rate = self.sample_rate() as f64;
        let frames = out.len() / channels;
        let base_frame = self.frames_rendered.load(Ordering::Acquire);
        let block_end_time = (base_frame + frames as u64) as f64 / output_rate;

        let voices = match self.voices.try_lock() {
            Ok(voices) => Some(voices),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        };

        if let Some(mut voices) = voices {
            let lagged_since = self.lagged_since.swap(NOT_LAGGING, Ordering::AcqRel);
            if lagged_since != NOT_LAGGING {
                trace!(
                    "Voices skipping {} missed frames",
                    base_frame.saturating_sub(lagged_since)
                );
                for voice in voices.iter_mut() {
                    voice.skip(lagged_since, base_frame, output_rate);
                }
            }

            voices.retain_mut(|voice| {
                if voice.controls.stopped.load(Ordering::Acquire) {
                    return false;
                }

                let rate = voice.controls.rate();
                if rate.is_finite() && rate > 0.0 {
                    let step = rate * voice.buffer.sample_rate() as f64 / output_rate;
                    let gain = voice.controls.gain();
                    let (left_gain, right_gain) = balance_gains(voice.controls.pan());

                    for i in 0..frames {
                        let t = (base_frame + i as u64) as f64 / output_rate;
                        if t < voice.start_at {
                            continue;
                        }
                        if voice.position >= voice.end_position {
                            break;
                        }

                        let (l, r) = voice.buffer.frame_at(voice.position);
                        let l = l * gain * left_gain;
                        let r = r * gain * right_gain;
                        let frame = &mut out[i * channels..(i + 1) * channels];
                        if channels == 1 {
                            frame[0] += (l + r) * 0.5;
                        } else {
                            frame[0] += l;
                            frame[1] += r;
                        }
                        voice.position += step;
                    }
                }

                let finished = block_end_time >= voice.start_at && voice.position >= voice.end_position;
                if finished {
                    voice.controls.finished.store(true, Ordering::Release);
                    // Receiver gone means the engine shut down
                    let _ = self.ended_tx.send(VoiceEnded { voice_id: voice.id });
                }
                !finished
            });
        } else {
            // Keep the earliest missed frame across consecutive misses
            let _ = self.lagged_since.compare_exchange(
                NOT_LAGGING,
                base_frame,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }

        self.frames_rendered
            .fetch_add(frames as u64, Ordering::AcqRel);
    }

    /// Drop every voice without completion notifications
    pub fn clear(&self) {
        let mut voices = self.voices.lock().unwrap_or_else(PoisonError::into_inner);
        for voice in voices.iter() {
            voice.controls.stopped.store(true, Ordering::Release);
        }
        voices.clear();
    }
}
