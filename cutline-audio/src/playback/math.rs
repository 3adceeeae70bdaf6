//! Clock and volume math
//!
//! Pure functions. Every input that can come from user data is sanitized here:
//! a NaN or infinity reaching the output graph would corrupt the whole mix, so
//! non-finite values fall back to neutral (0 dB, volume 1, rate 1, centered).

use cutline_common::Clip;

/// Convert a clip volume in dB to a linear amplitude.
///
/// `clip_linear_volume(0.0) == 1.0`, `clip_linear_volume(-20.0) ≈ 0.1`.
/// Non-finite input is treated as 0 dB.
pub fn clip_linear_volume(volume_db: f32) -> f32 {
    let db = if volume_db.is_finite() { volume_db } else { 0.0 };
    10f32.powf(db / 20.0)
}

/// Linear multiplier guarded against non-finite and negative values
pub fn sanitize_volume(volume: f32) -> f32 {
    if volume.is_finite() {
        volume.max(0.0)
    } else {
        1.0
    }
}

/// Effective gain of a clip on a track.
///
/// `muted ? 0 : master * track * clip_linear_volume(clip_db)`
pub fn effective_gain(master_volume: f32, track_volume: f32, clip_volume_db: f32, muted: bool) -> f32 {
    if muted {
        return 0.0;
    }
    let gain = sanitize_volume(master_volume)
        * sanitize_volume(track_volume)
        * clip_linear_volume(clip_volume_db);
    if gain.is_finite() {
        gain
    } else {
        0.0
    }
}

/// Transport rate with non-finite values treated as 1.0
pub fn safe_rate(rate: f64) -> f64 {
    if rate.is_finite() {
        rate
    } else {
        1.0
    }
}

/// Pan position clamped to [-1, 1], non-finite treated as center
pub fn safe_pan(pan: f32) -> f32 {
    if pan.is_finite() {
        pan.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Stereo balance gains for a pan position.
///
/// Center leaves both channels untouched; panning attenuates the opposite
/// channel linearly down to silence at the extremes.
pub fn balance_gains(pan: f32) -> (f32, f32) {
    let pan = safe_pan(pan);
    ((1.0 - pan).min(1.0), (1.0 + pan).min(1.0))
}

/// Transport time realized by a unit at engine-clock time `engine_now`.
///
/// A unit anchored at timeline time `anchor` and told to start at engine time
/// `scheduled_start` advances the transport at `transport_rate`.
pub fn realized_clock(anchor: f64, scheduled_start: f64, engine_now: f64, transport_rate: f64) -> f64 {
    anchor + (engine_now - scheduled_start).max(0.0) * transport_rate
}

/// Where and when a unit for a clip starts, given the transport time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitTiming {
    /// Timeline seconds already elapsed inside the clip (0 if not yet reached)
    pub time_into_clip: f64,
    /// Read position in the source (seconds)
    pub source_offset: f64,
    /// Wait before the unit becomes audible, in transport seconds
    pub start_delay: f64,
    /// Source seconds left to play
    pub play_duration: f64,
}

impl UnitTiming {
    /// Compute timing for `clip` at transport time `current_time`.
    ///
    /// Returns `None` when nothing of the clip remains to be played, or when
    /// the clip or the time cannot be timed.
    pub fn compute(clip: &Clip, current_time: f64) -> Option<Self> {
        if !current_time.is_finite() || !clip.has_finite_bounds() {
            return None;
        }
        let speed = clip.safe_speed();
        let timeline_in = clip.timeline_in();
        let time_into_clip = (current_time - timeline_in).max(0.0);
        let source_in = clip.range.source_in_sec;
        let source_offset = source_in + time_into_clip * speed;
        let start_delay = (timeline_in - current_time).max(0.0);

        // Placement may be shorter than the source range
        let source_end = clip
            .range
            .source_out_sec
            .min(source_in + clip.duration() * speed);
        let play_duration = (source_end - source_offset).max(0.0);

        if play_duration <= 0.0 || !source_offset.is_finite() {
            return None;
        }

        Some(Self {
            time_into_clip,
            source_offset,
            start_delay,
            play_duration,
        })
    }
}
