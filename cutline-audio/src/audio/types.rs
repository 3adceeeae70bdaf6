//! Core audio data types
//!
//! Decoded audio is normalized to interleaved stereo `f32` at the source's own
//! sample rate; the mixer converts rate at playback time.

/// Immutable decoded audio payload for one asset.
///
/// Shared as `Arc<DecodedBuffer>` between the buffer cache and every voice
/// reading from it; never mutated after construction.
#[derive(Debug, Clone)]
pub struct DecodedBuffer {
    /// Interleaved stereo samples: [L, R, L, R, ...]
    samples: Vec<f32>,

    /// Source sample rate in Hz
    sample_rate: u32,

    /// Number of stereo frames (samples.len() / 2)
    frame_count: usize,
}

impl DecodedBuffer {
    /// Wrap interleaved stereo samples.
    ///
    /// A trailing odd sample (incomplete frame) is dropped.
    pub fn new(mut samples: Vec<f32>, sample_rate: u32) -> Self {
        if samples.len() % 2 != 0 {
            samples.pop();
        }
        let frame_count = samples.len() / 2;

        Self {
            samples,
            sample_rate: sample_rate.max(1),
            frame_count,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Get duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.frame_count as f64 / self.sample_rate as f64
    }

    /// Stereo frame at `index`, or silence past the end
    pub fn frame(&self, index: usize) -> (f32, f32) {
        let i = index * 2;
        if i + 1 < self.samples.len() {
            (self.samples[i], self.samples[i + 1])
        } else {
            (0.0, 0.0)
        }
    }

    /// Linearly interpolated stereo frame at a fractional position
    pub fn frame_at(&self, position: f64) -> (f32, f32) {
        if !(position >= 0.0) {
            return (0.0, 0.0);
        }
        let index = position.floor() as usize;
        let frac = (position - index as f64) as f32;
        let (l0, r0) = self.frame(index);
        if frac == 0.0 {
            return (l0, r0);
        }
        let (l1, r1) = self.frame(index + 1);
        (l0 + (l1 - l0) * frac, r0 + (r1 - r0) * frac)
    }
}
