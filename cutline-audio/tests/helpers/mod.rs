//! Test helper modules for cutline-audio integration tests
//!
//! - audio_generator: WAV payloads built in memory with hound
//! - test_source: asset source double (gating, fetch accounting)
//! - engine_harness: engine wiring over a headless output

#![allow(dead_code)]

pub mod audio_generator;
pub mod engine_harness;
pub mod test_source;

pub use audio_generator::sine_wav_bytes;
pub use engine_harness::{
    adjacent_clips_timeline, single_clip_timeline, tone_source, wait_until, Harness,
    OUTPUT_SAMPLE_RATE,
};
pub use test_source::TestSource;
