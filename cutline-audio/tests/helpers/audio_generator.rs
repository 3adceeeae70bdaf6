//! In-memory WAV generation for engine tests

use hound::{WavSpec, WavWriter};
use std::f32::consts::PI;
use std::io::Cursor;

/// Low rate keeps ten-second fixtures small
pub const TEST_SAMPLE_RATE: u32 = 8000;

/// Mono 16-bit sine wave WAV file contents
pub fn sine_wav_bytes(duration_secs: f64, frequency_hz: f32, amplitude: f32) -> Vec<u8> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: TEST_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let frames = (duration_secs * TEST_SAMPLE_RATE as f64) as usize;
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).expect("wav writer");
        for i in 0..frames {
            let t = i as f32 / TEST_SAMPLE_RATE as f32;
            let value = (2.0 * PI * frequency_hz * t).sin() * amplitude;
            writer
                .write_sample((value * i16::MAX as f32) as i16)
                .expect("wav sample");
        }
        writer.finalize().expect("wav finalize");
    }
    cursor.into_inner()
}
