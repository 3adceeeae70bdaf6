//! Audio decoder using symphonia
//!
//! Decodes a fetched asset (WAV, MP3, FLAC, AAC/M4A, Vorbis) from memory into
//! a [`DecodedBuffer`]. Decoding is CPU-bound; callers run it on a blocking
//! thread.

use crate::audio::types::DecodedBuffer;
use crate::error::{Error, Result};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// File extension of a URI or path, used as a probe hint
pub fn extension_hint(uri: &str) -> Option<&str> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

/// Decode an entire in-memory media file to stereo f32.
///
/// Mono sources are duplicated to both channels; sources with more than two
/// channels keep the first two.
///
/// # Errors
/// - Unrecognized container/codec
/// - No audio track, or track without a sample rate
/// - Stream produced no audio at all
pub fn decode_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<DecodedBuffer> {
    let byte_len = bytes.len();
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::Decode(format!("Failed to probe format: {}", e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Decode("No audio track found".to_string()))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| Error::Decode("Sample rate not found".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut scratch: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => {
                warn!("Error reading packet: {}", e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping corrupt packet: {}", e);
                continue;
            }
            Err(e) => {
                return Err(Error::Decode(format!("Decoder failed: {}", e)));
            }
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        if channels == 0 {
            continue;
        }

        let needed = decoded.capacity();
        if scratch
            .as_ref()
            .map_or(true, |buf| buf.capacity() < needed * channels)
        {
            scratch = Some(SampleBuffer::<f32>::new(needed as u64, spec));
        }
        let Some(buf) = scratch.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);

        append_as_stereo(buf.samples(), channels, &mut samples);
    }

    if samples.is_empty() {
        return Err(Error::Decode("Stream contained no audio samples".to_string()));
    }

    debug!(
        "Decoded {} bytes into {} frames at {} Hz",
        byte_len,
        samples.len() / 2,
        sample_rate
    );

    Ok(DecodedBuffer::new(samples, sample_rate))
}

/// Append interleaved samples with `channels` channels as interleaved stereo
fn append_as_stereo(interleaved: &[f32], channels: usize, output: &mut Vec<f32>) {
    output.reserve(interleaved.len() / channels * 2);
    for frame in interleaved.chunks_exact(channels) {
        let left = frame[0];
        let right = if channels > 1 { frame[1] } else { frame[0] };
        output.push(left);
        output.push(right);
    }
}
