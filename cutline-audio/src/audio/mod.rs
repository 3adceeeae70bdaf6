//! Audio subsystem: decoding, mixing and device output

pub mod decoder;
pub mod mixer;
pub mod output;
pub mod types;

pub use mixer::{Mixer, VoiceEnded, VoiceHandle, VoiceId, VoiceParams};
pub use output::{CpalBackend, HeadlessBackend, OutputBackend, OutputStream};
pub use types::DecodedBuffer;
