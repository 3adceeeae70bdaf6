//! # Cutline Audio Engine (cutline-audio)
//!
//! Keeps a real-time audio output graph in sync with an editor timeline.
//!
//! **Purpose:** Load and decode clip audio with caching and retry, schedule one
//! precisely timed voice per sounding clip, tell seeks apart from ordinary
//! playback, and report the realized audio clock back to the host.
//!
//! **Architecture:** symphonia decode, a software mixer whose frame counter is
//! the engine clock, and cpal output.

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;
pub mod state;

pub use config::Config;
pub use error::{Error, Result};
pub use playback::{AudioEngine, ClockSink, EngineContext};
pub use state::{TransportEvent, TransportState};
