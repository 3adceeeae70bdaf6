//! Scheduling, buffer loading and playback unit bookkeeping

pub mod cache;
pub mod engine;
pub mod math;
pub mod registry;
pub mod seek;
pub mod source;

pub use cache::{BufferCache, FailedLoadInfo};
pub use engine::{AudioEngine, ClockSink, EngineContext, UnitSnapshot};
pub use registry::{PlaybackUnit, UnitRegistry};
pub use seek::{SeekClassifier, SeekKind, SeekVelocityState};
pub use source::{AssetSource, FsAssetSource};
