//! # Cutline Common Library
//!
//! Shared code for the Cutline editor services including:
//! - Timeline and asset data model (tracks, clips, assets)
//! - Common error type
//! - Configuration file discovery
//! - Timestamp utilities

pub mod config;
pub mod error;
pub mod time;
pub mod timeline;

pub use error::{Error, Result};
pub use timeline::{Asset, AssetId, Clip, ClipId, TimeSec, Timeline, Track, TrackId};
