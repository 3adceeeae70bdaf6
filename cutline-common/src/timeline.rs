//! Timeline model definitions
//!
//! Tracks, clips and assets as the project model serializes them. The audio
//! engine only ever reads these; edits arrive as whole new [`Timeline`]
//! snapshots.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::Result;

pub type AssetId = String;
pub type ClipId = String;
pub type TrackId = String;

/// Time in seconds
pub type TimeSec = f64;

// =============================================================================
// Assets
// =============================================================================

/// Asset type enumeration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssetKind {
    Video,
    Audio,
    Image,
    Subtitle,
}

/// Audio-specific metadata
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: u8,
    /// Audio codec (e.g., "aac", "mp3")
    #[serde(default)]
    pub codec: String,
}

/// Media asset referenced by clips
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: AssetId,
    pub kind: AssetKind,
    #[serde(default)]
    pub name: String,
    /// Stored file path or URI (resolved by the asset source)
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<TimeSec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioInfo>,
}

impl Asset {
    /// Creates an audio asset
    pub fn new_audio(id: &str, uri: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: AssetKind::Audio,
            name: id.to_string(),
            uri: uri.to_string(),
            duration_sec: None,
            audio: None,
        }
    }

    /// Whether this asset carries an audio stream the engine can schedule.
    ///
    /// Audio assets always do; video assets only when inspection found an
    /// audio track.
    pub fn has_audio(&self) -> bool {
        match self.kind {
            AssetKind::Audio => true,
            AssetKind::Video => self.audio.is_some(),
            AssetKind::Image | AssetKind::Subtitle => false,
        }
    }
}

// =============================================================================
// Tracks
// =============================================================================

/// Track type/kind enumeration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackKind {
    Video,
    Audio,
    Caption,
    Overlay,
}

/// Track (owns its clips)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: TrackId,
    pub kind: TrackKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub clips: Vec<Clip>,
    #[serde(default)]
    pub muted: bool,
    /// Linear volume multiplier (1.0 = 100%)
    #[serde(default = "default_volume")]
    pub volume: f32,
}

fn default_volume() -> f32 {
    1.0
}

impl Track {
    pub fn new(id: &str, kind: TrackKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            name: id.to_string(),
            clips: vec![],
            muted: false,
            volume: 1.0,
        }
    }

    pub fn new_audio(id: &str) -> Self {
        Self::new(id, TrackKind::Audio)
    }

    pub fn add_clip(&mut self, clip: Clip) {
        self.clips.push(clip);
    }

    pub fn get_clip(&self, clip_id: &str) -> Option<&Clip> {
        self.clips.iter().find(|c| c.id == clip_id)
    }

    /// Whether clips on this track can produce sound (caption tracks never do)
    pub fn carries_audio(&self) -> bool {
        !matches!(self.kind, TrackKind::Caption)
    }
}

// =============================================================================
// Clips
// =============================================================================

/// Clip range within source asset
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipRange {
    pub source_in_sec: TimeSec,
    pub source_out_sec: TimeSec,
}

impl ClipRange {
    pub fn new(source_in: TimeSec, source_out: TimeSec) -> Self {
        Self {
            source_in_sec: source_in,
            source_out_sec: source_out,
        }
    }

    pub fn duration(&self) -> TimeSec {
        self.source_out_sec - self.source_in_sec
    }
}

/// Clip placement on timeline
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipPlace {
    pub timeline_in_sec: TimeSec,
    /// Duration on timeline; may differ from the source range due to speed
    #[serde(default)]
    pub duration_sec: TimeSec,
}

/// Audio settings for clips
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSettings {
    /// Volume in dB (-60 to +6)
    #[serde(default)]
    pub volume_db: f32,
    /// Pan (-1.0 left, 0.0 center, 1.0 right)
    #[serde(default)]
    pub pan: f32,
    #[serde(default)]
    pub muted: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            volume_db: 0.0,
            pan: 0.0,
            muted: false,
        }
    }
}

/// Clip (media segment on timeline)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    pub id: ClipId,
    pub asset_id: AssetId,
    pub range: ClipRange,
    pub place: ClipPlace,
    /// Playback speed (1.0 = normal)
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default)]
    pub audio: AudioSettings,
}

fn default_speed() -> f32 {
    1.0
}

impl Clip {
    /// Creates a clip covering `[source_in, source_out)` of the asset, placed at 0
    pub fn with_range(id: &str, asset_id: &str, source_in: TimeSec, source_out: TimeSec) -> Self {
        Self {
            id: id.to_string(),
            asset_id: asset_id.to_string(),
            range: ClipRange::new(source_in, source_out),
            place: ClipPlace {
                timeline_in_sec: 0.0,
                duration_sec: source_out - source_in,
            },
            speed: 1.0,
            audio: AudioSettings::default(),
        }
    }

    /// Places the clip at a specific timeline position
    pub fn place_at(mut self, timeline_in: TimeSec) -> Self {
        self.place.timeline_in_sec = timeline_in;
        self
    }

    /// Sets the playback speed and re-derives the timeline duration
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self.place.duration_sec = self.range.duration() / self.safe_speed();
        self
    }

    /// Playback speed with non-positive or non-finite values treated as 1.0
    pub fn safe_speed(&self) -> f64 {
        let speed = self.speed as f64;
        if speed.is_finite() && speed > 0.0 {
            speed
        } else {
            1.0
        }
    }

    /// Duration on the timeline.
    ///
    /// Uses the stored placement duration when it is valid, otherwise derives
    /// it from the source range and speed.
    pub fn duration(&self) -> TimeSec {
        let stored = self.place.duration_sec;
        if stored.is_finite() && stored > 0.0 {
            stored
        } else {
            (self.range.duration() / self.safe_speed()).max(0.0)
        }
    }

    /// Whether the source range and timeline position are usable numbers.
    ///
    /// A clip with a NaN or infinite bound cannot be timed and never plays.
    pub fn has_finite_bounds(&self) -> bool {
        self.range.source_in_sec.is_finite()
            && self.range.source_out_sec.is_finite()
            && self.place.timeline_in_sec.is_finite()
            && self.timeline_end().is_finite()
    }

    pub fn timeline_in(&self) -> TimeSec {
        self.place.timeline_in_sec
    }

    pub fn timeline_end(&self) -> TimeSec {
        self.place.timeline_in_sec + self.duration()
    }

    /// Converts a timeline time to source time
    pub fn timeline_to_source(&self, timeline_sec: TimeSec) -> TimeSec {
        let offset = timeline_sec - self.place.timeline_in_sec;
        self.range.source_in_sec + offset * self.safe_speed()
    }
}

// =============================================================================
// Timeline
// =============================================================================

/// A sequence's tracks plus the assets they reference
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub assets: HashMap<AssetId, Asset>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a timeline from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn add_asset(&mut self, asset: Asset) {
        self.assets.insert(asset.id.clone(), asset);
    }

    pub fn add_track(&mut self, track: Track) {
        self.tracks.push(track);
    }

    pub fn asset(&self, asset_id: &str) -> Option<&Asset> {
        self.assets.get(asset_id)
    }

    /// End of the last clip on any track (0 for an empty timeline)
    pub fn duration(&self) -> TimeSec {
        self.tracks
            .iter()
            .flat_map(|track| track.clips.iter())
            .map(Clip::timeline_end)
            .filter(|end| end.is_finite())
            .fold(0.0, f64::max)
    }

    /// Finds a clip and the track that owns it
    pub fn find_clip(&self, clip_id: &str) -> Option<(&Track, &Clip)> {
        self.tracks
            .iter()
            .find_map(|track| track.get_clip(clip_id).map(|clip| (track, clip)))
    }
}

// =============================================================================
// Tests
// =============================================================================
