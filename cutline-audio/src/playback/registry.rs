//! Live playback units, at most one per clip

use crate::audio::mixer::{VoiceHandle, VoiceId};
use cutline_common::ClipId;
use std::collections::HashMap;
use uuid::Uuid;

/// Identity of one scheduled unit. A clip rescheduled after a seek gets a new one.
pub type UnitId = Uuid;

/// Parameters that decide where a unit reads from.
///
/// When any of these change on the timeline the unit no longer matches its
/// clip and has to be rebuilt.
#[derive(Debug, Clone, Copy)]
pub struct ClipPlacement {
    pub timeline_in: f64,
    pub source_in: f64,
    pub source_out: f64,
    pub speed: f64,
}

// Bitwise, so a NaN field still equals itself
impl PartialEq for ClipPlacement {
    fn eq(&self, other: &Self) -> bool {
        self.timeline_in.to_bits() == other.timeline_in.to_bits()
            && self.source_in.to_bits() == other.source_in.to_bits()
            && self.source_out.to_bits() == other.source_out.to_bits()
            && self.speed.to_bits() == other.speed.to_bits()
    }
}

/// A scheduled, possibly already audible, piece of audio for one clip
#[derive(Debug)]
pub struct PlaybackUnit {
    pub unit_id: UnitId,
    pub clip_id: ClipId,
    pub voice: VoiceHandle,
    /// Engine clock time at which the unit becomes audible
    pub scheduled_start_time: f64,
    /// Transport time the unit represents at `scheduled_start_time`
    pub timeline_anchor: f64,
    /// Transport rate the anchor advances at
    pub transport_rate: f64,
    pub start_delay: f64,
    pub source_offset: f64,
    pub play_duration: f64,
    pub placement: ClipPlacement,
}

/// Map from clip to its live unit
#[derive(Debug, Default)]
pub struct UnitRegistry {
    units: HashMap<ClipId, PlaybackUnit>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `unit` under its clip, returning any unit it displaced
    pub fn insert(&mut self, unit: PlaybackUnit) -> Option<PlaybackUnit> {
        self.units.insert(unit.clip_id.clone(), unit)
    }

    pub fn get(&self, clip_id: &str) -> Option<&PlaybackUnit> {
        self.units.get(clip_id)
    }

    pub fn contains(&self, clip_id: &str) -> bool {
        self.units.contains_key(clip_id)
    }

    /// Remove without stopping; the caller owns the returned unit
    pub fn remove(&mut self, clip_id: &str) -> Option<PlaybackUnit> {
        self.units.remove(clip_id)
    }

    /// Remove the clip's entry only if it still refers to `unit_id`.
    ///
    /// Completion of an old unit must not evict its replacement.
    pub fn remove_if_current(&mut self, clip_id: &str, unit_id: UnitId) -> Option<PlaybackUnit> {
        match self.units.get(clip_id) {
            Some(unit) if unit.unit_id == unit_id => self.units.remove(clip_id),
            _ => None,
        }
    }

    /// Unit owning the given mixer voice
    pub fn find_by_voice(&self, voice_id: VoiceId) -> Option<(ClipId, UnitId)> {
        self.units
            .values()
            .find(|unit| unit.voice.id() == voice_id)
            .map(|unit| (unit.clip_id.clone(), unit.unit_id))
    }

    /// Stop every unit and empty the registry. Returns how many were stopped.
    pub fn stop_all(&mut self) -> usize {
        let count = self.units.len();
        for (_, unit) in self.units.drain() {
            unit.voice.stop();
        }
        count
    }

    pub fn clear(&mut self) {
        self.units.clear();
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Clip ids with a live unit, sorted
    pub fn clip_ids(&self) -> Vec<ClipId> {
        let mut ids: Vec<ClipId> = self.units.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlaybackUnit> {
        self.units.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PlaybackUnit> {
        self.units.values_mut()
    }
}
