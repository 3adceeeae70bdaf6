//! Seek detection and scrub velocity
//!
//! Every transport time update is compared with the previous one. A jump that
//! the elapsed wall time and playback rate cannot explain is a seek; natural
//! progress (and tiny jitter) is not.

use crate::config::SchedulerSettings;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekKind {
    Natural,
    Seek,
}

/// One transport time update
#[derive(Debug, Clone, Copy)]
pub struct TimeObservation {
    pub time: f64,
    pub wall: Instant,
}

/// Classifies time updates against the configured tolerances
#[derive(Debug, Clone)]
pub struct SeekClassifier {
    min_delta: f64,
    tolerance: f64,
    tolerance_ratio: f64,
}

impl SeekClassifier {
    pub fn new(settings: &SchedulerSettings) -> Self {
        Self {
            min_delta: settings.seek_min_delta_sec,
            tolerance: settings.progress_tolerance_sec,
            tolerance_ratio: settings.progress_tolerance_ratio,
        }
    }

    /// Classify a time delta `delta_time` observed over `delta_wall` seconds
    pub fn classify(&self, delta_time: f64, delta_wall: f64, rate: f64) -> SeekKind {
        let distance = delta_time.abs();
        if distance < self.min_delta || delta_wall <= 0.0 {
            return SeekKind::Natural;
        }

        let rate = if rate.is_finite() { rate.abs() } else { 1.0 };
        let expected = rate * delta_wall;
        let tolerance = self.tolerance.max(expected * self.tolerance_ratio);
        if distance <= expected + tolerance {
            SeekKind::Natural
        } else {
            SeekKind::Seek
        }
    }

    /// Whether a delta is too small to count as either seek or progress
    fn is_jitter(&self, delta_time: f64) -> bool {
        delta_time.abs() < self.min_delta
    }
}

/// Last observation plus the most recent seek velocity
#[derive(Debug, Default)]
pub struct SeekVelocityState {
    last: Option<TimeObservation>,
    velocity: f64,
}

impl SeekVelocityState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a time update and classify it against the previous one.
    ///
    /// Non-finite times are ignored. A seek sets the velocity to
    /// `|Δtime| / Δwall`; natural progress brings it back to zero.
    pub fn observe(&mut self, time: f64, wall: Instant, rate: f64, classifier: &SeekClassifier) -> SeekKind {
        if !time.is_finite() {
            return SeekKind::Natural;
        }

        let Some(previous) = self.last.replace(TimeObservation { time, wall }) else {
            return SeekKind::Natural;
        };

        let delta_time = time - previous.time;
        let delta_wall = wall.saturating_duration_since(previous.wall).as_secs_f64();
        let kind = classifier.classify(delta_time, delta_wall, rate);

        match kind {
            SeekKind::Seek => {
                self.velocity = delta_time.abs() / delta_wall;
            }
            SeekKind::Natural if !classifier.is_jitter(delta_time) => {
                self.velocity = 0.0;
            }
            SeekKind::Natural => {}
        }
        kind
    }

    /// Restart comparisons from `time` without classifying (e.g. on resume)
    pub fn rebase(&mut self, time: f64, wall: Instant) {
        if time.is_finite() {
            self.last = Some(TimeObservation { time, wall });
        }
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    pub fn last_observation(&self) -> Option<TimeObservation> {
        self.last
    }

    /// Look-ahead window for the current velocity.
    ///
    /// Widens proportionally above the rapid-scrub threshold, capped at the
    /// configured maximum.
    pub fn look_ahead(&self, settings: &SchedulerSettings) -> f64 {
        let rapid = settings.rapid_seek_velocity;
        if rapid > 0.0 && self.velocity > rapid {
            (settings.base_ahead_sec * self.velocity / rapid).min(settings.max_ahead_sec)
        } else {
            settings.base_ahead_sec
        }
    }
}
