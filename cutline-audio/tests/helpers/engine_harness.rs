//! Engine wiring for integration tests
//!
//! Builds an [`AudioEngine`] over a headless output, a [`TestSource`] and a
//! timeline channel the test can edit.

use super::audio_generator::sine_wav_bytes;
use super::test_source::TestSource;
use cutline_audio::audio::output::{HeadlessBackend, OutputBackend};
use cutline_audio::{AudioEngine, Config, EngineContext, TransportState};
use cutline_common::{Asset, Clip, Timeline, Track};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Output format of the headless backend
pub const OUTPUT_SAMPLE_RATE: u32 = 48_000;

pub struct Harness {
    pub engine: Arc<AudioEngine>,
    pub transport: Arc<TransportState>,
    pub source: Arc<TestSource>,
    pub timeline_tx: watch::Sender<Arc<Timeline>>,
    pub clock_reports: Arc<Mutex<Vec<f64>>>,
}

impl Harness {
    pub fn new(timeline: Timeline, source: TestSource) -> Self {
        Self::with_output(
            timeline,
            source,
            Arc::new(HeadlessBackend::new(OUTPUT_SAMPLE_RATE, 2)),
        )
    }

    pub fn with_output(timeline: Timeline, source: TestSource, output: Arc<dyn OutputBackend>) -> Self {
        let source = Arc::new(source);
        let transport = Arc::new(TransportState::new());
        let (timeline_tx, timeline_rx) = watch::channel(Arc::new(timeline));
        let clock_reports = Arc::new(Mutex::new(Vec::new()));
        let sink_reports = Arc::clone(&clock_reports);

        let engine = AudioEngine::new(
            &Config::default(),
            EngineContext {
                timeline: timeline_rx,
                transport: Arc::clone(&transport),
                assets: source.clone(),
                output,
                clock_sink: Arc::new(move |seconds: f64| {
                    sink_reports.lock().unwrap().push(seconds);
                }),
            },
        );

        Self {
            engine,
            transport,
            source,
            timeline_tx,
            clock_reports,
        }
    }

    /// Put the transport at `time` and start playing, without notifying the engine
    pub async fn play_from(&self, time: f64) {
        self.transport.set_current_time(time).await;
        self.transport.set_playing(true).await;
    }

    /// Replace the timeline snapshot the engine reads
    pub fn edit_timeline(&self, edit: impl FnOnce(&mut Timeline)) {
        let mut timeline = (**self.timeline_tx.borrow()).clone();
        edit(&mut timeline);
        self.timeline_tx.send_replace(Arc::new(timeline));
    }

    /// Render `seconds` of output through the headless mixer
    pub fn render(&self, seconds: f64) {
        let mixer = self.engine.mixer().expect("output open");
        let frames = (seconds * mixer.sample_rate() as f64).round() as usize;
        let mut block = vec![0.0f32; frames * mixer.channels()];
        mixer.render(&mut block);
    }

    pub fn last_clock(&self) -> Option<f64> {
        self.clock_reports.lock().unwrap().last().copied()
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Clip "a" on `[0, 5)` from a.wav and clip "b" on `[5, 10)` from b.wav
pub fn adjacent_clips_timeline() -> Timeline {
    let mut timeline = Timeline::new();
    timeline.add_asset(Asset::new_audio("a", "a.wav"));
    timeline.add_asset(Asset::new_audio("b", "b.wav"));

    let mut track = Track::new_audio("t1");
    track.add_clip(Clip::with_range("a", "a", 0.0, 5.0));
    track.add_clip(Clip::with_range("b", "b", 0.0, 5.0).place_at(5.0));
    timeline.add_track(track);
    timeline
}

/// Single clip "a" on `[0, 5)` from a.wav
pub fn single_clip_timeline() -> Timeline {
    let mut timeline = Timeline::new();
    timeline.add_asset(Asset::new_audio("a", "a.wav"));

    let mut track = Track::new_audio("t1");
    track.add_clip(Clip::with_range("a", "a", 0.0, 5.0));
    timeline.add_track(track);
    timeline
}

/// Source serving five-second tones for a.wav and b.wav
pub fn tone_source(source: TestSource) -> TestSource {
    source
        .with_payload("a.wav", sine_wav_bytes(5.0, 440.0, 0.5))
        .with_payload("b.wav", sine_wav_bytes(5.0, 660.0, 0.5))
}
