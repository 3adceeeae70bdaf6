//! Scheduling engine integration tests
//!
//! Exercise scheduling passes end to end over a headless output: unit timing,
//! single-flight passes under racing triggers, stale-result cancellation and
//! seek handling.

mod helpers;

use cutline_audio::audio::VoiceEnded;
use cutline_audio::TransportEvent;
use helpers::{adjacent_clips_timeline, single_clip_timeline, tone_source, wait_until, Harness, TestSource};
use std::sync::Arc;
use std::time::Duration;

const EPS: f64 = 1e-6;

/// **Given:** clip a on [0, 5) and clip b on [5, 10), transport at 4.8 s
/// **When:** one scheduling pass runs
/// **Then:** a plays its last 0.2 s immediately and b starts 0.2 s later from
/// its beginning
#[tokio::test]
async fn test_adjacent_clips_scheduled_with_correct_timing() {
    let harness = Harness::new(adjacent_clips_timeline(), tone_source(TestSource::new()));
    harness.play_from(4.8).await;
    harness.engine.init_audio_output().await.unwrap();

    harness.engine.run_scheduling_pass().await;

    assert_eq!(harness.engine.active_clip_ids(), vec!["a", "b"]);

    let a = harness.engine.unit("a").unwrap();
    assert!(a.start_delay.abs() < EPS);
    assert!((a.source_offset - 4.8).abs() < EPS);
    assert!((a.play_duration - 0.2).abs() < EPS);
    assert!(a.scheduled_start_time.abs() < EPS);

    let b = harness.engine.unit("b").unwrap();
    assert!((b.start_delay - 0.2).abs() < EPS);
    assert!(b.source_offset.abs() < EPS);
    assert!((b.play_duration - 5.0).abs() < EPS);
    assert!((b.scheduled_start_time - 0.2).abs() < EPS);

    assert_eq!(a.gain, 1.0);
    assert_eq!(a.rate, 1.0);
    assert_eq!(harness.engine.mixer().unwrap().active_voices(), 2);

    // Unit a is audible at engine time 0 and represents transport time 4.8
    let clock = harness.last_clock().unwrap();
    assert!((clock - 4.8).abs() < EPS);
}

/// **Given:** a pass is suspended on a slow load
/// **When:** several more passes are triggered meanwhile
/// **Then:** exactly one unit exists for the clip and the asset was fetched once
#[tokio::test]
async fn test_racing_triggers_create_one_unit() {
    let harness = Harness::new(single_clip_timeline(), tone_source(TestSource::gated()));
    harness.play_from(1.0).await;
    harness.engine.init_audio_output().await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let engine = Arc::clone(&harness.engine);
        tasks.push(tokio::spawn(async move {
            engine.run_scheduling_pass().await;
        }));
    }
    let engine = Arc::clone(&harness.engine);
    tasks.push(tokio::spawn(async move {
        engine
            .handle_transport_event(TransportEvent::VolumeChanged(1.0))
            .await;
    }));

    let source = Arc::clone(&harness.source);
    assert!(wait_until(Duration::from_secs(2), || source.fetch_count("a.wav") == 1).await);
    tokio::time::sleep(Duration::from_millis(20)).await;

    harness.source.open_gate();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(harness.engine.active_clip_ids(), vec!["a"]);
    assert_eq!(harness.source.fetch_count("a.wav"), 1);
    assert_eq!(harness.engine.mixer().unwrap().active_voices(), 1);
}

/// **Given:** both clips already scheduled
/// **When:** passes run again, debounced and forced
/// **Then:** no unit is replaced and no asset is fetched again
#[tokio::test]
async fn test_repeated_passes_are_idempotent() {
    let harness = Harness::new(adjacent_clips_timeline(), tone_source(TestSource::new()));
    harness.play_from(4.8).await;
    harness.engine.init_audio_output().await.unwrap();

    harness.engine.run_scheduling_pass().await;
    let first_a = harness.engine.unit("a").unwrap();
    let first_b = harness.engine.unit("b").unwrap();

    harness.engine.run_scheduling_pass().await;
    harness
        .engine
        .handle_transport_event(TransportEvent::VolumeChanged(1.0))
        .await;

    assert_eq!(harness.engine.unit("a").unwrap().unit_id, first_a.unit_id);
    assert_eq!(harness.engine.unit("b").unwrap().unit_id, first_b.unit_id);
    assert_eq!(harness.source.fetch_count("a.wav"), 1);
    assert_eq!(harness.source.fetch_count("b.wav"), 1);
    assert_eq!(harness.engine.mixer().unwrap().active_voices(), 2);
}

/// **Given:** a pass is suspended loading clip a
/// **When:** the user seeks past the clip before the load completes
/// **Then:** the completed load creates no unit
#[tokio::test(start_paused = true)]
async fn test_stale_load_after_seek_creates_no_unit() {
    let harness = Harness::new(single_clip_timeline(), tone_source(TestSource::gated()));
    harness.play_from(1.0).await;
    harness.engine.init_audio_output().await.unwrap();

    let engine = Arc::clone(&harness.engine);
    let pass = tokio::spawn(async move {
        engine
            .handle_transport_event(TransportEvent::PlayStateChanged(true))
            .await;
    });

    let source = Arc::clone(&harness.source);
    assert!(wait_until(Duration::from_secs(2), || source.fetch_count("a.wav") == 1).await);

    tokio::time::advance(Duration::from_millis(100)).await;
    harness.transport.set_current_time(30.0).await;
    harness
        .engine
        .handle_transport_event(TransportEvent::TimeChanged(30.0))
        .await;
    assert_eq!(harness.engine.schedule_version(), 1);

    harness.source.open_gate();
    pass.await.unwrap();

    assert!(harness.engine.active_clip_ids().is_empty());
    assert_eq!(harness.engine.mixer().unwrap().active_voices(), 0);
    // The load itself still lands in the cache
    assert!(harness.engine.cache().cached("a").is_some());
}

/// **Given:** a pass is suspended loading clip a at 1.0 s
/// **When:** the user seeks to 3.0 s, still inside the clip
/// **Then:** the unit is built for 3.0 s, not for the stale 1.0 s
#[tokio::test(start_paused = true)]
async fn test_seek_during_load_reschedules_from_new_time() {
    let harness = Harness::new(single_clip_timeline(), tone_source(TestSource::gated()));
    harness.play_from(1.0).await;
    harness.engine.init_audio_output().await.unwrap();

    let engine = Arc::clone(&harness.engine);
    let pass = tokio::spawn(async move {
        engine
            .handle_transport_event(TransportEvent::PlayStateChanged(true))
            .await;
    });

    let source = Arc::clone(&harness.source);
    assert!(wait_until(Duration::from_secs(2), || source.fetch_count("a.wav") == 1).await);

    tokio::time::advance(Duration::from_millis(100)).await;
    harness.transport.set_current_time(3.0).await;
    harness
        .engine
        .handle_transport_event(TransportEvent::TimeChanged(3.0))
        .await;

    harness.source.open_gate();
    pass.await.unwrap();

    let unit = harness.engine.unit("a").unwrap();
    assert!((unit.source_offset - 3.0).abs() < EPS);
    assert!((unit.play_duration - 2.0).abs() < EPS);
    assert_eq!(harness.engine.mixer().unwrap().active_voices(), 1);
    assert_eq!(harness.source.fetch_count("a.wav"), 1);
}

/// **Given:** a pass is suspended on a load
/// **When:** playback pauses
/// **Then:** the load completes without creating a unit
#[tokio::test]
async fn test_pause_during_load_creates_no_unit() {
    let harness = Harness::new(single_clip_timeline(), tone_source(TestSource::gated()));
    harness.play_from(1.0).await;
    harness.engine.init_audio_output().await.unwrap();

    let engine = Arc::clone(&harness.engine);
    let pass = tokio::spawn(async move {
        engine.run_scheduling_pass().await;
    });

    let source = Arc::clone(&harness.source);
    assert!(wait_until(Duration::from_secs(2), || source.fetch_count("a.wav") == 1).await);

    harness.transport.set_playing(false).await;
    harness
        .engine
        .handle_transport_event(TransportEvent::PlayStateChanged(false))
        .await;

    harness.source.open_gate();
    pass.await.unwrap();

    assert!(harness.engine.active_clip_ids().is_empty());
    assert_eq!(harness.engine.mixer().unwrap().active_voices(), 0);
}

/// **Given:** transport progressing at rate 1
/// **When:** time updates arrive
/// **Then:** small steps are progress, a 2 s jump in 50 ms is a seek, and a
/// seek while paused leaves the schedule alone
#[tokio::test(start_paused = true)]
async fn test_seek_boundary_through_engine() {
    let harness = Harness::new(single_clip_timeline(), tone_source(TestSource::new()));
    harness.play_from(1.0).await;
    harness.engine.init_audio_output().await.unwrap();
    harness
        .engine
        .handle_transport_event(TransportEvent::PlayStateChanged(true))
        .await;
    assert_eq!(harness.engine.schedule_version(), 0);
    let first = harness.engine.unit("a").unwrap();

    tokio::time::advance(Duration::from_millis(50)).await;
    harness.transport.set_current_time(1.05).await;
    harness
        .engine
        .handle_transport_event(TransportEvent::TimeChanged(1.05))
        .await;
    assert_eq!(harness.engine.schedule_version(), 0);
    assert_eq!(harness.engine.unit("a").unwrap().unit_id, first.unit_id);

    tokio::time::advance(Duration::from_millis(50)).await;
    harness.transport.set_current_time(3.05).await;
    harness
        .engine
        .handle_transport_event(TransportEvent::TimeChanged(3.05))
        .await;
    assert_eq!(harness.engine.schedule_version(), 1);
    let rescheduled = harness.engine.unit("a").unwrap();
    assert_ne!(rescheduled.unit_id, first.unit_id);
    assert!((rescheduled.source_offset - 3.05).abs() < EPS);

    harness.transport.set_playing(false).await;
    harness
        .engine
        .handle_transport_event(TransportEvent::PlayStateChanged(false))
        .await;
    assert_eq!(harness.engine.schedule_version(), 2);
    assert!(harness.engine.active_clip_ids().is_empty());

    tokio::time::advance(Duration::from_millis(50)).await;
    harness.transport.set_current_time(20.0).await;
    harness
        .engine
        .handle_transport_event(TransportEvent::TimeChanged(20.0))
        .await;
    assert_eq!(harness.engine.schedule_version(), 2);
}

/// **Given:** clip a rescheduled after a seek
/// **When:** the replaced voice reports completion
/// **Then:** the replacement unit stays registered
#[tokio::test(start_paused = true)]
async fn test_stale_completion_keeps_replacement() {
    let harness = Harness::new(single_clip_timeline(), tone_source(TestSource::new()));
    harness.play_from(1.0).await;
    harness.engine.init_audio_output().await.unwrap();
    harness
        .engine
        .handle_transport_event(TransportEvent::PlayStateChanged(true))
        .await;
    let old = harness.engine.unit("a").unwrap();

    tokio::time::advance(Duration::from_millis(100)).await;
    harness.transport.set_current_time(3.0).await;
    harness
        .engine
        .handle_transport_event(TransportEvent::TimeChanged(3.0))
        .await;
    let replacement = harness.engine.unit("a").unwrap();
    assert_ne!(replacement.unit_id, old.unit_id);

    harness.engine.handle_voice_ended(VoiceEnded {
        voice_id: old.voice_id,
    });
    assert_eq!(harness.engine.unit("a").unwrap().unit_id, replacement.unit_id);

    harness.engine.handle_voice_ended(VoiceEnded {
        voice_id: replacement.voice_id,
    });
    assert!(harness.engine.unit("a").is_none());
}

/// **Given:** clip a with 0.2 s left and clip b queued
/// **When:** the mixer renders past the end of a
/// **Then:** a's voice finishes and its completion removes only a
#[tokio::test]
async fn test_natural_completion_removes_unit() {
    let harness = Harness::new(adjacent_clips_timeline(), tone_source(TestSource::new()));
    harness.play_from(4.8).await;
    harness.engine.init_audio_output().await.unwrap();
    harness.engine.run_scheduling_pass().await;

    let a = harness.engine.unit("a").unwrap();
    harness.render(0.3);
    assert_eq!(harness.engine.mixer().unwrap().active_voices(), 1);

    harness
        .engine
        .handle_voice_ended(VoiceEnded { voice_id: a.voice_id });
    assert_eq!(harness.engine.active_clip_ids(), vec!["b"]);
}

/// **Given:** master 0.5, track 0.5 and a clip at -20 dB
/// **When:** the clip is scheduled, then the transport is muted
/// **Then:** the unit plays at 0.025 and drops to silence without being rebuilt
#[tokio::test]
async fn test_gain_follows_volume_and_mute() {
    let harness = Harness::new(single_clip_timeline(), tone_source(TestSource::new()));
    harness.edit_timeline(|timeline| {
        timeline.tracks[0].volume = 0.5;
        timeline.tracks[0].clips[0].audio.volume_db = -20.0;
    });
    harness.transport.set_master_volume(0.5).await;
    harness.play_from(1.0).await;
    harness.engine.init_audio_output().await.unwrap();
    harness.engine.run_scheduling_pass().await;

    let unit = harness.engine.unit("a").unwrap();
    assert!((unit.gain - 0.025).abs() < 1e-6);

    harness.transport.set_muted(true).await;
    harness
        .engine
        .handle_transport_event(TransportEvent::MuteChanged(true))
        .await;

    let muted = harness.engine.unit("a").unwrap();
    assert_eq!(muted.gain, 0.0);
    assert_eq!(muted.unit_id, unit.unit_id);
}

/// **Given:** a live unit at rate 1
/// **When:** the transport rate doubles
/// **Then:** the voice rate follows and the unit is kept
#[tokio::test]
async fn test_rate_change_updates_live_unit() {
    let harness = Harness::new(single_clip_timeline(), tone_source(TestSource::new()));
    harness.play_from(1.0).await;
    harness.engine.init_audio_output().await.unwrap();
    harness.engine.run_scheduling_pass().await;
    let unit = harness.engine.unit("a").unwrap();

    harness.transport.set_playback_rate(2.0).await;
    harness
        .engine
        .handle_transport_event(TransportEvent::RateChanged(2.0))
        .await;

    let updated = harness.engine.unit("a").unwrap();
    assert_eq!(updated.unit_id, unit.unit_id);
    assert_eq!(updated.rate, 2.0);
}

/// **Given:** clips a and b scheduled
/// **When:** b is deleted and a's track is then muted
/// **Then:** each unit is stopped and evicted on the next pass
#[tokio::test]
async fn test_removed_and_muted_clips_are_evicted() {
    let harness = Harness::new(adjacent_clips_timeline(), tone_source(TestSource::new()));
    harness.play_from(4.8).await;
    harness.engine.init_audio_output().await.unwrap();
    harness.engine.run_scheduling_pass().await;
    assert_eq!(harness.engine.active_clip_ids(), vec!["a", "b"]);

    harness.edit_timeline(|timeline| {
        timeline.tracks[0].clips.retain(|clip| clip.id != "b");
    });
    harness
        .engine
        .handle_transport_event(TransportEvent::VolumeChanged(1.0))
        .await;
    assert_eq!(harness.engine.active_clip_ids(), vec!["a"]);

    harness.edit_timeline(|timeline| timeline.tracks[0].muted = true);
    harness
        .engine
        .handle_transport_event(TransportEvent::VolumeChanged(1.0))
        .await;
    assert!(harness.engine.active_clip_ids().is_empty());
    assert_eq!(harness.engine.mixer().unwrap().active_voices(), 2);

    // Stopped voices leave the mixer on the next render
    harness.render(0.01);
    assert_eq!(harness.engine.mixer().unwrap().active_voices(), 0);
}

/// **Given:** clip a scheduled at 1.0 s
/// **When:** the clip is moved on the timeline
/// **Then:** its unit is rebuilt for the new placement
#[tokio::test]
async fn test_moved_clip_is_rescheduled() {
    let harness = Harness::new(single_clip_timeline(), tone_source(TestSource::new()));
    harness.play_from(1.0).await;
    harness.engine.init_audio_output().await.unwrap();
    harness.engine.run_scheduling_pass().await;
    let before = harness.engine.unit("a").unwrap();
    assert!((before.source_offset - 1.0).abs() < EPS);

    harness.edit_timeline(|timeline| {
        timeline.tracks[0].clips[0].place.timeline_in_sec = 0.5;
    });
    harness
        .engine
        .handle_transport_event(TransportEvent::VolumeChanged(1.0))
        .await;

    let after = harness.engine.unit("a").unwrap();
    assert_ne!(after.unit_id, before.unit_id);
    assert!((after.source_offset - 0.5).abs() < EPS);
    assert_eq!(harness.source.fetch_count("a.wav"), 1);
}

/// **Given:** clip a with a NaN source end and clip b intact
/// **When:** a pass runs, then b's position becomes infinite
/// **Then:** a is never scheduled or fetched, b is scheduled and later evicted,
/// and every pass returns
#[tokio::test]
async fn test_non_finite_clip_bounds_are_never_scheduled() {
    let harness = Harness::new(adjacent_clips_timeline(), tone_source(TestSource::new()));
    harness.edit_timeline(|timeline| {
        timeline.tracks[0].clips[0].range.source_out_sec = f64::NAN;
    });
    harness.play_from(4.8).await;
    harness.engine.init_audio_output().await.unwrap();

    let pass = tokio::time::timeout(Duration::from_secs(2), harness.engine.run_scheduling_pass()).await;
    assert!(pass.is_ok(), "scheduling pass did not return");
    assert_eq!(harness.engine.active_clip_ids(), vec!["b"]);
    assert_eq!(harness.engine.mixer().unwrap().active_voices(), 1);
    assert_eq!(harness.source.fetch_count("a.wav"), 0);
    let version = harness.engine.schedule_version();

    harness.edit_timeline(|timeline| {
        timeline.tracks[0].clips[1].place.timeline_in_sec = f64::INFINITY;
    });
    let pass = tokio::time::timeout(
        Duration::from_secs(2),
        harness
            .engine
            .handle_transport_event(TransportEvent::VolumeChanged(1.0)),
    )
    .await;
    assert!(pass.is_ok(), "scheduling pass did not return");
    assert!(harness.engine.active_clip_ids().is_empty());
    assert_eq!(harness.engine.schedule_version(), version);

    // Stopped voices leave on the next block and nothing is recreated
    harness.render(0.01);
    assert_eq!(harness.engine.mixer().unwrap().active_voices(), 0);
}

/// **Given:** a clip whose source start is NaN, in progress at the transport time
/// **When:** passes keep running
/// **Then:** no voice is ever created for it
#[tokio::test]
async fn test_nan_source_start_creates_no_voice() {
    let harness = Harness::new(single_clip_timeline(), tone_source(TestSource::new()));
    harness.edit_timeline(|timeline| {
        timeline.tracks[0].clips[0].range.source_in_sec = f64::NAN;
    });
    harness.play_from(1.0).await;
    harness.engine.init_audio_output().await.unwrap();

    for _ in 0..3 {
        harness
            .engine
            .handle_transport_event(TransportEvent::VolumeChanged(1.0))
            .await;
    }

    assert!(harness.engine.active_clip_ids().is_empty());
    assert_eq!(harness.engine.mixer().unwrap().active_voices(), 0);
    assert!(harness.engine.failed_assets().is_empty());
}
