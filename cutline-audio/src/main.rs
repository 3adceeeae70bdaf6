//! Timeline preview (cutline-preview) - Main entry point
//!
//! Plays the audio of a timeline JSON file through the scheduling engine.
//! The binary acts as the host: it owns the transport, advances it in real
//! time, and logs the audio clock the engine reports back.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cutline_audio::audio::output::{list_devices, CpalBackend, HeadlessBackend, OutputBackend};
use cutline_audio::config::{Config, CONFIG_ENV_VAR};
use cutline_audio::playback::FsAssetSource;
use cutline_audio::{AudioEngine, EngineContext, TransportState};
use cutline_common::time::{millis_to_duration, secs_to_duration};
use cutline_common::Timeline;
use tokio::signal;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often the preview advances the transport
const TRANSPORT_TICK_MS: u64 = 50;

/// Block size pulled from the mixer in headless mode
const HEADLESS_BLOCK_MS: u64 = 10;

/// Command-line arguments for cutline-preview
#[derive(Parser, Debug)]
#[command(name = "cutline-preview")]
#[command(about = "Preview the audio of a Cutline timeline")]
#[command(version)]
struct Args {
    /// Timeline JSON file
    #[arg(required_unless_present = "list_devices")]
    timeline: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Folder that relative asset URIs resolve against
    /// (defaults to the timeline file's folder)
    #[arg(short, long, env = "CUTLINE_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Transport time to start from (seconds)
    #[arg(short, long, default_value_t = 0.0)]
    start: f64,

    /// Stop after this many seconds (default: end of timeline)
    #[arg(long)]
    run_for: Option<f64>,

    /// Playback rate
    #[arg(long, default_value_t = 1.0)]
    rate: f64,

    /// Render without an audio device
    #[arg(long)]
    headless: bool,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, config_path) = Config::resolve(args.config.as_deref())
        .await
        .context("Failed to load configuration")?;

    // Initialize tracing
    let level = config.logging.level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("cutline_audio={level},cutline_preview={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.list_devices {
        for name in list_devices().context("Failed to list output devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }

    let timeline_path = args
        .timeline
        .clone()
        .context("A timeline file is required")?;
    let timeline = Timeline::load(&timeline_path)
        .with_context(|| format!("Failed to load timeline {}", timeline_path.display()))?;
    let timeline_end = timeline.duration();
    info!(
        "Loaded timeline {} ({} tracks, {} assets, {:.2}s)",
        timeline_path.display(),
        timeline.tracks.len(),
        timeline.assets.len(),
        timeline_end
    );

    let root_folder = args.root_folder.clone().unwrap_or_else(|| {
        timeline_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    });
    info!("Root folder: {}", root_folder.display());

    let output: Arc<dyn OutputBackend> = if args.headless {
        Arc::new(HeadlessBackend::default())
    } else {
        Arc::new(CpalBackend::new(config.output.device_name()))
    };

    // Latest reported audio clock, as f64 bits
    let audio_clock = Arc::new(AtomicU64::new(f64::NAN.to_bits()));
    let sink_clock = Arc::clone(&audio_clock);

    let (_timeline_tx, timeline_rx) = watch::channel(Arc::new(timeline));
    let transport = Arc::new(TransportState::new());
    let engine = AudioEngine::new(
        &config,
        EngineContext {
            timeline: timeline_rx,
            transport: Arc::clone(&transport),
            assets: Arc::new(FsAssetSource::new(root_folder)),
            output,
            clock_sink: Arc::new(move |seconds: f64| {
                sink_clock.store(seconds.to_bits(), Ordering::Relaxed);
            }),
        },
    );

    engine
        .init_audio_output()
        .await
        .context("Failed to open audio output")?;

    if args.headless {
        spawn_headless_renderer(&engine);
    }

    engine.start();
    transport.set_playback_rate(args.rate).await;
    transport.set_current_time(args.start).await;
    transport.set_playing(true).await;
    info!("Playing from {:.2}s at rate {:.2}", args.start, args.rate);

    let limit = args.run_for.map(secs_to_duration);
    tokio::select! {
        _ = run_transport(&engine, &transport, &audio_clock, args.start, args.rate, timeline_end, limit) => {
            info!("Reached end of preview");
        }
        _ = shutdown_signal() => {}
    }

    transport.set_playing(false).await;
    for asset_id in engine.failed_assets() {
        if let Some(failure) = engine.failure_info(&asset_id) {
            warn!(
                "Asset {} failed {} times: {}",
                asset_id, failure.attempt_count, failure.error
            );
        }
    }
    engine.shutdown().await;

    info!("Preview complete");
    Ok(())
}

/// Advance the transport in real time until the end of the timeline or the
/// time limit
async fn run_transport(
    engine: &Arc<AudioEngine>,
    transport: &TransportState,
    audio_clock: &AtomicU64,
    start: f64,
    rate: f64,
    timeline_end: f64,
    limit: Option<Duration>,
) {
    let began = Instant::now();
    let mut ticker = tokio::time::interval(millis_to_duration(TRANSPORT_TICK_MS));
    let mut last_report = 0u64;
    let mut reported_failures = 0usize;

    loop {
        ticker.tick().await;
        let elapsed = began.elapsed();
        let time = start + elapsed.as_secs_f64() * rate;

        if time >= timeline_end || limit.is_some_and(|limit| elapsed >= limit) {
            break;
        }
        transport.set_current_time(time).await;

        let second = elapsed.as_secs();
        if second != last_report {
            last_report = second;
            let clock = f64::from_bits(audio_clock.load(Ordering::Relaxed));
            if clock.is_finite() {
                debug!(
                    "Transport {:.3}s, audio clock {:.3}s, drift {:+.1}ms, clips {:?}",
                    time,
                    clock,
                    (clock - time) * 1000.0,
                    engine.active_clip_ids()
                );
            }

            let failed = engine.failed_assets();
            if failed.len() != reported_failures {
                reported_failures = failed.len();
                warn!("Assets failing to load: {:?}", failed);
            }
        }
    }
}

/// Pull frames from the mixer at real-time pace when there is no device
fn spawn_headless_renderer(engine: &Arc<AudioEngine>) {
    let Some(mixer) = engine.mixer() else {
        return;
    };
    let frames = (mixer.sample_rate() as u64 * HEADLESS_BLOCK_MS / 1000) as usize;
    let mut block = vec![0.0f32; frames * mixer.channels()];

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(millis_to_duration(HEADLESS_BLOCK_MS));
        loop {
            ticker.tick().await;
            mixer.render(&mut block);
        }
    });
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
