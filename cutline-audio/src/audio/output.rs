//! Audio output backends
//!
//! A backend opens a device stream whose callback pulls frames from the
//! [`Mixer`]. The cpal stream lives on its own thread (streams are not `Send`
//! on every platform); the returned [`OutputStream`] talks to that thread over
//! a command channel and closes it on drop.

use crate::audio::mixer::Mixer;
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SizedSample, Stream, StreamConfig};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Opens output streams for a mixer
pub trait OutputBackend: Send + Sync {
    /// Open a stream rendering `mixer`. Blocks until the device is running.
    fn open(&self, mixer: Arc<Mixer>) -> Result<Box<dyn OutputStream>>;
}

/// A running output stream. Dropping it closes the device.
pub trait OutputStream: Send {
    /// Resume a stream the platform suspended
    fn resume(&self) -> Result<()>;
}

/// List available output device names
pub fn list_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();

    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
        .filter_map(|device| device.name().ok())
        .collect();

    debug!("Found {} output devices", devices.len());
    Ok(devices)
}

/// Hardware output through cpal
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    /// Requested device (None = host default)
    device_name: Option<String>,
}

impl CpalBackend {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

enum StreamCommand {
    Resume,
    Close,
}

struct CpalStream {
    commands: mpsc::Sender<StreamCommand>,
    thread: Option<JoinHandle<()>>,
    error_count: Arc<AtomicU32>,
}

impl OutputBackend for CpalBackend {
    fn open(&self, mixer: Arc<Mixer>) -> Result<Box<dyn OutputStream>> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let (command_tx, command_rx) = mpsc::channel::<StreamCommand>();
        let device_name = self.device_name.clone();
        let error_count = Arc::new(AtomicU32::new(0));
        let stream_errors = Arc::clone(&error_count);

        let thread = std::thread::Builder::new()
            .name("cutline-audio-out".to_string())
            .spawn(move || {
                let stream = match build_stream(device_name.as_deref(), mixer, stream_errors)
                    .and_then(|stream| {
                        stream
                            .play()
                            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
                        Ok(stream)
                    }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StreamCommand::Resume => {
                            if let Err(e) = stream.play() {
                                warn!("Failed to resume audio stream: {}", e);
                            }
                        }
                        StreamCommand::Close => break,
                    }
                }

                if let Err(e) = stream.pause() {
                    debug!("Failed to pause stream during close: {}", e);
                }
                debug!("Audio output thread exiting");
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn audio thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("Audio stream started successfully");
                Ok(Box::new(CpalStream {
                    commands: command_tx,
                    thread: Some(thread),
                    error_count,
                }))
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::AudioOutput(
                    "Audio thread exited before the stream started".to_string(),
                ))
            }
        }
    }
}

impl OutputStream for CpalStream {
    fn resume(&self) -> Result<()> {
        let errors = self.error_count.load(Ordering::Relaxed);
        if errors > 0 {
            debug!("Resuming audio stream after {} stream errors", errors);
        }
        self.commands
            .send(StreamCommand::Resume)
            .map_err(|_| Error::AudioOutput("Audio output thread is gone".to_string()))
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        let _ = self.commands.send(StreamCommand::Close);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Audio output thread panicked");
            }
        }
    }
}

/// Pick the requested device, falling back to the host default
fn select_device(device_name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();

    if let Some(name) = device_name {
        let mut devices = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;

        if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            info!("Found requested audio device: {}", name);
            return Ok(device);
        }
        warn!("Requested device '{}' not found, falling back to default device", name);
    }

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?;
    info!(
        "Using default audio device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );
    Ok(device)
}

fn build_stream(device_name: Option<&str>, mixer: Arc<Mixer>, error_count: Arc<AtomicU32>) -> Result<Stream> {
    let device = select_device(device_name)?;
    let supported = device
        .default_output_config()
        .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.config();
    mixer.set_format(config.sample_rate.0, config.channels);

    debug!(
        "Audio config: sample_rate={}, channels={}, format={:?}",
        config.sample_rate.0, config.channels, sample_format
    );

    match sample_format {
        SampleFormat::F32 => build_f32_stream(&device, &config, mixer, error_count),
        SampleFormat::I16 => build_converting_stream(&device, &config, mixer, error_count, |s| {
            (s * i16::MAX as f32) as i16
        }),
        SampleFormat::U16 => build_converting_stream(&device, &config, mixer, error_count, |s| {
            ((s + 1.0) * 32767.5) as u16
        }),
        other => Err(Error::AudioOutput(format!("Unsupported sample format: {:?}", other))),
    }
}

fn stream_error_callback(error_count: Arc<AtomicU32>) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        error!("Audio stream error: {}", err);
        error_count.fetch_add(1, Ordering::Relaxed);
    }
}

fn build_f32_stream(
    device: &Device,
    config: &StreamConfig,
    mixer: Arc<Mixer>,
    error_count: Arc<AtomicU32>,
) -> Result<Stream> {
    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                mixer.render(data);
                for sample in data.iter_mut() {
                    *sample = sample.clamp(-1.0, 1.0);
                }
            },
            stream_error_callback(error_count),
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}

/// Integer device formats render into a float scratch buffer first
fn build_converting_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mixer: Arc<Mixer>,
    error_count: Arc<AtomicU32>,
    convert: fn(f32) -> T,
) -> Result<Stream>
where
    T: SizedSample + Send + 'static,
{
    let mut scratch: Vec<f32> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                mixer.render(&mut scratch);
                for (out, sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = convert(sample.clamp(-1.0, 1.0));
                }
            },
            stream_error_callback(error_count),
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}

/// Output without a device.
///
/// The mixer clock only advances when the host calls [`Mixer::render`]
/// itself, which makes engine timing fully deterministic.
#[derive(Debug, Clone)]
pub struct HeadlessBackend {
    sample_rate: u32,
    channels: u16,
}

impl HeadlessBackend {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(48_000, 2)
    }
}

struct HeadlessStream;

impl OutputBackend for HeadlessBackend {
    fn open(&self, mixer: Arc<Mixer>) -> Result<Box<dyn OutputStream>> {
        mixer.set_format(self.sample_rate, self.channels);
        debug!(
            "Headless output opened: {} Hz, {} channels",
            self.sample_rate, self.channels
        );
        Ok(Box::new(HeadlessStream))
    }
}

impl OutputStream for HeadlessStream {
    fn resume(&self) -> Result<()> {
        Ok(())
    }
}
