//! Microphone capture via cpal
//!
//! The cpal stream is not `Send`, so each acquisition runs it on a dedicated
//! thread that owns it for its whole life. The recorder talks to that thread
//! through a command channel and drains 16-bit little-endian PCM from a
//! shared buffer.

use super::traits::{AudioDeviceInfo, AudioSource, CaptureError, DeviceStream};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;

/// Negotiated input format
#[derive(Debug, Clone)]
struct StreamFormat {
    device_name: String,
    sample_rate: u32,
    channels: u16,
}

enum StreamCommand {
    Play,
    Pause,
    Stop,
}

/// Default (or named) system microphone
pub struct MicrophoneSource {
    id: String,
    preferred_device: Option<String>,
}

impl MicrophoneSource {
    pub fn new(preferred_device: Option<String>) -> Self {
        let preferred_device = preferred_device
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        Self {
            id: "microphone".to_string(),
            preferred_device,
        }
    }
}

impl Default for MicrophoneSource {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl AudioSource for MicrophoneSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn acquire(&self) -> Result<Box<dyn DeviceStream>, CaptureError> {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let capturing = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (control_tx, control_rx) = mpsc::channel();

        let preferred = self.preferred_device.clone();
        let thread_buffer = buffer.clone();
        let thread_capturing = capturing.clone();
        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                run_capture_thread(
                    preferred,
                    thread_buffer,
                    thread_capturing,
                    control_rx,
                    ready_tx,
                )
            })
            .map_err(|e| CaptureError::Stream(format!("Failed to spawn capture thread: {}", e)))?;

        let format = match ready_rx.await {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(CaptureError::Stream(
                    "Capture thread exited before opening the device".to_string(),
                ))
            }
        };

        tracing::info!(
            "Microphone acquired: {} ({}Hz, {}ch)",
            format.device_name,
            format.sample_rate,
            format.channels
        );

        Ok(Box::new(MicrophoneStream {
            format,
            buffer,
            capturing,
            control: Some(control_tx),
            thread: Some(thread),
        }))
    }
}

struct MicrophoneStream {
    format: StreamFormat,
    buffer: Arc<Mutex<Vec<u8>>>,
    capturing: Arc<AtomicBool>,
    control: Option<mpsc::Sender<StreamCommand>>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneStream {
    fn send(&self, command: StreamCommand) -> Result<(), CaptureError> {
        let control = self
            .control
            .as_ref()
            .ok_or_else(|| CaptureError::Stream("Stream already released".to_string()))?;
        control
            .send(command)
            .map_err(|_| CaptureError::Stream("Capture thread exited".to_string()))
    }
}

impl DeviceStream for MicrophoneStream {
    fn label(&self) -> &str {
        &self.format.device_name
    }

    fn media_type(&self) -> String {
        format!(
            "audio/L16;rate={};channels={}",
            self.format.sample_rate, self.format.channels
        )
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.control.is_some())
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        self.send(StreamCommand::Play)?;
        self.capturing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), CaptureError> {
        self.capturing.store(false, Ordering::SeqCst);
        self.send(StreamCommand::Pause)
    }

    fn resume(&mut self) -> Result<(), CaptureError> {
        self.start()
    }

    fn take_data(&mut self) -> Vec<u8> {
        std::mem::take(&mut *self.buffer.lock())
    }

    fn stop_all_tracks(&mut self) {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(control) = self.control.take() {
            let _ = control.send(StreamCommand::Stop);
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("Microphone capture thread panicked");
            }
            tracing::info!("Microphone released: {}", self.format.device_name);
        }
    }
}

impl Drop for MicrophoneStream {
    fn drop(&mut self) {
        self.stop_all_tracks();
    }
}

fn run_capture_thread(
    preferred: Option<String>,
    buffer: Arc<Mutex<Vec<u8>>>,
    capturing: Arc<AtomicBool>,
    control: mpsc::Receiver<StreamCommand>,
    ready: oneshot::Sender<Result<StreamFormat, CaptureError>>,
) {
    let (stream, format) = match open_input_stream(preferred.as_deref(), buffer, capturing) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // The acquiring task is gone; dropping the stream releases the device
    if ready.send(Ok(format)).is_err() {
        return;
    }

    while let Ok(command) = control.recv() {
        match command {
            StreamCommand::Play => {
                if let Err(e) = stream.play() {
                    tracing::error!("Failed to start microphone stream: {}", e);
                }
            }
            StreamCommand::Pause => {
                if let Err(e) = stream.pause() {
                    tracing::warn!("Failed to pause microphone stream: {}", e);
                }
            }
            StreamCommand::Stop => break,
        }
    }

    drop(stream);
    tracing::debug!("Microphone capture thread finished");
}

fn open_input_stream(
    preferred: Option<&str>,
    buffer: Arc<Mutex<Vec<u8>>>,
    capturing: Arc<AtomicBool>,
) -> Result<(cpal::Stream, StreamFormat), CaptureError> {
    let host = cpal::default_host();
    let device = pick_input_device(&host, preferred)
        .ok_or_else(|| CaptureError::DeviceUnavailable("No input device available".to_string()))?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown input".to_string());

    let supported = device.default_input_config().map_err(|e| match e {
        cpal::DefaultStreamConfigError::BackendSpecific { err } => classify_backend_error(err.description),
        other => CaptureError::DeviceUnavailable(other.to_string()),
    })?;

    let format = StreamFormat {
        device_name,
        sample_rate: supported.sample_rate().0,
        channels: supported.channels(),
    };
    let config: cpal::StreamConfig = supported.config();
    let err_fn = |err: cpal::StreamError| tracing::error!("Microphone stream error: {}", err);

    let stream = match supported.sample_format() {
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                write_samples(data.iter().copied(), &buffer, &capturing)
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                write_samples(data.iter().map(|&s| u16_to_i16(s)), &buffer, &capturing)
            },
            err_fn,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                write_samples(data.iter().map(|&s| f32_to_i16(s)), &buffer, &capturing)
            },
            err_fn,
            None,
        ),
        other => {
            return Err(CaptureError::Stream(format!(
                "Unsupported sample format: {:?}",
                other
            )))
        }
    }
    .map_err(|e| match e {
        cpal::BuildStreamError::BackendSpecific { err } => classify_backend_error(err.description),
        cpal::BuildStreamError::DeviceNotAvailable => {
            CaptureError::DeviceUnavailable("Input device disconnected".to_string())
        }
        other => CaptureError::Stream(other.to_string()),
    })?;

    Ok((stream, format))
}

fn pick_input_device(host: &cpal::Host, preferred: Option<&str>) -> Option<cpal::Device> {
    if let Some(name) = preferred {
        if let Ok(mut devices) = host.input_devices() {
            if let Some(device) = devices.find(|d| d.name().map(|n| n == name).unwrap_or(false)) {
                return Some(device);
            }
        }
        tracing::warn!(
            "Preferred input device '{}' not found, falling back to default",
            name
        );
    }
    host.default_input_device()
}

/// List the input devices of the default host
pub fn list_input_devices() -> Result<Vec<AudioDeviceInfo>, CaptureError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

    Ok(devices
        .enumerate()
        .map(|(index, device)| {
            let name = device.name().unwrap_or_else(|_| format!("Input {}", index));
            AudioDeviceInfo {
                id: name.clone(),
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                is_input: true,
            }
        })
        .collect())
}

fn classify_backend_error(description: String) -> CaptureError {
    let lower = description.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        CaptureError::PermissionDenied(description)
    } else {
        CaptureError::DeviceUnavailable(description)
    }
}

fn write_samples(samples: impl Iterator<Item = i16>, buffer: &Mutex<Vec<u8>>, capturing: &AtomicBool) {
    if !capturing.load(Ordering::Relaxed) {
        return;
    }
    let mut guard = buffer.lock();
    for sample in samples {
        guard.extend_from_slice(&sample.to_le_bytes());
    }
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn u16_to_i16(sample: u16) -> i16 {
    (i32::from(sample) - 32768) as i16
}
