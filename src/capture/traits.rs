//! Capture trait definitions
//!
//! Platform-agnostic contract for audio capture devices. A source hands out
//! exclusively owned device streams; the recorder drives their lifecycle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message shown when the microphone cannot be opened
pub const MICROPHONE_ACCESS_MESSAGE: &str =
    "Error accessing microphone. Please ensure microphone permissions are granted.";

/// Errors raised by capture devices
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

impl CaptureError {
    /// Human-readable message for the UI
    pub fn user_message(&self) -> String {
        match self {
            Self::DeviceUnavailable(_) | Self::PermissionDenied(_) => {
                MICROPHONE_ACCESS_MESSAGE.to_string()
            }
            Self::Stream(detail) => format!("Microphone stream failed: {}", detail),
        }
    }
}

/// Information about an audio device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Whether this is an input device
    pub is_input: bool,

    /// Whether this is the default device
    pub is_default: bool,
}

/// Something that can grant access to an audio-only capture device
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Source identifier used in logs
    fn id(&self) -> &str;

    /// Request exclusive access to the device.
    ///
    /// The returned stream holds the hardware until
    /// [`DeviceStream::stop_all_tracks`] is called or it is dropped.
    async fn acquire(&self) -> Result<Box<dyn DeviceStream>, CaptureError>;
}

/// Exclusive handle to an acquired device
pub trait DeviceStream: Send {
    /// Device label
    fn label(&self) -> &str;

    /// Format identifier of the bytes produced by [`take_data`](Self::take_data)
    fn media_type(&self) -> String;

    /// Number of live hardware tracks
    fn active_tracks(&self) -> usize;

    /// Begin capturing
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Suspend capturing without releasing the device
    fn pause(&mut self) -> Result<(), CaptureError>;

    /// Continue capturing after a pause
    fn resume(&mut self) -> Result<(), CaptureError>;

    /// Drain the bytes captured since the previous call
    fn take_data(&mut self) -> Vec<u8>;

    /// Stop every hardware track (idempotent)
    fn stop_all_tracks(&mut self);
}
