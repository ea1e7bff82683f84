//! Audio capture sources
//!
//! This module provides the device abstraction the recorder drives, the
//! cpal-backed microphone, and a scripted in-memory source.

pub mod microphone;
pub mod scripted;
pub mod traits;

// Re-export traits
pub use traits::{AudioDeviceInfo, AudioSource, CaptureError, DeviceStream, MICROPHONE_ACCESS_MESSAGE};

pub use microphone::{list_input_devices, MicrophoneSource};
pub use scripted::{ScriptedSource, SourceStats};
