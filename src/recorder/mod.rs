//! Recording system module
//!
//! This module implements the capture session architecture:
//! - CaptureController state machine owning the device, chunks and clock
//! - AudioRecorder adapter with auto-stop and the completion callback
//! - RecorderService event loop driving ticks and flushes on a tokio task

pub mod accumulator;
pub mod adapter;
pub mod clock;
pub mod coordinator;
pub mod error;
pub mod service;
pub mod state;

pub use adapter::{AudioRecorder, CompletionCallback};
pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use coordinator::{CaptureController, PendingStart, RecordingEvent, StartTicket};
pub use error::{RecorderError, RecorderResult};
pub use service::{RecorderHandle, RecorderService};
pub use state::{
    format_clock, ArtifactSummary, CaptureStatus, FinishedArtifact, RecorderConfig,
    RecorderSnapshot, DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_MAX_DURATION_SECS,
};
