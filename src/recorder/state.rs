//! Recording state management
//!
//! Defines the capture status machine, recorder configuration, the finished
//! artifact handed to the upload workflow, and the snapshot observed by the UI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Default ceiling for a single reflection (5 minutes)
pub const DEFAULT_MAX_DURATION_SECS: u64 = 300;

/// Default interval between data flushes from the capture device
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;

/// Current status of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CaptureStatus {
    /// No session in progress
    #[default]
    Idle,
    /// Capturing audio
    Recording,
    /// Session open, capture suspended
    Paused,
    /// Session finished and finalized
    Stopped,
    /// Device acquisition failed
    Failed,
}

impl CaptureStatus {
    /// Whether the status holds a device stream
    pub fn is_active(self) -> bool {
        matches!(self, Self::Recording | Self::Paused)
    }
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Recording => "Recording",
            Self::Paused => "Paused",
            Self::Stopped => "Stopped",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Configuration for the recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecorderConfig {
    /// Auto-stop ceiling in seconds (0 disables auto-stop)
    pub max_duration_seconds: u64,

    /// How often captured data is drained into the accumulator
    pub flush_interval_ms: u64,

    /// Preferred input device name (system default when unset)
    pub input_device: Option<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            max_duration_seconds: DEFAULT_MAX_DURATION_SECS,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            input_device: None,
        }
    }
}

impl RecorderConfig {
    /// Builder-style override of the auto-stop ceiling
    pub fn with_max_duration(mut self, seconds: u64) -> Self {
        self.max_duration_seconds = seconds;
        self
    }
}

/// Immutable result of a completed capture session.
///
/// The payload is reference counted: clones handed to the completion callback
/// and kept by the recorder share one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedArtifact {
    id: Uuid,
    payload: Arc<[u8]>,
    media_type: String,
    duration_seconds: u64,
    chunk_count: usize,
    created_at: DateTime<Utc>,
}

impl FinishedArtifact {
    pub(crate) fn new(
        payload: Vec<u8>,
        media_type: impl Into<String>,
        duration_seconds: u64,
        chunk_count: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: payload.into(),
            media_type: media_type.into(),
            duration_seconds,
            chunk_count,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Contiguous payload, chunks in arrival order
    pub fn bytes(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Media type tag of the payload (e.g. `audio/webm`)
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn duration_seconds(&self) -> u64 {
        self.duration_seconds
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Serializable description without the payload
    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            id: self.id,
            media_type: self.media_type.clone(),
            byte_length: self.payload.len(),
            duration_seconds: self.duration_seconds,
            chunk_count: self.chunk_count,
            created_at: self.created_at,
        }
    }
}

/// Artifact metadata exposed to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSummary {
    pub id: Uuid,
    pub media_type: String,
    pub byte_length: usize,
    pub duration_seconds: u64,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Externally observable recorder state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderSnapshot {
    pub status: CaptureStatus,

    /// True while a session is open (recording or paused)
    pub is_recording: bool,

    pub is_paused: bool,

    /// Elapsed seconds, excluding paused time
    pub duration: u64,

    pub max_duration: u64,

    /// User-facing message, set only when the session failed
    pub error: Option<String>,

    /// Latest finished recording
    pub audio_artifact: Option<ArtifactSummary>,
}

impl RecorderSnapshot {
    /// Snapshot of a freshly created recorder
    pub fn initial(max_duration: u64) -> Self {
        Self {
            status: CaptureStatus::Idle,
            is_recording: false,
            is_paused: false,
            duration: 0,
            max_duration,
            error: None,
            audio_artifact: None,
        }
    }

    /// `m:ss` rendering of the elapsed time
    pub fn elapsed_label(&self) -> String {
        format_clock(self.duration)
    }

    /// Progress toward the auto-stop ceiling, 0-100
    pub fn progress_percent(&self) -> f64 {
        if self.max_duration == 0 {
            return 0.0;
        }
        (self.duration as f64 / self.max_duration as f64 * 100.0).min(100.0)
    }

    /// Headline shown above the recorder controls
    pub fn headline(&self) -> String {
        if self.is_recording {
            format!(
                "Recording {} / {}",
                format_clock(self.duration),
                format_clock(self.max_duration)
            )
        } else if self.audio_artifact.is_some() {
            "Recording Complete".to_string()
        } else {
            "Ready to Record".to_string()
        }
    }
}

/// Format seconds as `m:ss`
pub fn format_clock(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
