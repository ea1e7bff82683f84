//! Error types and handling
//!
//! Application-level error wrapping the recorder, capture and upload errors.

use crate::capture::CaptureError;
use crate::recorder::RecorderError;
use crate::upload::UploadError;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Recording error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),
}

impl AppError {
    /// Stable code for machine-readable output
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Recorder(_) => "RECORDING_ERROR",
            AppError::Capture(CaptureError::PermissionDenied(_)) => "PERMISSION_DENIED",
            AppError::Capture(_) => "CAPTURE_ERROR",
            AppError::Upload(_) => "UPLOAD_ERROR",
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
