//! Recorder errors
//!
//! Guarded preconditions of the capture state machine. None of these leave
//! the session in a corrupted state; they report why a command was a no-op.

use super::state::CaptureStatus;
use thiserror::Error;

/// Errors returned by recorder commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecorderError {
    #[error("Cannot {operation} while {status}")]
    InvalidTransition {
        operation: &'static str,
        status: CaptureStatus,
    },

    #[error("A start request is already waiting for the device")]
    StartPending,

    #[error("Start request was superseded by a reset")]
    Superseded,

    #[error("Session has already been finalized")]
    FinalizeConflict,

    #[error("Chunk rejected: no open session")]
    ChunkRejected,

    #[error("Recorder service is not running")]
    ServiceClosed,
}

impl RecorderError {
    pub(crate) fn invalid(operation: &'static str, status: CaptureStatus) -> Self {
        Self::InvalidTransition { operation, status }
    }
}

/// Result type alias for recorder commands
pub type RecorderResult<T> = Result<T, RecorderError>;
