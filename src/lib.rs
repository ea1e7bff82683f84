//! Reflect Recorder - voice reflection capture.
//!
//! This is the main library crate for the recorder. It provides the capture
//! session state machine, the microphone source, and the upload hand-off.

pub mod capture;
pub mod config;
pub mod recorder;
pub mod upload;
pub mod utils;

pub use recorder::{
    AudioRecorder, CaptureStatus, FinishedArtifact, RecorderConfig, RecorderHandle,
    RecorderService, RecorderSnapshot,
};
pub use utils::error::{AppError, AppResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reflect_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Reflect Recorder v{}", env!("CARGO_PKG_VERSION"));
}
