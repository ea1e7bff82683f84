//! In-memory capture source
//!
//! A deterministic stand-in for the microphone. Bytes fed to the source are
//! captured only while the acquired stream is started and not paused, and a
//! shared [`SourceStats`] records every acquisition and release.

use super::traits::{AudioSource, CaptureError, DeviceStream};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Observable device bookkeeping
#[derive(Debug, Default)]
pub struct SourceStats {
    acquired: AtomicUsize,
    released: AtomicUsize,
    active_tracks: AtomicUsize,
    capturing: AtomicBool,
    pending: Mutex<Vec<u8>>,
}

impl SourceStats {
    /// Successful acquisitions so far
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Streams released so far
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Tracks currently held
    pub fn active_tracks(&self) -> usize {
        self.active_tracks.load(Ordering::SeqCst)
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }
}

/// Scripted audio source
pub struct ScriptedSource {
    id: String,
    media_type: String,
    stats: Arc<SourceStats>,
    failure: Mutex<Option<CaptureError>>,
    acquire_delay: Option<Duration>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            id: "scripted".to_string(),
            media_type: "audio/webm".to_string(),
            stats: Arc::new(SourceStats::default()),
            failure: Mutex::new(None),
            acquire_delay: None,
        }
    }

    /// Tag produced data with another media type
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = media_type.into();
        self
    }

    /// Delay every acquisition, simulating a permission prompt
    pub fn with_acquire_delay(mut self, delay: Duration) -> Self {
        self.acquire_delay = Some(delay);
        self
    }

    /// Make subsequent acquisitions fail
    pub fn fail_with(&self, error: CaptureError) {
        *self.failure.lock() = Some(error);
    }

    /// Let subsequent acquisitions succeed
    pub fn succeed(&self) {
        *self.failure.lock() = None;
    }

    pub fn stats(&self) -> Arc<SourceStats> {
        self.stats.clone()
    }

    /// Offer captured bytes; ignored unless a stream is capturing
    pub fn feed(&self, data: &[u8]) {
        if self.stats.is_capturing() {
            self.stats.pending.lock().extend_from_slice(data);
        }
    }
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSource for ScriptedSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn acquire(&self) -> Result<Box<dyn DeviceStream>, CaptureError> {
        if let Some(delay) = self.acquire_delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.failure.lock().clone();
        if let Some(error) = failure {
            return Err(error);
        }

        self.stats.acquired.fetch_add(1, Ordering::SeqCst);
        self.stats.active_tracks.fetch_add(1, Ordering::SeqCst);
        self.stats.pending.lock().clear();

        Ok(Box::new(ScriptedStream {
            label: format!("{} input", self.id),
            media_type: self.media_type.clone(),
            stats: self.stats.clone(),
            released: false,
        }))
    }
}

struct ScriptedStream {
    label: String,
    media_type: String,
    stats: Arc<SourceStats>,
    released: bool,
}

impl DeviceStream for ScriptedStream {
    fn label(&self) -> &str {
        &self.label
    }

    fn media_type(&self) -> String {
        self.media_type.clone()
    }

    fn active_tracks(&self) -> usize {
        if self.released {
            0
        } else {
            1
        }
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        if self.released {
            return Err(CaptureError::Stream("stream already released".into()));
        }
        self.stats.capturing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), CaptureError> {
        self.stats.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), CaptureError> {
        self.start()
    }

    fn take_data(&mut self) -> Vec<u8> {
        std::mem::take(&mut *self.stats.pending.lock())
    }

    fn stop_all_tracks(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.stats.capturing.store(false, Ordering::SeqCst);
        self.stats.active_tracks.fetch_sub(1, Ordering::SeqCst);
        self.stats.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.stop_all_tracks();
    }
}
