//! Capture session controller
//!
//! Owns the device stream, chunk accumulator and elapsed-time clock of the
//! live session, and applies the status transitions:
//!
//! ```text
//! Idle ──start──▶ Recording ⇄ Paused ──stop──▶ Stopped
//!   any ──acquisition error──▶ Failed        any ──reset──▶ Idle
//! ```
//!
//! The device stream is held exactly while the status is `Recording` or
//! `Paused`, and every exit path releases it once.

use super::accumulator::ChunkAccumulator;
use super::clock::{Clock, ElapsedClock, MonotonicClock};
use super::error::{RecorderError, RecorderResult};
use super::state::{CaptureStatus, FinishedArtifact};
use crate::capture::{AudioSource, CaptureError, DeviceStream};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Media type used when a session closes without a stream tag
const FALLBACK_MEDIA_TYPE: &str = "audio/webm";

/// Events emitted during recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingEvent {
    /// Recording started
    Started { session_id: Uuid },
    /// Recording paused
    Paused,
    /// Recording resumed
    Resumed,
    /// Recording stopped and finalized
    Stopped { artifact_id: Uuid, byte_length: usize },
    /// Session discarded
    Reset,
    /// Device acquisition failed
    Error(String),
    /// Elapsed seconds update
    Progress(u64),
}

/// A start request waiting for device acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartTicket(u64);

/// Reserved start slot. Dropping it without `complete` (for instance when
/// the `start` future is cancelled mid-acquisition) frees the slot again.
#[must_use = "an unfinished start is abandoned when dropped"]
pub struct PendingStart<'a> {
    controller: &'a mut CaptureController,
    ticket: StartTicket,
}

impl PendingStart<'_> {
    pub fn ticket(&self) -> StartTicket {
        self.ticket
    }

    /// Adopt the acquisition result
    pub fn complete(
        mut self,
        acquired: Result<Box<dyn DeviceStream>, CaptureError>,
    ) -> RecorderResult<CaptureStatus> {
        let ticket = self.ticket;
        self.controller.complete_start(ticket, acquired)
    }
}

impl Drop for PendingStart<'_> {
    fn drop(&mut self) {
        if self.controller.pending_start == Some(self.ticket) {
            tracing::warn!("Start {:?} cancelled before the device arrived", self.ticket);
            self.controller.pending_start = None;
        }
    }
}

#[derive(Debug, Clone)]
struct SessionInfo {
    id: Uuid,
    started_at_epoch_ms: i64,
    media_type: String,
}

/// State machine for one recorder instance
pub struct CaptureController {
    status: CaptureStatus,

    /// Held only while recording or paused
    stream: Option<Box<dyn DeviceStream>>,

    accumulator: ChunkAccumulator,

    clock: ElapsedClock,

    /// Wall-clock source
    time: Arc<dyn Clock>,

    session: Option<SessionInfo>,

    last_error: Option<String>,

    pending_start: Option<StartTicket>,

    next_ticket: u64,

    /// Event broadcaster
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl CaptureController {
    /// Create a controller on the monotonic wall clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(time: Arc<dyn Clock>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            status: CaptureStatus::Idle,
            stream: None,
            accumulator: ChunkAccumulator::new(),
            clock: ElapsedClock::new(),
            time,
            session: None,
            last_error: None,
            pending_start: None,
            next_ticket: 0,
            event_tx,
        }
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<RecordingEvent> {
        self.event_tx.clone()
    }

    pub fn status(&self) -> CaptureStatus {
        self.status
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.clock.elapsed_seconds()
    }

    /// User-facing message of the last failure
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn holds_device(&self) -> bool {
        self.stream.is_some()
    }

    pub fn active_tracks(&self) -> usize {
        self.stream.as_ref().map(|s| s.active_tracks()).unwrap_or(0)
    }

    pub fn chunk_count(&self) -> usize {
        self.accumulator.chunk_count()
    }

    pub fn is_start_pending(&self) -> bool {
        self.pending_start.is_some()
    }

    pub fn is_clock_running(&self) -> bool {
        self.clock.is_running()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn started_at_epoch_ms(&self) -> Option<i64> {
        self.session.as_ref().map(|s| s.started_at_epoch_ms)
    }

    /// Acquire a device from `source` and open a session.
    ///
    /// Device failures do not surface as errors: they move the session to
    /// `Failed` and the returned status says so.
    pub async fn start(&mut self, source: &dyn AudioSource) -> RecorderResult<CaptureStatus> {
        let pending = self.reserve_start()?;
        let acquired = source.acquire().await;
        pending.complete(acquired)
    }

    /// Reserve the acquisition slot, scoped to the returned guard
    pub fn reserve_start(&mut self) -> RecorderResult<PendingStart<'_>> {
        let ticket = self.begin_start()?;
        Ok(PendingStart {
            controller: self,
            ticket,
        })
    }

    /// First half of `start`: reserve the single acquisition slot
    pub fn begin_start(&mut self) -> RecorderResult<StartTicket> {
        if self.pending_start.is_some() {
            tracing::warn!("Start ignored: device request already pending");
            return Err(RecorderError::StartPending);
        }
        if self.status.is_active() {
            return Err(RecorderError::invalid("start", self.status));
        }

        self.next_ticket += 1;
        let ticket = StartTicket(self.next_ticket);
        self.pending_start = Some(ticket);

        tracing::info!("Requesting capture device");
        Ok(ticket)
    }

    /// Second half of `start`: adopt (or discard) the acquisition result
    pub fn complete_start(
        &mut self,
        ticket: StartTicket,
        acquired: Result<Box<dyn DeviceStream>, CaptureError>,
    ) -> RecorderResult<CaptureStatus> {
        if self.pending_start != Some(ticket) {
            if let Ok(mut stream) = acquired {
                tracing::warn!(
                    "Releasing device acquired for a superseded start: {}",
                    stream.label()
                );
                stream.stop_all_tracks();
            }
            return Err(RecorderError::Superseded);
        }
        self.pending_start = None;

        let mut stream = match acquired {
            Ok(stream) => stream,
            Err(e) => {
                self.enter_failed(&e);
                return Ok(self.status);
            }
        };

        if let Err(e) = stream.start() {
            stream.stop_all_tracks();
            self.enter_failed(&e);
            return Ok(self.status);
        }

        let now = self.time.now_ms();
        let session = SessionInfo {
            id: Uuid::new_v4(),
            started_at_epoch_ms: now,
            media_type: stream.media_type(),
        };

        tracing::info!(
            "Recording started on {} (session {})",
            stream.label(),
            session.id
        );

        self.accumulator.open();
        self.clock.start(now);
        self.last_error = None;
        self.stream = Some(stream);
        let _ = self.event_tx.send(RecordingEvent::Started {
            session_id: session.id,
        });
        self.session = Some(session);
        self.status = CaptureStatus::Recording;

        Ok(self.status)
    }

    /// Pause recording
    pub fn pause(&mut self) -> RecorderResult<()> {
        if self.status != CaptureStatus::Recording {
            return Err(RecorderError::invalid("pause", self.status));
        }

        tracing::info!("Pausing recording at {}s", self.clock.elapsed_seconds());

        if let Some(stream) = self.stream.as_mut() {
            if let Err(e) = stream.pause() {
                tracing::warn!("Device did not pause cleanly: {}", e);
            }
        }
        self.clock.pause(self.time.now_ms());
        self.status = CaptureStatus::Paused;
        let _ = self.event_tx.send(RecordingEvent::Paused);

        Ok(())
    }

    /// Resume recording
    pub fn resume(&mut self) -> RecorderResult<()> {
        if self.status != CaptureStatus::Paused {
            return Err(RecorderError::invalid("resume", self.status));
        }

        tracing::info!("Resuming recording at {}s", self.clock.elapsed_seconds());

        if let Some(stream) = self.stream.as_mut() {
            if let Err(e) = stream.resume() {
                tracing::warn!("Device did not resume cleanly: {}", e);
            }
        }
        self.clock.resume(self.time.now_ms());
        self.status = CaptureStatus::Recording;
        let _ = self.event_tx.send(RecordingEvent::Resumed);

        Ok(())
    }

    /// Stop recording and finalize the artifact.
    ///
    /// Returns `None` when no session is open.
    pub fn stop(&mut self) -> RecorderResult<Option<FinishedArtifact>> {
        if !self.status.is_active() {
            tracing::debug!("Stop ignored while {}", self.status);
            return Ok(None);
        }

        tracing::info!("Stopping recording");

        // Last delivery before the accumulator is sealed
        if let Some(stream) = self.stream.as_mut() {
            let tail = stream.take_data();
            self.accumulator.push(tail)?;
        }

        let media_type = self
            .session
            .as_ref()
            .map(|s| s.media_type.clone())
            .unwrap_or_else(|| FALLBACK_MEDIA_TYPE.to_string());
        let artifact = self
            .accumulator
            .finalize(&media_type, self.clock.elapsed_seconds())?;

        self.release_stream();
        self.clock.stop();
        self.status = CaptureStatus::Stopped;

        let _ = self.event_tx.send(RecordingEvent::Stopped {
            artifact_id: artifact.id(),
            byte_length: artifact.len(),
        });

        tracing::info!(
            "Recording stopped. Duration: {}s, {} bytes in {} chunks",
            artifact.duration_seconds(),
            artifact.len(),
            artifact.chunk_count()
        );
        Ok(Some(artifact))
    }

    /// Discard everything and return to `Idle`. Safe from any state,
    /// including while a start is waiting for the device.
    pub fn reset(&mut self) {
        if let Some(ticket) = self.pending_start.take() {
            tracing::info!("Abandoning pending start {:?}", ticket);
        }

        self.release_stream();
        self.accumulator.clear();
        self.clock.reset();
        self.session = None;
        self.last_error = None;
        self.status = CaptureStatus::Idle;
        let _ = self.event_tx.send(RecordingEvent::Reset);

        tracing::info!("Recorder reset");
    }

    /// Drain captured data into the accumulator. Delivery is suspended while
    /// paused; returns the number of bytes appended.
    pub fn flush(&mut self) -> RecorderResult<usize> {
        match self.status {
            CaptureStatus::Recording => {}
            CaptureStatus::Paused => return Ok(0),
            _ => return Err(RecorderError::ChunkRejected),
        }

        let data = match self.stream.as_mut() {
            Some(stream) => stream.take_data(),
            None => return Ok(0),
        };
        let len = data.len();
        if self.accumulator.push(data)? {
            tracing::debug!(
                "Flushed {} bytes (chunk {})",
                len,
                self.accumulator.chunk_count()
            );
            Ok(len)
        } else {
            Ok(0)
        }
    }

    /// Append a fragment pushed by the capture mechanism
    pub fn deliver_chunk(&mut self, chunk: Vec<u8>) -> RecorderResult<bool> {
        if !self.status.is_active() {
            return Err(RecorderError::ChunkRejected);
        }
        self.accumulator.push(chunk)
    }

    /// Recompute the elapsed time on a clock period
    pub fn tick(&mut self) -> Option<u64> {
        if self.status != CaptureStatus::Recording {
            return None;
        }
        let elapsed = self.clock.tick(self.time.now_ms())?;
        let _ = self.event_tx.send(RecordingEvent::Progress(elapsed));
        Some(elapsed)
    }

    fn enter_failed(&mut self, error: &CaptureError) {
        tracing::error!("Error accessing microphone: {}", error);

        self.release_stream();
        self.accumulator.clear();
        self.clock.reset();
        self.session = None;

        let message = error.user_message();
        self.last_error = Some(message.clone());
        self.status = CaptureStatus::Failed;
        let _ = self.event_tx.send(RecordingEvent::Error(message));
    }

    fn release_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop_all_tracks();
            tracing::debug!("Released device {}", stream.label());
        }
    }
}

impl Default for CaptureController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.release_stream();
    }
}
