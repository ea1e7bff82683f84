//! Recorder presentation adapter
//!
//! Wraps a [`CaptureController`] with the behaviour the recording screen
//! needs: a configured device source, auto-stop at the duration ceiling, the
//! latest finished artifact, and the completion callback.

use super::clock::Clock;
use super::coordinator::{CaptureController, RecordingEvent, StartTicket};
use super::error::RecorderResult;
use super::state::{CaptureStatus, FinishedArtifact, RecorderConfig, RecorderSnapshot};
use crate::capture::{AudioSource, CaptureError, DeviceStream};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Invoked once with every finalized recording
pub type CompletionCallback = Box<dyn FnMut(FinishedArtifact) + Send>;

/// Audio recorder bound to one capture source
pub struct AudioRecorder {
    controller: CaptureController,
    source: Arc<dyn AudioSource>,
    config: RecorderConfig,

    /// Latest finished recording, kept until the next start or reset
    artifact: Option<FinishedArtifact>,

    on_complete: Option<CompletionCallback>,
}

impl AudioRecorder {
    pub fn new(source: Arc<dyn AudioSource>, config: RecorderConfig) -> Self {
        Self::from_controller(CaptureController::new(), source, config)
    }

    /// Create a recorder reading time from `clock`
    pub fn with_clock(
        source: Arc<dyn AudioSource>,
        config: RecorderConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::from_controller(CaptureController::with_clock(clock), source, config)
    }

    fn from_controller(
        controller: CaptureController,
        source: Arc<dyn AudioSource>,
        config: RecorderConfig,
    ) -> Self {
        tracing::debug!(
            "Recorder created on {} (max {}s)",
            source.id(),
            config.max_duration_seconds
        );
        Self {
            controller,
            source,
            config,
            artifact: None,
            on_complete: None,
        }
    }

    /// Register the completion callback
    pub fn on_recording_complete<F>(mut self, callback: F) -> Self
    where
        F: FnMut(FinishedArtifact) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub fn source(&self) -> Arc<dyn AudioSource> {
        self.source.clone()
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn controller(&self) -> &CaptureController {
        &self.controller
    }

    pub fn status(&self) -> CaptureStatus {
        self.controller.status()
    }

    /// Latest finished recording
    pub fn artifact(&self) -> Option<&FinishedArtifact> {
        self.artifact.as_ref()
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.controller.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<RecordingEvent> {
        self.controller.event_sender()
    }

    /// Current observable state
    pub fn snapshot(&self) -> RecorderSnapshot {
        let status = self.controller.status();
        RecorderSnapshot {
            status,
            is_recording: status.is_active(),
            is_paused: status == CaptureStatus::Paused,
            duration: self.controller.elapsed_seconds(),
            max_duration: self.config.max_duration_seconds,
            error: self.controller.last_error().map(str::to_string),
            audio_artifact: self.artifact.as_ref().map(FinishedArtifact::summary),
        }
    }

    /// Acquire the device and start recording
    pub async fn start(&mut self) -> RecorderResult<CaptureStatus> {
        let source = self.source.clone();
        let pending = self.controller.reserve_start()?;
        self.artifact = None;
        let acquired = source.acquire().await;
        pending.complete(acquired)
    }

    /// Reserve a start; the previous artifact is discarded once accepted
    pub fn begin_start(&mut self) -> RecorderResult<StartTicket> {
        let ticket = self.controller.begin_start()?;
        self.artifact = None;
        Ok(ticket)
    }

    pub fn complete_start(
        &mut self,
        ticket: StartTicket,
        acquired: Result<Box<dyn DeviceStream>, CaptureError>,
    ) -> RecorderResult<CaptureStatus> {
        self.controller.complete_start(ticket, acquired)
    }

    pub fn pause(&mut self) -> RecorderResult<()> {
        self.controller.pause()
    }

    pub fn resume(&mut self) -> RecorderResult<()> {
        self.controller.resume()?;
        self.enforce_max_duration()?;
        Ok(())
    }

    /// Stop and hand the artifact to the completion callback
    pub fn stop(&mut self) -> RecorderResult<Option<FinishedArtifact>> {
        let Some(artifact) = self.controller.stop()? else {
            return Ok(None);
        };

        self.artifact = Some(artifact.clone());
        if let Some(callback) = self.on_complete.as_mut() {
            callback(artifact.clone());
        }
        Ok(Some(artifact))
    }

    /// Discard the session and any finished recording
    pub fn reset(&mut self) {
        self.controller.reset();
        self.artifact = None;
    }

    pub fn flush(&mut self) -> RecorderResult<usize> {
        self.controller.flush()
    }

    pub fn deliver_chunk(&mut self, chunk: Vec<u8>) -> RecorderResult<bool> {
        self.controller.deliver_chunk(chunk)
    }

    /// Advance the elapsed clock, stopping at the ceiling
    pub fn tick(&mut self) -> RecorderResult<Option<u64>> {
        let elapsed = self.controller.tick();
        self.enforce_max_duration()?;
        Ok(elapsed)
    }

    fn enforce_max_duration(&mut self) -> RecorderResult<()> {
        let max = self.config.max_duration_seconds;
        if max == 0 || self.controller.status() != CaptureStatus::Recording {
            return Ok(());
        }
        if self.controller.elapsed_seconds() >= max {
            tracing::info!("Maximum duration of {}s reached, stopping", max);
            self.stop()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ScriptedSource;
    use crate::recorder::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn recorder(max: u64) -> (AudioRecorder, Arc<ScriptedSource>, ManualClock) {
        let source = Arc::new(ScriptedSource::new());
        let clock = ManualClock::new(0);
        let recorder = AudioRecorder::with_clock(
            source.clone(),
            RecorderConfig::default().with_max_duration(max),
            Arc::new(clock.clone()),
        );
        (recorder, source, clock)
    }

    fn run_seconds(recorder: &mut AudioRecorder, clock: &ManualClock, seconds: u64) {
        for _ in 0..seconds {
            clock.advance(Duration::from_secs(1));
            recorder.tick().unwrap();
        }
    }

    #[tokio::test]
    async fn test_auto_stop_at_ceiling() {
        let (recorder, source, clock) = recorder(5);
        let completions = Arc::new(AtomicUsize::new(0));
        let counter = completions.clone();
        let mut recorder = recorder.on_recording_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        recorder.start().await.unwrap();
        source.feed(&[1, 2, 3]);
        run_seconds(&mut recorder, &clock, 7);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.status, CaptureStatus::Stopped);
        assert_eq!(snapshot.duration, 5);
        assert!(!snapshot.is_recording);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.artifact().map(|a| a.len()), Some(3));
        assert_eq!(source.stats().active_tracks(), 0);
    }

    #[tokio::test]
    async fn test_zero_ceiling_never_stops() {
        let (mut recorder, _source, clock) = recorder(0);
        recorder.start().await.unwrap();
        run_seconds(&mut recorder, &clock, 600);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.status, CaptureStatus::Recording);
        assert_eq!(snapshot.duration, 600);
    }

    #[tokio::test]
    async fn test_callback_receives_held_artifact() {
        let (recorder, source, clock) = recorder(300);
        let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = received.clone();
        let mut recorder = recorder.on_recording_complete(move |artifact| sink.lock().push(artifact));

        recorder.start().await.unwrap();
        source.feed(b"voice");
        run_seconds(&mut recorder, &clock, 2);
        let artifact = recorder.stop().unwrap().expect("artifact");

        // second stop neither finalizes nor calls back
        assert!(recorder.stop().unwrap().is_none());

        let received = received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], artifact);
        assert_eq!(recorder.artifact(), Some(&artifact));
        assert_eq!(recorder.snapshot().headline(), "Recording Complete");
    }

    #[tokio::test]
    async fn test_new_start_clears_artifact() {
        let (mut recorder, _source, _clock) = recorder(300);
        recorder.start().await.unwrap();
        recorder.deliver_chunk(vec![1]).unwrap();
        recorder.stop().unwrap();
        assert!(recorder.artifact().is_some());

        recorder.start().await.unwrap();
        assert!(recorder.artifact().is_none());
        assert!(recorder.snapshot().audio_artifact.is_none());
    }

    #[tokio::test]
    async fn test_reset_clears_artifact() {
        let (mut recorder, _source, _clock) = recorder(300);
        recorder.start().await.unwrap();
        recorder.stop().unwrap();

        recorder.reset();
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot, RecorderSnapshot::initial(300));
        assert_eq!(snapshot.headline(), "Ready to Record");
    }

    #[tokio::test]
    async fn test_snapshot_while_paused() {
        let (mut recorder, _source, clock) = recorder(300);
        recorder.start().await.unwrap();
        run_seconds(&mut recorder, &clock, 65);
        recorder.pause().unwrap();
        run_seconds(&mut recorder, &clock, 10);

        let snapshot = recorder.snapshot();
        assert!(snapshot.is_recording);
        assert!(snapshot.is_paused);
        assert_eq!(snapshot.elapsed_label(), "1:05");
        assert_eq!(snapshot.headline(), "Recording 1:05 / 5:00");
    }

    #[tokio::test]
    async fn test_failed_start_reports_message() {
        let (mut recorder, source, _clock) = recorder(300);
        source.fail_with(CaptureError::PermissionDenied("blocked".into()));

        assert_eq!(recorder.start().await, Ok(CaptureStatus::Failed));
        let snapshot = recorder.snapshot();
        assert_eq!(
            snapshot.error.as_deref(),
            Some(crate::capture::MICROPHONE_ACCESS_MESSAGE)
        );
        assert!(!snapshot.is_recording);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_start_can_be_retried() {
        let source = Arc::new(ScriptedSource::new().with_acquire_delay(Duration::from_secs(5)));
        let stats = source.stats();
        let mut recorder = AudioRecorder::with_clock(
            source.clone(),
            RecorderConfig::default(),
            Arc::new(ManualClock::new(0)),
        );

        let cancelled = tokio::time::timeout(Duration::from_secs(1), recorder.start()).await;
        assert!(cancelled.is_err());
        assert_eq!(recorder.snapshot().status, CaptureStatus::Idle);

        assert_eq!(recorder.start().await, Ok(CaptureStatus::Recording));
        assert_eq!(stats.acquired(), 1);
        assert_eq!(stats.active_tracks(), 1);
    }
}
