//! Recorder service
//!
//! Runs an [`AudioRecorder`] on its own task. Commands arrive over a channel,
//! device acquisition happens off-loop so reset and stop stay responsive
//! while a permission prompt is open, and the elapsed-time ticker and data
//! flusher run only while recording.

use super::adapter::AudioRecorder;
use super::coordinator::{RecordingEvent, StartTicket};
use super::error::{RecorderError, RecorderResult};
use super::state::{CaptureStatus, FinishedArtifact, RecorderSnapshot};
use crate::capture::{CaptureError, DeviceStream};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Period of the elapsed-time ticker
const TICK_PERIOD: Duration = Duration::from_secs(1);

enum Command {
    Start(oneshot::Sender<RecorderResult<CaptureStatus>>),
    Pause(oneshot::Sender<RecorderResult<()>>),
    Resume(oneshot::Sender<RecorderResult<()>>),
    Stop(oneshot::Sender<RecorderResult<Option<FinishedArtifact>>>),
    Reset(oneshot::Sender<()>),
    Shutdown,
}

struct Acquired {
    ticket: StartTicket,
    result: Result<Box<dyn DeviceStream>, CaptureError>,
}

/// Cloneable handle to a running recorder service
#[derive(Clone)]
pub struct RecorderHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<RecorderSnapshot>,
    events: broadcast::Sender<RecordingEvent>,
}

impl RecorderHandle {
    /// Start recording; resolves once the device was granted or refused
    pub async fn start(&self) -> RecorderResult<CaptureStatus> {
        self.request(Command::Start).await?
    }

    pub async fn pause(&self) -> RecorderResult<()> {
        self.request(Command::Pause).await?
    }

    pub async fn resume(&self) -> RecorderResult<()> {
        self.request(Command::Resume).await?
    }

    pub async fn stop(&self) -> RecorderResult<Option<FinishedArtifact>> {
        self.request(Command::Stop).await?
    }

    pub async fn reset(&self) -> RecorderResult<()> {
        self.request(Command::Reset).await
    }

    /// Stop the service task, releasing any held device
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> RecorderSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every snapshot change
    pub fn watch(&self) -> watch::Receiver<RecorderSnapshot> {
        self.snapshots.clone()
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.events.subscribe()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> RecorderResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| RecorderError::ServiceClosed)?;
        reply_rx.await.map_err(|_| RecorderError::ServiceClosed)
    }
}

/// Event loop owning the recorder
pub struct RecorderService {
    recorder: AudioRecorder,
    commands: mpsc::Receiver<Command>,
    acquired_tx: mpsc::UnboundedSender<Acquired>,
    acquired_rx: mpsc::UnboundedReceiver<Acquired>,
    pending_start: Option<(StartTicket, oneshot::Sender<RecorderResult<CaptureStatus>>)>,
    ticker: Option<Interval>,
    flusher: Option<Interval>,
    snapshots: watch::Sender<RecorderSnapshot>,
}

impl RecorderService {
    /// Spawn the service on the current runtime
    pub fn spawn(recorder: AudioRecorder) -> (RecorderHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (snapshot_tx, snapshot_rx) = watch::channel(recorder.snapshot());
        let (acquired_tx, acquired_rx) = mpsc::unbounded_channel();
        let events = recorder.event_sender();

        let service = Self {
            recorder,
            commands: command_rx,
            acquired_tx,
            acquired_rx,
            pending_start: None,
            ticker: None,
            flusher: None,
            snapshots: snapshot_tx,
        };
        let task = tokio::spawn(service.run());

        let handle = RecorderHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            events,
        };
        (handle, task)
    }

    async fn run(mut self) {
        tracing::info!("Recorder service started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(acquired) = self.acquired_rx.recv() => self.handle_acquired(acquired),
                _ = next_tick(&mut self.ticker) => {
                    if let Err(e) = self.recorder.tick() {
                        tracing::warn!("Tick failed: {}", e);
                    }
                }
                _ = next_tick(&mut self.flusher) => {
                    if let Err(e) = self.recorder.flush() {
                        tracing::warn!("Flush failed: {}", e);
                    }
                }
            }
            self.sync();
        }

        if let Some((_, reply)) = self.pending_start.take() {
            let _ = reply.send(Err(RecorderError::ServiceClosed));
        }
        self.recorder.reset();
        tracing::info!("Recorder service stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => match self.recorder.begin_start() {
                Ok(ticket) => {
                    let source = self.recorder.source();
                    let acquired_tx = self.acquired_tx.clone();
                    tokio::spawn(async move {
                        let result = source.acquire().await;
                        // a closed service drops the stream, releasing it
                        let _ = acquired_tx.send(Acquired { ticket, result });
                    });
                    self.pending_start = Some((ticket, reply));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Pause(reply) => {
                let _ = reply.send(self.recorder.pause());
            }
            Command::Resume(reply) => {
                let _ = reply.send(self.recorder.resume());
            }
            Command::Stop(reply) => {
                let _ = reply.send(self.recorder.stop());
            }
            Command::Reset(reply) => {
                if let Some((_, pending)) = self.pending_start.take() {
                    let _ = pending.send(Err(RecorderError::Superseded));
                }
                self.recorder.reset();
                let _ = reply.send(());
            }
            Command::Shutdown => {}
        }
    }

    fn handle_acquired(&mut self, acquired: Acquired) {
        let result = self
            .recorder
            .complete_start(acquired.ticket, acquired.result);

        match self.pending_start.take() {
            Some((ticket, reply)) if ticket == acquired.ticket => {
                let _ = reply.send(result);
            }
            other => {
                self.pending_start = other;
                tracing::debug!("Late acquisition for {:?}: {:?}", acquired.ticket, result);
            }
        }
    }

    /// Publish the snapshot and align the timers with the status
    fn sync(&mut self) {
        let recording = self.recorder.status() == CaptureStatus::Recording;

        if recording && self.ticker.is_none() {
            self.ticker = Some(periodic(TICK_PERIOD));
        } else if !recording {
            self.ticker = None;
        }

        let flush_ms = self.recorder.config().flush_interval_ms;
        if recording && flush_ms > 0 && self.flusher.is_none() {
            self.flusher = Some(periodic(Duration::from_millis(flush_ms)));
        } else if !recording {
            self.flusher = None;
        }

        let snapshot = self.recorder.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

fn periodic(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ScriptedSource, MICROPHONE_ACCESS_MESSAGE};
    use crate::recorder::state::RecorderConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::sleep;

    fn spawn_with(source: Arc<ScriptedSource>, config: RecorderConfig) -> RecorderHandle {
        let (handle, _task) = RecorderService::spawn(AudioRecorder::new(source, config));
        handle
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_pause_and_resume() {
        let source = Arc::new(ScriptedSource::new());
        let handle = spawn_with(source.clone(), RecorderConfig::default());

        assert_eq!(handle.start().await, Ok(CaptureStatus::Recording));
        sleep(Duration::from_millis(3_500)).await;
        assert_eq!(handle.snapshot().duration, 3);

        handle.pause().await.unwrap();
        sleep(Duration::from_secs(5)).await;
        let snapshot = handle.snapshot();
        assert!(snapshot.is_paused);
        assert_eq!(snapshot.duration, 3);

        handle.resume().await.unwrap();
        sleep(Duration::from_millis(1_500)).await;
        assert_eq!(handle.snapshot().duration, 4);

        let artifact = handle.stop().await.unwrap().expect("artifact");
        assert_eq!(artifact.duration_seconds(), 4);
        assert_eq!(source.stats().active_tracks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_collects_chunks() {
        let source = Arc::new(ScriptedSource::new());
        let handle = spawn_with(source.clone(), RecorderConfig::default());

        handle.start().await.unwrap();
        source.feed(&[1, 2]);
        sleep(Duration::from_millis(1_500)).await;
        source.feed(&[3]);
        sleep(Duration::from_millis(1_000)).await;
        source.feed(&[4]);

        let artifact = handle.stop().await.unwrap().expect("artifact");
        assert_eq!(artifact.bytes(), &[1, 2, 3, 4]);
        assert_eq!(artifact.chunk_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_stop_notifies_once() {
        let source = Arc::new(ScriptedSource::new());
        let completions = Arc::new(AtomicUsize::new(0));
        let counter = completions.clone();
        let recorder = AudioRecorder::new(source.clone(), RecorderConfig::default().with_max_duration(5))
            .on_recording_complete(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        let (handle, _task) = RecorderService::spawn(recorder);
        let mut events = handle.subscribe();

        handle.start().await.unwrap();
        sleep(Duration::from_secs(8)).await;

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.status, CaptureStatus::Stopped);
        assert_eq!(snapshot.duration, 5);
        assert!(snapshot.audio_artifact.is_some());
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(source.stats().active_tracks(), 0);

        let mut stopped = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, RecordingEvent::Stopped { .. }) {
                stopped += 1;
            }
        }
        assert_eq!(stopped, 1);

        // stopping again is a no-op
        assert_eq!(handle.stop().await, Ok(None));
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_during_acquisition_releases_device() {
        let source = Arc::new(ScriptedSource::new().with_acquire_delay(Duration::from_secs(2)));
        let stats = source.stats();
        let handle = spawn_with(source, RecorderConfig::default());

        let starter = handle.clone();
        let pending = tokio::spawn(async move { starter.start().await });
        sleep(Duration::from_millis(100)).await;

        handle.reset().await.unwrap();
        assert_eq!(pending.await.unwrap(), Err(RecorderError::Superseded));

        sleep(Duration::from_secs(3)).await;
        assert_eq!(stats.acquired(), 1);
        assert_eq!(stats.released(), 1);
        assert_eq!(stats.active_tracks(), 0);
        assert_eq!(handle.snapshot().status, CaptureStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_start_rejected() {
        let source = Arc::new(ScriptedSource::new().with_acquire_delay(Duration::from_secs(1)));
        let stats = source.stats();
        let handle = spawn_with(source, RecorderConfig::default());

        let starter = handle.clone();
        let first = tokio::spawn(async move { starter.start().await });
        sleep(Duration::from_millis(10)).await;

        assert_eq!(handle.start().await, Err(RecorderError::StartPending));
        assert_eq!(first.await.unwrap(), Ok(CaptureStatus::Recording));
        assert_eq!(stats.acquired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_start_publishes_error() {
        let source = Arc::new(ScriptedSource::new());
        source.fail_with(CaptureError::PermissionDenied("NotAllowedError".into()));
        let handle = spawn_with(source, RecorderConfig::default());

        assert_eq!(handle.start().await, Ok(CaptureStatus::Failed));
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.error.as_deref(), Some(MICROPHONE_ACCESS_MESSAGE));
        assert!(!snapshot.is_recording);
        assert!(handle.pause().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_device() {
        let source = Arc::new(ScriptedSource::new());
        let stats = source.stats();
        let (handle, task) =
            RecorderService::spawn(AudioRecorder::new(source, RecorderConfig::default()));

        handle.start().await.unwrap();
        handle.shutdown().await;
        task.await.unwrap();

        assert_eq!(stats.active_tracks(), 0);
        assert_eq!(handle.start().await, Err(RecorderError::ServiceClosed));
    }
}
