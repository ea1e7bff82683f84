use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reflect_recorder_lib::capture::{list_input_devices, MicrophoneSource};
use reflect_recorder_lib::recorder::{
    format_clock, AudioRecorder, CaptureStatus, FinishedArtifact, RecorderHandle,
    RecorderResult, RecorderService, RecorderSnapshot,
};
use reflect_recorder_lib::upload::{package_artifact, ReflectionClient};
use reflect_recorder_lib::{config, init_tracing, AppError};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{oneshot, watch};

/// Reflect Recorder - record a voice reflection from the microphone
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List audio input devices
    Devices,

    /// Record a reflection
    Record {
        /// JSON configuration file
        #[arg(short, long, env = "REFLECT_CONFIG")]
        config: Option<PathBuf>,

        /// Auto-stop after this many seconds (0 disables)
        #[arg(long)]
        max_duration: Option<u64>,

        /// Input device name
        #[arg(short, long)]
        device: Option<String>,

        /// Where to write the recording (defaults to recording.<ext>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Upload the recording as a new reflection
        #[arg(long)]
        upload: bool,

        /// Bearer token for the reflections API
        #[arg(long)]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let result = match cli.command {
        Commands::Devices => devices(),
        Commands::Record {
            config,
            max_duration,
            device,
            output,
            upload,
            token,
        } => record(config, max_duration, device, output, upload, token).await,
    };

    if let Err(e) = &result {
        if let Some(app_error) = e.downcast_ref::<AppError>() {
            tracing::error!("[{}] {:#}", app_error.code(), e);
        }
    }
    result
}

fn devices() -> Result<()> {
    let devices = list_input_devices().context("Failed to enumerate input devices")?;
    if devices.is_empty() {
        println!("No input devices found");
    }
    for device in devices {
        let marker = if device.is_default { "*" } else { " " };
        println!("{} {}", marker, device.name);
    }
    Ok(())
}

async fn record(
    config_path: Option<PathBuf>,
    max_duration: Option<u64>,
    device: Option<String>,
    output: Option<PathBuf>,
    upload: bool,
    token: Option<String>,
) -> Result<()> {
    let mut app_config =
        config::load(config_path.as_deref()).context("Failed to load configuration")?;
    if let Some(max) = max_duration {
        app_config.recorder.max_duration_seconds = max;
    }
    if device.is_some() {
        app_config.recorder.input_device = device;
    }
    if token.is_some() {
        app_config.api.token = token;
    }

    let source = Arc::new(MicrophoneSource::new(app_config.recorder.input_device.clone()));
    let (auto_stop_tx, mut auto_stop_rx) = oneshot::channel::<FinishedArtifact>();
    let mut auto_stop_tx = Some(auto_stop_tx);
    let recorder = AudioRecorder::new(source, app_config.recorder.clone()).on_recording_complete(
        move |artifact| {
            if let Some(tx) = auto_stop_tx.take() {
                let _ = tx.send(artifact);
            }
        },
    );
    let (handle, service) = RecorderService::spawn(recorder);

    if handle.start().await? == CaptureStatus::Failed {
        let message = handle.snapshot().error.unwrap_or_default();
        handle.shutdown().await;
        anyhow::bail!(message);
    }

    println!("Recording... [p] pause  [r] resume  [s] stop  [x] discard");
    let progress = tokio::spawn(print_progress(handle.watch()));

    let artifact = capture_until_done(&handle, &mut auto_stop_rx).await?;

    handle.shutdown().await;
    service.await.context("Recorder service panicked")?;
    progress.abort();

    let Some(artifact) = artifact else {
        println!("Recording discarded");
        return Ok(());
    };

    let part = package_artifact(&artifact)?;
    let path = output.unwrap_or_else(|| PathBuf::from(&part.file_name));
    tokio::fs::write(&path, &part.bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!(
        "Saved {} ({}, {} bytes)",
        path.display(),
        format_clock(artifact.duration_seconds()),
        part.bytes.len()
    );

    if upload {
        let client = ReflectionClient::new(&app_config.api)?;
        let reflection = client.create_reflection(&artifact).await?;
        println!("Created reflection {}", reflection.id);
    }

    Ok(())
}

/// Drive the recorder from stdin until it stops
async fn capture_until_done(
    handle: &RecorderHandle,
    auto_stop: &mut oneshot::Receiver<FinishedArtifact>,
) -> Result<Option<FinishedArtifact>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            biased;

            artifact = &mut *auto_stop => {
                println!();
                tracing::info!("Maximum duration reached");
                return Ok(artifact.ok());
            }
            _ = tokio::signal::ctrl_c() => {
                return stop(handle, auto_stop).await;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    // stdin closed
                    return stop(handle, auto_stop).await;
                };
                match line.trim() {
                    "p" => report(handle.pause().await),
                    "r" => report(handle.resume().await),
                    "s" => return stop(handle, auto_stop).await,
                    "x" => {
                        handle.reset().await?;
                        return Ok(None);
                    }
                    "" => {}
                    other => eprintln!("Unknown command '{}'", other),
                }
            }
        }
    }
}

/// Stop, falling back to an auto-stop that raced the request
async fn stop(
    handle: &RecorderHandle,
    auto_stop: &mut oneshot::Receiver<FinishedArtifact>,
) -> Result<Option<FinishedArtifact>> {
    let artifact = handle.stop().await?;
    Ok(artifact.or_else(|| auto_stop.try_recv().ok()))
}

fn report(result: RecorderResult<()>) {
    if let Err(e) = result {
        eprintln!("{}", e);
    }
}

async fn print_progress(mut snapshots: watch::Receiver<RecorderSnapshot>) {
    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();
        if snapshot.is_paused {
            eprintln!("\rPaused at {}", snapshot.elapsed_label());
        } else if snapshot.is_recording {
            eprint!(
                "\r{} ({:.0}%)",
                snapshot.headline(),
                snapshot.progress_percent()
            );
        }
    }
}
