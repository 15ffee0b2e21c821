//! Interactive recording session.

use std::path::PathBuf;
use std::time::Duration;

use segcap_capture_engine::backend::{get_backend, CaptureBackend, SyntheticBackend};
use segcap_capture_engine::controller::spawn;
use segcap_capture_engine::{
    RecordingSession, SegmentId, SessionConfig, SessionEvent, SessionHandle,
};
use segcap_common::config::AppConfig;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
Commands:
  start            start recording the current stream
  pause            pause recording
  resume           resume recording
  stop             stop recording and finalize the segment
  screen           share the screen (returns to the camera when sharing ends)
  camera           switch to the camera
  res <label>      change resolution (recording is not restarted)
  list             list recorded segments
  download <n>     write segment n to the downloads directory
  status           show the current state
  end              simulate the user ending a screen share (--synthetic)
  help             show this help
  quit             stop and exit";

pub async fn run(
    config: AppConfig,
    synthetic: bool,
    resolution: Option<String>,
    output: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let mut session_config = SessionConfig::from_defaults(&config.recording)?;
    if let Some(label) = resolution.as_deref() {
        session_config.resolution = session_config.resolution(label)?;
    }
    let downloads = output.unwrap_or_else(|| config.downloads_dir.clone());

    let synthetic_backend = synthetic
        .then(|| SyntheticBackend::new().with_auto_chunks(Duration::from_millis(250), 4096));
    let backend: Box<dyn CaptureBackend> = match &synthetic_backend {
        Some(backend) => Box::new(backend.clone()),
        None => get_backend()?,
    };

    println!("SegCap recording session ({} backend)", backend.name());
    println!("  Resolution: {}", session_config.resolution);
    println!("  Downloads: {}", downloads.display());
    println!();
    println!("{HELP}");
    println!();

    let (handle, task) = spawn(RecordingSession::new(
        backend.as_ref(),
        session_config.clone(),
    ));
    let printer = tokio::spawn(print_events(handle.clone(), json));

    // Failures are reported on the event feed; the session stays usable.
    let _ = handle.initialize().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        let argument = words.next();

        match command {
            "start" => {
                let _ = handle.start_recording().await;
            }
            "pause" => handle.pause_recording().await?,
            "resume" => handle.resume_recording().await?,
            "stop" => {
                let _ = handle.stop_recording().await;
            }
            "screen" => {
                let _ = handle.start_screen_share().await;
            }
            "camera" => {
                let _ = handle.switch_to_camera().await;
            }
            "res" => match argument.map(|label| session_config.resolution(label)) {
                Some(Ok(resolution)) => {
                    let _ = handle.change_resolution(resolution).await;
                }
                Some(Err(e)) => eprintln!("error: {e}"),
                None => eprintln!("usage: res <label>"),
            },
            "list" => list_segments(&handle).await?,
            "download" => match argument.and_then(|n| n.parse::<usize>().ok()) {
                Some(index) => match handle.download_segment(SegmentId(index)).await {
                    Ok(Some(download)) => {
                        let path = download.write_to(&downloads)?;
                        println!("Saved {} ({} bytes)", path.display(), download.data.len());
                    }
                    Ok(None) => println!("Segment {index} is not finalized yet"),
                    Err(e) => eprintln!("error: {e}"),
                },
                None => eprintln!("usage: download <n>"),
            },
            "status" => {
                let snapshot = handle.snapshot();
                println!(
                    "state={} mime={} last_chunk={}B stream={}",
                    snapshot.recording_state,
                    if snapshot.mime_type.is_empty() {
                        "-"
                    } else {
                        snapshot.mime_type.as_str()
                    },
                    snapshot.most_recent_chunk_size,
                    snapshot
                        .stream
                        .map(|s| format!("{} ({})", s.id, s.source_type))
                        .unwrap_or_else(|| "none".to_string())
                );
            }
            "end" => match &synthetic_backend {
                Some(backend) => {
                    if !backend.end_screen_share() {
                        println!("No screen share is active");
                    }
                }
                None => eprintln!("`end` is only available with --synthetic"),
            },
            "help" => println!("{HELP}"),
            "quit" | "exit" => break,
            other => eprintln!("unknown command `{other}` (try `help`)"),
        }
    }

    let _ = handle.shutdown().await;
    list_segments(&handle).await?;
    drop(handle);

    let session = task.await?;
    printer.abort();
    tracing::info!(segments = session.segments().len(), "Session closed");
    Ok(())
}

async fn list_segments(handle: &SessionHandle) -> anyhow::Result<()> {
    let segments = handle.segments().await?;
    if segments.is_empty() {
        println!("No segments recorded");
        return Ok(());
    }
    for segment in segments {
        println!(
            "  [{}] {:<6} {:>10} bytes  {:>3} chunks  {}",
            segment.id.0,
            segment.source_type,
            segment.total_size,
            segment.chunk_count,
            match segment.duration_secs {
                Some(secs) => format!("{secs:.1}s"),
                None => "recording".to_string(),
            }
        );
    }
    Ok(())
}

async fn print_events(handle: SessionHandle, json: bool) {
    let mut events = handle.subscribe();
    // The subscription must not keep the controller alive.
    drop(handle);

    while let Some(event) = events.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "Cannot serialize event"),
            }
            continue;
        }
        match event {
            SessionEvent::StateChanged { state } => println!("> state: {state}"),
            SessionEvent::MimeTypeChanged { mime_type } => println!("> format: {mime_type}"),
            SessionEvent::StreamChanged { stream: Some(stream) } => {
                let label = stream
                    .tracks
                    .iter()
                    .map(|t| t.label.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                println!("> stream: {} {} [{label}]", stream.source_type, stream.id);
            }
            SessionEvent::StreamChanged { stream: None } => println!("> stream released"),
            SessionEvent::ChunkRecorded { .. } => {}
            SessionEvent::SegmentStarted {
                segment,
                source_type,
            } => println!("> segment {} started ({source_type})", segment.0),
            SessionEvent::SegmentFinalized { segment, size, .. } => {
                println!("> segment {} finalized ({size} bytes)", segment.0)
            }
            SessionEvent::Error { kind, message } => eprintln!("! {kind}: {message}"),
        }
    }
}
