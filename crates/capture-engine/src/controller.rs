//! Session controller: one task owns a [`RecordingSession`] and applies
//! commands and platform signals to it one at a time.
//!
//! Commands from any number of [`SessionHandle`] clones queue up in
//! arrival order. Overlapping source switches are not cancelled; the one
//! applied last decides the bound stream.

use segcap_common::error::{SegcapError, SegcapResult};
use segcap_platform_core::{RecordingState, Resolution};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::observe::{ObservationBus, SessionSnapshot, StreamInfo, Subscription};
use crate::segment::{Download, SegmentId, SegmentSummary};
use crate::session::RecordingSession;

const COMMAND_QUEUE: usize = 64;

type Reply<T> = oneshot::Sender<T>;

/// Commands understood by the controller task.
#[derive(Debug)]
enum Command {
    Initialize(Reply<SegcapResult<()>>),
    StartRecording(Reply<SegcapResult<()>>),
    PauseRecording(Reply<()>),
    ResumeRecording(Reply<()>),
    StopRecording(Reply<SegcapResult<()>>),
    StartScreenShare(Reply<SegcapResult<()>>),
    SwitchToCamera(Reply<SegcapResult<()>>),
    ChangeResolution(Resolution, Reply<SegcapResult<()>>),
    State(Reply<RecordingState>),
    Stream(Reply<Option<StreamInfo>>),
    Segments(Reply<Vec<SegmentSummary>>),
    DownloadSegment(SegmentId, Reply<SegcapResult<Option<Download>>>),
    SegmentSize(SegmentId, Reply<SegcapResult<u64>>),
    Shutdown(Reply<SegcapResult<()>>),
}

/// Cloneable handle to a running session controller.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    bus: ObservationBus,
}

/// Move `session` into a controller task.
///
/// The task ends when every handle is dropped; it then shuts the session
/// down and hands it back through the join handle.
pub fn spawn(session: RecordingSession) -> (SessionHandle, JoinHandle<RecordingSession>) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let handle = SessionHandle {
        commands: tx,
        bus: session.bus().clone(),
    };
    let task = tokio::spawn(run(session, rx));
    (handle, task)
}

async fn run(mut session: RecordingSession, mut commands: mpsc::Receiver<Command>) -> RecordingSession {
    tracing::debug!("Session controller started");
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => apply(&mut session, command).await,
                None => break,
            },
            signal = session.next_signal() => session.handle_signal(signal).await,
        }
    }

    if let Err(e) = session.shutdown().await {
        tracing::warn!(error = %e, "Session shutdown reported an error");
    }
    tracing::debug!("Session controller stopped");
    session
}

async fn apply(session: &mut RecordingSession, command: Command) {
    // Chunks already emitted belong to the segment that is recording now,
    // before the command can stop or replace it.
    session.run_pending().await;

    match command {
        Command::Initialize(reply) => {
            let _ = reply.send(session.initialize().await);
        }
        Command::StartRecording(reply) => {
            let _ = reply.send(session.start_recording());
        }
        Command::PauseRecording(reply) => {
            session.pause_recording();
            let _ = reply.send(());
        }
        Command::ResumeRecording(reply) => {
            session.resume_recording();
            let _ = reply.send(());
        }
        Command::StopRecording(reply) => {
            let _ = reply.send(session.stop_recording().await);
        }
        Command::StartScreenShare(reply) => {
            let _ = reply.send(session.start_screen_share().await);
        }
        Command::SwitchToCamera(reply) => {
            let _ = reply.send(session.switch_to_camera().await);
        }
        Command::ChangeResolution(resolution, reply) => {
            let _ = reply.send(session.change_resolution(resolution).await);
        }
        Command::State(reply) => {
            let _ = reply.send(session.state());
        }
        Command::Stream(reply) => {
            let _ = reply.send(session.stream());
        }
        Command::Segments(reply) => {
            let _ = reply.send(session.segments());
        }
        Command::DownloadSegment(id, reply) => {
            let _ = reply.send(session.download_segment(id));
        }
        Command::SegmentSize(id, reply) => {
            let _ = reply.send(session.segment_size(id));
        }
        Command::Shutdown(reply) => {
            let _ = reply.send(session.shutdown().await);
        }
    }
}

fn controller_gone() -> SegcapError {
    SegcapError::capture("Session controller has shut down")
}

impl SessionHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> SegcapResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| controller_gone())?;
        rx.await.map_err(|_| controller_gone())
    }

    pub async fn initialize(&self) -> SegcapResult<()> {
        self.request(Command::Initialize).await?
    }

    pub async fn start_recording(&self) -> SegcapResult<()> {
        self.request(Command::StartRecording).await?
    }

    pub async fn pause_recording(&self) -> SegcapResult<()> {
        self.request(Command::PauseRecording).await
    }

    pub async fn resume_recording(&self) -> SegcapResult<()> {
        self.request(Command::ResumeRecording).await
    }

    pub async fn stop_recording(&self) -> SegcapResult<()> {
        self.request(Command::StopRecording).await?
    }

    pub async fn start_screen_share(&self) -> SegcapResult<()> {
        self.request(Command::StartScreenShare).await?
    }

    pub async fn switch_to_camera(&self) -> SegcapResult<()> {
        self.request(Command::SwitchToCamera).await?
    }

    pub async fn change_resolution(&self, resolution: Resolution) -> SegcapResult<()> {
        self.request(|reply| Command::ChangeResolution(resolution, reply))
            .await?
    }

    pub async fn state(&self) -> SegcapResult<RecordingState> {
        self.request(Command::State).await
    }

    pub async fn stream(&self) -> SegcapResult<Option<StreamInfo>> {
        self.request(Command::Stream).await
    }

    pub async fn segments(&self) -> SegcapResult<Vec<SegmentSummary>> {
        self.request(Command::Segments).await
    }

    pub async fn download_segment(&self, id: SegmentId) -> SegcapResult<Option<Download>> {
        self.request(|reply| Command::DownloadSegment(id, reply))
            .await?
    }

    pub async fn segment_size(&self, id: SegmentId) -> SegcapResult<u64> {
        self.request(|reply| Command::SegmentSize(id, reply)).await?
    }

    /// Stop recording and release the stream. The controller keeps running.
    pub async fn shutdown(&self) -> SegcapResult<()> {
        self.request(Command::Shutdown).await?
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.bus.snapshot()
    }

    pub fn bus(&self) -> &ObservationBus {
        &self.bus
    }
}
