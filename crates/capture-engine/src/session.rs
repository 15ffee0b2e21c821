//! Recording session management.
//!
//! A [`RecordingSession`] owns the bound stream, the active encoder and the
//! segment list, and is the only place where any of them change. Every
//! change is published on its [`ObservationBus`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use segcap_common::config::RecordingDefaults;
use segcap_common::error::{SegcapError, SegcapResult};
use segcap_platform_core::{
    AudioConstraints, EncoderBackend, MediaStream, PreviewSink, RecordingState, Resolution,
    SourceType, StreamId,
};

use crate::backend::CaptureBackend;
use crate::encoder::{select_format, EncoderOutput, EncodingSession};
use crate::observe::{ObservationBus, SessionEvent, SessionSnapshot, StreamInfo, Subscription};
use crate::segment::{Download, RecordingSegment, SegmentAccumulator, SegmentId, SegmentSummary};
use crate::source::CaptureSourceProvider;

/// Configuration for a recording session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Resolution catalog offered to the user.
    pub resolutions: Vec<Resolution>,

    /// Resolution used for the first acquisition.
    pub resolution: Resolution,

    /// Encoding formats in priority order.
    pub format_candidates: Vec<String>,

    /// Audio processing requested with every stream.
    pub audio: AudioConstraints,

    /// How long `stop_recording` waits for the encoder to flush.
    pub stop_timeout: Duration,
}

impl SessionConfig {
    pub fn from_defaults(defaults: &RecordingDefaults) -> SegcapResult<Self> {
        Ok(Self {
            resolutions: defaults.resolutions.iter().map(Resolution::from).collect(),
            resolution: Resolution::from(defaults.initial_resolution()?),
            format_candidates: defaults.format_candidates.clone(),
            audio: AudioConstraints::from(&defaults.audio),
            stop_timeout: Duration::from_millis(defaults.stop_timeout_ms),
        })
    }

    /// Look up a catalog entry by label, ignoring case.
    pub fn resolution(&self, label: &str) -> SegcapResult<Resolution> {
        self.resolutions
            .iter()
            .find(|r| r.label.eq_ignore_ascii_case(label))
            .cloned()
            .ok_or_else(|| {
                SegcapError::config(format!(
                    "Unknown resolution '{label}' (available: {})",
                    self.resolutions
                        .iter()
                        .map(|r| r.label.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        let defaults = RecordingDefaults::default();
        let resolutions: Vec<Resolution> =
            defaults.resolutions.iter().map(Resolution::from).collect();
        let resolution = resolutions
            .first()
            .cloned()
            .unwrap_or_else(|| Resolution::new("720p", 1280, 720));
        Self {
            resolutions,
            resolution,
            format_candidates: defaults.format_candidates.clone(),
            audio: AudioConstraints::from(&defaults.audio),
            stop_timeout: Duration::from_millis(defaults.stop_timeout_ms),
        }
    }
}

/// Platform signals a session reacts to between commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    /// Output of the active encoder.
    Encoder(EncoderOutput),
    /// The bound stream's video track ended on its own.
    StreamEnded(StreamId),
}

/// Classify a stream by its first video track label.
///
/// A label containing "screen" (any case) is a screen capture; anything
/// else, including a stream without video, is a camera.
pub fn infer_source_type(stream: &dyn MediaStream) -> SourceType {
    match stream.video_tracks().first() {
        Some(track) if track.label.to_lowercase().contains("screen") => SourceType::Screen,
        _ => SourceType::Camera,
    }
}

struct BoundStream {
    stream: Arc<dyn MediaStream>,
    /// Source type the stream was requested as.
    requested: SourceType,
    /// Switch to the camera when this stream ends on its own.
    auto_switch: bool,
}

struct ActiveRecording {
    encoder: EncodingSession,
    segment: SegmentId,
}

/// A recording session over one capture backend.
pub struct RecordingSession {
    config: SessionConfig,
    provider: CaptureSourceProvider,
    encoders: Arc<dyn EncoderBackend>,
    preview: Option<Arc<dyn PreviewSink>>,
    resolution: Resolution,
    stream: Option<BoundStream>,
    recording: Option<ActiveRecording>,
    segments: SegmentAccumulator,
    mime_type: Option<String>,
    bus: ObservationBus,
}

impl RecordingSession {
    /// Create a session. Nothing is acquired until [`initialize`](Self::initialize).
    pub fn new(backend: &dyn CaptureBackend, config: SessionConfig) -> Self {
        tracing::debug!(backend = backend.name(), resolution = %config.resolution, "Creating recording session");
        Self {
            provider: CaptureSourceProvider::new(backend.media_devices(), config.audio.clone()),
            encoders: backend.encoders(),
            preview: backend.preview(),
            resolution: config.resolution.clone(),
            config,
            stream: None,
            recording: None,
            segments: SegmentAccumulator::new(),
            mime_type: None,
            bus: ObservationBus::new(),
        }
    }

    /// Acquire and bind a camera stream at the selected resolution.
    ///
    /// A recording in progress is stopped and its stream released first.
    /// Recording is not started.
    pub async fn initialize(&mut self) -> SegcapResult<()> {
        self.switch_source(SourceType::Camera, false).await
    }

    /// Start recording the bound stream into a new segment.
    ///
    /// Does nothing while already recording or paused, or when no stream
    /// is bound.
    pub fn start_recording(&mut self) -> SegcapResult<()> {
        if self.recording.is_some() {
            tracing::debug!(state = %self.state(), "start ignored; already recording");
            return Ok(());
        }
        let Some(bound) = self.stream.as_ref() else {
            tracing::debug!("start ignored; no stream bound");
            return Ok(());
        };
        let stream = bound.stream.clone();

        let format = match select_format(self.encoders.as_ref(), &self.config.format_candidates) {
            Ok(format) => format,
            Err(e) => return Err(self.report(e)),
        };
        if self.mime_type.as_deref() != Some(format.mime_type()) {
            self.mime_type = Some(format.mime_type().to_string());
            self.bus.publish(SessionEvent::MimeTypeChanged {
                mime_type: format.mime_type().to_string(),
            });
        }

        let source_type = infer_source_type(stream.as_ref());
        let encoder = match EncodingSession::start(self.encoders.as_ref(), stream, format) {
            Ok(encoder) => encoder,
            Err(e) => return Err(self.report(e)),
        };

        let segment = self.segments.begin_segment(source_type);
        self.bus.publish(SessionEvent::SegmentStarted {
            segment,
            source_type,
        });
        self.recording = Some(ActiveRecording { encoder, segment });
        self.publish_state(RecordingState::Recording);
        tracing::info!(segment = %segment, source = %source_type, "Recording started");
        Ok(())
    }

    /// `recording -> paused`. No-op in any other state.
    pub fn pause_recording(&mut self) {
        let paused = self
            .recording
            .as_mut()
            .is_some_and(|active| active.encoder.pause());
        if paused {
            self.publish_state(RecordingState::Paused);
        }
    }

    /// `paused -> recording`. No-op in any other state.
    pub fn resume_recording(&mut self) {
        let resumed = self
            .recording
            .as_mut()
            .is_some_and(|active| active.encoder.resume());
        if resumed {
            self.publish_state(RecordingState::Recording);
        }
    }

    /// Stop the encoder, collect everything it still flushes, and finalize
    /// the segment. No-op while inactive.
    pub async fn stop_recording(&mut self) -> SegcapResult<()> {
        let Some(ActiveRecording {
            mut encoder,
            segment,
        }) = self.recording.take()
        else {
            return Ok(());
        };

        encoder.stop();
        for chunk in encoder.drain(self.config.stop_timeout).await {
            self.record_chunk(segment, chunk);
        }

        let result = self.segments.finalize(segment, encoder.format());
        drop(encoder);
        let outcome = match result {
            Ok(artifact) => {
                self.bus.publish(SessionEvent::SegmentFinalized {
                    segment,
                    artifact_id: artifact.id(),
                    size: artifact.len() as u64,
                });
                Ok(())
            }
            Err(e) => Err(self.report(e)),
        };
        self.publish_state(RecordingState::Inactive);
        tracing::info!(segment = %segment, "Recording stopped");
        outcome
    }

    /// Switch to a screen stream and record it. When the user stops
    /// sharing, the session switches back to the camera.
    pub async fn start_screen_share(&mut self) -> SegcapResult<()> {
        self.switch_source(SourceType::Screen, true).await
    }

    /// Switch to a camera stream and record it.
    pub async fn switch_to_camera(&mut self) -> SegcapResult<()> {
        self.switch_source(SourceType::Camera, true).await
    }

    /// Re-acquire the current source type at `resolution`.
    ///
    /// Recording is stopped and not restarted.
    pub async fn change_resolution(&mut self, resolution: Resolution) -> SegcapResult<()> {
        tracing::info!(from = %self.resolution, to = %resolution, "Changing resolution");
        self.resolution = resolution;
        let source = self
            .stream
            .as_ref()
            .map(|bound| bound.requested)
            .unwrap_or(SourceType::Camera);
        self.switch_source(source, false).await
    }

    /// Stop recording and release the stream. Segments are kept.
    pub async fn shutdown(&mut self) -> SegcapResult<()> {
        let stopped = self.stop_recording().await;
        self.release_stream();
        stopped
    }

    /// Wait for the next platform signal.
    ///
    /// Pending forever while there is nothing to wait for; use it as one
    /// branch of a `select!`.
    pub async fn next_signal(&mut self) -> SessionSignal {
        let recording = self.recording.as_mut();
        let stream = self.stream.as_ref();

        let output = async move {
            match recording {
                Some(active) if !active.encoder.is_finished() => {
                    match active.encoder.next_output().await {
                        Some(output) => output,
                        None => std::future::pending().await,
                    }
                }
                _ => std::future::pending().await,
            }
        };
        let ended = async move {
            match stream {
                Some(bound) if bound.auto_switch => {
                    bound.stream.ended().await;
                    bound.stream.id()
                }
                _ => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            output = output => SessionSignal::Encoder(output),
            id = ended => SessionSignal::StreamEnded(id),
        }
    }

    /// React to a platform signal.
    pub async fn handle_signal(&mut self, signal: SessionSignal) {
        match signal {
            SessionSignal::Encoder(EncoderOutput::Chunk(chunk)) => {
                if let Some(segment) = self.recording.as_ref().map(|active| active.segment) {
                    self.record_chunk(segment, chunk);
                }
            }
            SessionSignal::Encoder(EncoderOutput::Finished) => {
                tracing::warn!("Encoder finished on its own; finalizing segment");
                let _ = self.stop_recording().await;
            }
            SessionSignal::StreamEnded(id) => {
                let bound = self
                    .stream
                    .as_ref()
                    .is_some_and(|bound| bound.auto_switch && bound.stream.id() == id);
                if bound {
                    tracing::info!(stream = %id, "Screen share ended; switching to camera");
                    let _ = self.switch_to_camera().await;
                } else {
                    tracing::debug!(stream = %id, "Ignoring end of a stream that is no longer bound");
                }
            }
        }
    }

    /// Handle every signal that is already available without waiting.
    ///
    /// Returns the number of signals handled.
    pub async fn run_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let signal = if let Some(output) = self
                .recording
                .as_mut()
                .and_then(|active| active.encoder.try_next_output())
            {
                SessionSignal::Encoder(output)
            } else if let Some(id) = self
                .stream
                .as_ref()
                .filter(|bound| bound.auto_switch && bound.stream.has_ended())
                .map(|bound| bound.stream.id())
            {
                SessionSignal::StreamEnded(id)
            } else {
                return handled;
            };
            self.handle_signal(signal).await;
            handled += 1;
        }
    }

    pub fn state(&self) -> RecordingState {
        self.recording
            .as_ref()
            .map(|active| active.encoder.state())
            .unwrap_or_default()
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The negotiated format, once one has been selected.
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn stream(&self) -> Option<StreamInfo> {
        self.stream
            .as_ref()
            .map(|bound| StreamInfo::of(bound.stream.as_ref(), bound.requested))
    }

    /// Segment currently being recorded into.
    pub fn current_segment(&self) -> Option<SegmentId> {
        self.recording.as_ref().map(|active| active.segment)
    }

    pub fn segment(&self, id: SegmentId) -> SegcapResult<&RecordingSegment> {
        self.segments.get(id)
    }

    pub fn segments(&self) -> Vec<SegmentSummary> {
        self.segments.summaries()
    }

    /// Download descriptor of a segment; `None` until it is finalized.
    pub fn download_segment(&self, id: SegmentId) -> SegcapResult<Option<Download>> {
        Ok(self.segments.get(id)?.download())
    }

    pub fn segment_size(&self, id: SegmentId) -> SegcapResult<u64> {
        self.segments.total_size(id)
    }

    pub fn bus(&self) -> &ObservationBus {
        &self.bus
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.bus.snapshot()
    }

    async fn switch_source(&mut self, source: SourceType, restart: bool) -> SegcapResult<()> {
        let _ = self.stop_recording().await;
        self.release_stream();
        self.acquire_and_bind(source, source == SourceType::Screen)
            .await?;
        if restart {
            self.start_recording()?;
        }
        Ok(())
    }

    async fn acquire_and_bind(&mut self, source: SourceType, auto_switch: bool) -> SegcapResult<()> {
        match self.provider.acquire(source, &self.resolution).await {
            Ok(stream) => self.bind_stream(stream, source, auto_switch),
            Err(e) => Err(self.report(e)),
        }
    }

    /// Bind a freshly acquired stream. The previous stream must already be
    /// released, and no encoder may be running.
    fn bind_stream(
        &mut self,
        stream: Arc<dyn MediaStream>,
        requested: SourceType,
        auto_switch: bool,
    ) -> SegcapResult<()> {
        if self.recording.is_some() || self.stream.is_some() {
            stream.stop_tracks();
            return Err(self.report(SegcapError::capture(
                "Cannot bind a stream while another stream or recording is active",
            )));
        }
        tracing::info!(stream = %stream.id(), source = %requested, auto_switch, "Binding stream");
        self.bus.publish(SessionEvent::StreamChanged {
            stream: Some(StreamInfo::of(stream.as_ref(), requested)),
        });

        if let Some(preview) = self.preview.clone() {
            if let Err(e) = preview.show(&stream) {
                let e = match e {
                    SegcapError::Playback { .. } => e,
                    other => SegcapError::playback(other.to_string()),
                };
                self.report(e);
            }
        }

        self.stream = Some(BoundStream {
            stream,
            requested,
            auto_switch,
        });
        Ok(())
    }

    fn release_stream(&mut self) {
        if let Some(bound) = self.stream.take() {
            tracing::info!(stream = %bound.stream.id(), "Releasing stream");
            bound.stream.stop_tracks();
            self.bus.publish(SessionEvent::StreamChanged { stream: None });
        }
    }

    fn record_chunk(&mut self, segment: SegmentId, chunk: Bytes) {
        let size = chunk.len() as u64;
        if size == 0 {
            return;
        }
        match self.segments.append(segment, chunk) {
            Ok(()) => {
                tracing::trace!(segment = %segment, bytes = size, "Chunk recorded");
                self.bus
                    .publish(SessionEvent::ChunkRecorded { segment, size });
            }
            Err(e) => {
                self.report(e);
            }
        }
    }

    fn publish_state(&self, state: RecordingState) {
        self.bus.publish(SessionEvent::StateChanged { state });
    }

    /// The single error sink: log, publish, hand the error back.
    fn report(&self, err: SegcapError) -> SegcapError {
        tracing::error!(kind = %err.kind(), error = %err, "Session error");
        self.bus.publish(SessionEvent::error(&err));
        err
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if let Some(bound) = self.stream.take() {
            bound.stream.stop_tracks();
        }
    }
}

impl std::fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSession")
            .field("state", &self.state())
            .field("resolution", &self.resolution)
            .field("mime_type", &self.mime_type)
            .field("stream", &self.stream())
            .field("segments", &self.segments.len())
            .finish_non_exhaustive()
    }
}
