//! Deterministic in-memory backend.
//!
//! Devices hand out fake streams with configurable labels, encoders emit
//! chunks on demand (or on a timer). Denied permissions, failing encoders
//! and a user ending a screen share are all toggled from the
//! [`SyntheticBackend`] handle.

use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use segcap_common::error::{SegcapError, SegcapResult};
use segcap_platform_core::{
    EncoderBackend, EncoderEvent, MediaConstraints, MediaDevices, MediaEncoder, MediaStream,
    PreviewSink, RecordingState, SourceType, StreamId, TrackInfo, TrackKind,
};
use tokio::sync::{mpsc, watch};

use crate::backend::CaptureBackend;

const DEFAULT_SUPPORTED: [&str; 2] = ["video/webm;codecs=vp9,opus", "video/webm;codecs=vp8,opus"];

/// Handle to a synthetic platform. Clones share state.
#[derive(Clone)]
pub struct SyntheticBackend {
    shared: Arc<Shared>,
}

struct Shared {
    next_stream_id: AtomicU64,
    state: Mutex<SyntheticState>,
}

struct SyntheticState {
    camera_label: String,
    screen_label: String,
    audio: bool,
    supported: Vec<String>,
    denied: HashSet<SourceType>,
    fail_encoder_init: bool,
    fail_preview: bool,
    flush_bytes: usize,
    stall_stop: bool,
    auto_chunks: Option<(Duration, usize)>,
    streams: Vec<Arc<SyntheticStream>>,
    encoders: Vec<Arc<EncoderProbe>>,
    requests: Vec<(SourceType, MediaConstraints)>,
    previews: Vec<StreamId>,
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                next_stream_id: AtomicU64::new(1),
                state: Mutex::new(SyntheticState {
                    camera_label: "FaceTime HD Camera (Built-in)".to_string(),
                    screen_label: "screen:0:0".to_string(),
                    audio: true,
                    supported: DEFAULT_SUPPORTED.iter().map(|s| s.to_string()).collect(),
                    denied: HashSet::new(),
                    fail_encoder_init: false,
                    fail_preview: false,
                    flush_bytes: 0,
                    stall_stop: false,
                    auto_chunks: None,
                    streams: Vec::new(),
                    encoders: Vec::new(),
                    requests: Vec::new(),
                    previews: Vec::new(),
                }),
            }),
        }
    }

    /// Replace the set of MIME types reported as supported.
    pub fn with_supported_formats<I, S>(self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().supported = formats.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_camera_label(self, label: impl Into<String>) -> Self {
        self.lock().camera_label = label.into();
        self
    }

    pub fn with_screen_label(self, label: impl Into<String>) -> Self {
        self.lock().screen_label = label.into();
        self
    }

    /// Streams without a microphone track.
    pub fn without_audio(self) -> Self {
        self.lock().audio = false;
        self
    }

    /// Emit one chunk of `bytes` during stop, just before completion.
    pub fn with_flush_bytes(self, bytes: usize) -> Self {
        self.lock().flush_bytes = bytes;
        self
    }

    /// Encoders accept stop but never signal completion.
    pub fn with_stalled_stop(self) -> Self {
        self.lock().stall_stop = true;
        self
    }

    /// Emit a `size`-byte chunk every `interval` while recording.
    pub fn with_auto_chunks(self, interval: Duration, size: usize) -> Self {
        self.lock().auto_chunks = Some((interval, size));
        self
    }

    /// Make acquisition of `source` fail as if permission were denied.
    pub fn deny(&self, source: SourceType, denied: bool) {
        let mut state = self.lock();
        if denied {
            state.denied.insert(source);
        } else {
            state.denied.remove(&source);
        }
    }

    pub fn fail_encoder_init(&self, fail: bool) {
        self.lock().fail_encoder_init = fail;
    }

    pub fn fail_preview(&self, fail: bool) {
        self.lock().fail_preview = fail;
    }

    /// Emit a chunk of `size` bytes from the recording encoder.
    ///
    /// Returns false when no encoder is recording (paused encoders
    /// produce nothing).
    pub fn emit_chunk(&self, size: usize) -> bool {
        self.emit(Bytes::from(vec![0x1a; size]))
    }

    /// Emit raw data from the recording encoder.
    pub fn emit(&self, chunk: Bytes) -> bool {
        let encoder = self.lock().encoders.last().cloned();
        encoder.is_some_and(|probe| probe.emit(chunk))
    }

    /// Make the most recent encoder signal completion without being
    /// stopped, as a platform encoder does when its pipeline fails.
    pub fn finish_encoder(&self) -> bool {
        let encoder = self.lock().encoders.last().cloned();
        encoder.is_some_and(|probe| probe.finish())
    }

    /// End the most recent live screen stream as if the user stopped sharing.
    pub fn end_screen_share(&self) -> bool {
        let stream = self
            .lock()
            .streams
            .iter()
            .rev()
            .find(|s| s.source == SourceType::Screen && s.is_live())
            .cloned();
        match stream {
            Some(stream) => {
                stream.end_naturally();
                true
            }
            None => false,
        }
    }

    pub fn streams(&self) -> Vec<Arc<SyntheticStream>> {
        self.lock().streams.clone()
    }

    pub fn live_stream_count(&self) -> usize {
        self.lock().streams.iter().filter(|s| s.is_live()).count()
    }

    /// Every acquisition request received, in order.
    pub fn requests(&self) -> Vec<(SourceType, MediaConstraints)> {
        self.lock().requests.clone()
    }

    pub fn encoder_count(&self) -> usize {
        self.lock().encoders.len()
    }

    /// States of every encoder created so far, in creation order.
    pub fn encoder_states(&self) -> Vec<RecordingState> {
        self.lock().encoders.iter().map(|e| e.phase()).collect()
    }

    /// Streams shown in the preview, in order.
    pub fn previews(&self) -> Vec<StreamId> {
        self.lock().previews.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SyntheticState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn acquire(
        &self,
        source: SourceType,
        constraints: &MediaConstraints,
    ) -> SegcapResult<Arc<dyn MediaStream>> {
        let mut state = self.lock();
        state.requests.push((source, constraints.clone()));
        if state.denied.contains(&source) {
            return Err(SegcapError::permission_denied(format!(
                "{source} access denied by user"
            )));
        }

        let id = StreamId(self.shared.next_stream_id.fetch_add(1, Ordering::Relaxed));
        let label = match source {
            SourceType::Camera => state.camera_label.clone(),
            SourceType::Screen => state.screen_label.clone(),
        };
        let mut tracks = vec![TrackInfo {
            id: format!("{id}-video"),
            kind: TrackKind::Video,
            label,
        }];
        if state.audio {
            tracks.push(TrackInfo {
                id: format!("{id}-audio"),
                kind: TrackKind::Audio,
                label: "Default - Microphone".to_string(),
            });
        }

        let stream = Arc::new(SyntheticStream::new(id, source, tracks));
        state.streams.push(stream.clone());
        Ok(stream)
    }
}

impl CaptureBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn media_devices(&self) -> Arc<dyn MediaDevices> {
        Arc::new(self.clone())
    }

    fn encoders(&self) -> Arc<dyn EncoderBackend> {
        Arc::new(self.clone())
    }

    fn preview(&self) -> Option<Arc<dyn PreviewSink>> {
        Some(Arc::new(self.clone()))
    }
}

#[async_trait::async_trait]
impl MediaDevices for SyntheticBackend {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> SegcapResult<Arc<dyn MediaStream>> {
        tokio::task::yield_now().await;
        self.acquire(SourceType::Camera, constraints)
    }

    async fn get_display_media(
        &self,
        constraints: &MediaConstraints,
    ) -> SegcapResult<Arc<dyn MediaStream>> {
        tokio::task::yield_now().await;
        self.acquire(SourceType::Screen, constraints)
    }
}

impl EncoderBackend for SyntheticBackend {
    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.lock().supported.iter().any(|s| s == mime_type)
    }

    fn create_encoder(
        &self,
        stream: Arc<dyn MediaStream>,
        mime_type: &str,
    ) -> SegcapResult<Box<dyn MediaEncoder>> {
        let mut state = self.lock();
        if state.fail_encoder_init {
            return Err(SegcapError::encoder_init(format!(
                "synthetic encoder refused {mime_type}"
            )));
        }
        if !stream.is_live() {
            return Err(SegcapError::encoder_init(format!(
                "{} has been released",
                stream.id()
            )));
        }

        let probe = Arc::new(EncoderProbe {
            stream: stream.id(),
            state: Mutex::new(ProbeState {
                tx: None,
                phase: RecordingState::Inactive,
            }),
        });
        state.encoders.push(probe.clone());

        Ok(Box::new(SyntheticEncoder {
            probe,
            flush_bytes: state.flush_bytes,
            stall_stop: state.stall_stop,
            auto_chunks: state.auto_chunks,
            ticker: None,
        }))
    }
}

impl PreviewSink for SyntheticBackend {
    fn show(&self, stream: &Arc<dyn MediaStream>) -> SegcapResult<()> {
        let mut state = self.lock();
        if state.fail_preview {
            return Err(SegcapError::playback("synthetic preview cannot render"));
        }
        state.previews.push(stream.id());
        Ok(())
    }
}

/// A fake stream. Its video track can be ended "by the user".
#[derive(Debug)]
pub struct SyntheticStream {
    id: StreamId,
    source: SourceType,
    tracks: Vec<TrackInfo>,
    live: AtomicBool,
    ended: watch::Sender<bool>,
}

impl SyntheticStream {
    fn new(id: StreamId, source: SourceType, tracks: Vec<TrackInfo>) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            id,
            source,
            tracks,
            live: AtomicBool::new(true),
            ended,
        }
    }

    pub fn source(&self) -> SourceType {
        self.source
    }

    /// End the stream as if the user stopped it from outside the app.
    pub fn end_naturally(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            self.ended.send_replace(true);
        }
    }
}

#[async_trait::async_trait]
impl MediaStream for SyntheticStream {
    fn id(&self) -> StreamId {
        self.id
    }

    fn tracks(&self) -> Vec<TrackInfo> {
        self.tracks.clone()
    }

    fn stop_tracks(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn has_ended(&self) -> bool {
        *self.ended.borrow()
    }

    async fn ended(&self) {
        let mut rx = self.ended.subscribe();
        if rx.wait_for(|ended| *ended).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct EncoderProbe {
    stream: StreamId,
    state: Mutex<ProbeState>,
}

struct ProbeState {
    tx: Option<mpsc::UnboundedSender<EncoderEvent>>,
    phase: RecordingState,
}

impl EncoderProbe {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn phase(&self) -> RecordingState {
        self.lock().phase
    }

    fn emit(&self, chunk: Bytes) -> bool {
        let state = self.lock();
        if state.phase != RecordingState::Recording {
            return false;
        }
        state
            .tx
            .as_ref()
            .is_some_and(|tx| tx.send(EncoderEvent::DataAvailable(chunk)).is_ok())
    }

    fn finish(&self) -> bool {
        let mut state = self.lock();
        if state.phase == RecordingState::Inactive {
            return false;
        }
        state.phase = RecordingState::Inactive;
        state
            .tx
            .take()
            .is_some_and(|tx| tx.send(EncoderEvent::Stopped).is_ok())
    }
}

struct SyntheticEncoder {
    probe: Arc<EncoderProbe>,
    flush_bytes: usize,
    stall_stop: bool,
    auto_chunks: Option<(Duration, usize)>,
    ticker: Option<tokio::task::JoinHandle<()>>,
}

impl MediaEncoder for SyntheticEncoder {
    fn start(&mut self, events: mpsc::UnboundedSender<EncoderEvent>) -> SegcapResult<()> {
        {
            let mut state = self.probe.lock();
            if state.phase != RecordingState::Inactive || state.tx.is_some() {
                return Err(SegcapError::encoder_init("encoder already started"));
            }
            state.tx = Some(events);
            state.phase = RecordingState::Recording;
        }

        if let Some((interval, size)) = self.auto_chunks {
            let handle = tokio::runtime::Handle::try_current()
                .map_err(|e| SegcapError::encoder_init(format!("no async runtime: {e}")))?;
            let probe = self.probe.clone();
            self.ticker = Some(handle.spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    probe.emit(Bytes::from(vec![0x1a; size]));
                }
            }));
        }
        tracing::debug!(stream = %self.probe.stream, "Synthetic encoder started");
        Ok(())
    }

    fn pause(&mut self) -> SegcapResult<()> {
        self.probe.lock().phase = RecordingState::Paused;
        Ok(())
    }

    fn resume(&mut self) -> SegcapResult<()> {
        self.probe.lock().phase = RecordingState::Recording;
        Ok(())
    }

    fn stop(&mut self) -> SegcapResult<()> {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        let mut state = self.probe.lock();
        state.phase = RecordingState::Inactive;
        if self.stall_stop {
            // The sender stays open so the session sees silence, not a closed channel.
            return Ok(());
        }
        if let Some(tx) = state.tx.take() {
            if self.flush_bytes > 0 {
                let _ = tx.send(EncoderEvent::DataAvailable(Bytes::from(vec![
                    0x1f;
                    self.flush_bytes
                ])));
            }
            let _ = tx.send(EncoderEvent::Stopped);
        }
        Ok(())
    }
}

impl Drop for SyntheticEncoder {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}
