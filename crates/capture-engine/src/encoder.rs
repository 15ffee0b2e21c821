//! Encoder adapter: format negotiation and the encoding-session lifecycle.
//!
//! An [`EncodingSession`] wraps one platform encoder bound to one stream.
//! Platform events arrive on a typed channel; the session filters them
//! into [`EncoderOutput`] values in emission order:
//!
//! ```text
//! platform encoder ──EncoderEvent──▶ EncodingSession ──EncoderOutput──▶ session
//!   DataAvailable(b)                  (drops empty b)    Chunk(b)
//!   Error(msg)                        (logged)
//!   Stopped                           (exactly once)     Finished
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use segcap_common::error::{SegcapError, SegcapResult};
use segcap_platform_core::{
    EncoderBackend, EncoderEvent, EncodingFormat, MediaEncoder, MediaStream, RecordingState,
    StreamId,
};
use tokio::sync::mpsc::{self, error::TryRecvError};

static NEXT_ENCODER_ID: AtomicU64 = AtomicU64::new(1);

/// Pick the first candidate the platform supports.
pub fn select_format(
    backend: &dyn EncoderBackend,
    candidates: &[String],
) -> SegcapResult<EncodingFormat> {
    for candidate in candidates {
        if backend.is_type_supported(candidate) {
            tracing::debug!(mime_type = %candidate, "Selected encoding format");
            return Ok(EncodingFormat::parse(candidate));
        }
        tracing::debug!(mime_type = %candidate, "Encoding format not supported");
    }
    Err(SegcapError::NoSupportedFormat {
        candidates: candidates.len(),
    })
}

/// Output of an encoding session, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderOutput {
    /// A non-empty chunk of encoded data.
    Chunk(Bytes),
    /// The encoder flushed everything. Emitted once.
    Finished,
}

/// One platform encoder bound to one stream.
///
/// `Inactive` is terminal: a stopped session cannot be restarted.
pub struct EncodingSession {
    id: u64,
    stream_id: StreamId,
    format: EncodingFormat,
    encoder: Box<dyn MediaEncoder>,
    events: mpsc::UnboundedReceiver<EncoderEvent>,
    state: RecordingState,
    finished: bool,
}

impl EncodingSession {
    /// Construct and start an encoder for `stream`.
    ///
    /// Any platform failure here is an encoder initialization error.
    pub fn start(
        backend: &dyn EncoderBackend,
        stream: Arc<dyn MediaStream>,
        format: EncodingFormat,
    ) -> SegcapResult<Self> {
        let stream_id = stream.id();
        let mut encoder = backend
            .create_encoder(stream, format.mime_type())
            .map_err(into_init_error)?;

        let (tx, rx) = mpsc::unbounded_channel();
        encoder.start(tx).map_err(into_init_error)?;

        let id = NEXT_ENCODER_ID.fetch_add(1, Ordering::Relaxed);
        tracing::info!(encoder = id, stream = %stream_id, mime_type = %format, "Encoder started");

        Ok(Self {
            id,
            stream_id,
            format,
            encoder,
            events: rx,
            state: RecordingState::Recording,
            finished: false,
        })
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn format(&self) -> &EncodingFormat {
        &self.format
    }

    /// Whether the completion signal has been received.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// `recording -> paused`. Returns false (and does nothing) otherwise.
    pub fn pause(&mut self) -> bool {
        if self.state != RecordingState::Recording {
            return false;
        }
        if let Err(e) = self.encoder.pause() {
            tracing::warn!(encoder = self.id, error = %e, "Encoder pause failed");
            return false;
        }
        self.state = RecordingState::Paused;
        true
    }

    /// `paused -> recording`. Returns false (and does nothing) otherwise.
    pub fn resume(&mut self) -> bool {
        if self.state != RecordingState::Paused {
            return false;
        }
        if let Err(e) = self.encoder.resume() {
            tracing::warn!(encoder = self.id, error = %e, "Encoder resume failed");
            return false;
        }
        self.state = RecordingState::Recording;
        true
    }

    /// `recording|paused -> inactive`. Returns false if already inactive.
    ///
    /// The state is inactive afterwards even if the platform rejected the
    /// request; `drain` then ends on the channel closing or the timeout.
    pub fn stop(&mut self) -> bool {
        if self.state == RecordingState::Inactive {
            return false;
        }
        if let Err(e) = self.encoder.stop() {
            tracing::warn!(encoder = self.id, error = %e, "Encoder stop failed");
        }
        self.state = RecordingState::Inactive;
        true
    }

    /// Wait for the next chunk or the completion signal.
    ///
    /// Returns `None` once finished; anything emitted after completion is
    /// discarded.
    pub async fn next_output(&mut self) -> Option<EncoderOutput> {
        loop {
            if self.finished {
                self.discard_late_events();
                return None;
            }
            let event = self.events.recv().await;
            if let Some(output) = self.absorb(event) {
                return Some(output);
            }
        }
    }

    /// Non-blocking variant of [`next_output`](Self::next_output).
    pub fn try_next_output(&mut self) -> Option<EncoderOutput> {
        loop {
            if self.finished {
                self.discard_late_events();
                return None;
            }
            let event = match self.events.try_recv() {
                Ok(event) => Some(event),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => None,
            };
            if let Some(output) = self.absorb(event) {
                return Some(output);
            }
        }
    }

    /// Collect every chunk still in flight until the completion signal.
    ///
    /// Call after [`stop`](Self::stop). Bounded by `timeout`; on timeout
    /// the session is marked finished and the chunks received so far are
    /// returned.
    pub async fn drain(&mut self, timeout: Duration) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        let drained = tokio::time::timeout(timeout, async {
            while let Some(output) = self.next_output().await {
                match output {
                    EncoderOutput::Chunk(chunk) => chunks.push(chunk),
                    EncoderOutput::Finished => break,
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                encoder = self.id,
                timeout_ms = timeout.as_millis() as u64,
                "Encoder did not signal completion; finalizing with received chunks"
            );
            self.finished = true;
        }
        chunks
    }

    fn absorb(&mut self, event: Option<EncoderEvent>) -> Option<EncoderOutput> {
        match event {
            Some(EncoderEvent::DataAvailable(chunk)) if chunk.is_empty() => {
                tracing::trace!(encoder = self.id, "Discarding empty chunk");
                None
            }
            Some(EncoderEvent::DataAvailable(chunk)) => Some(EncoderOutput::Chunk(chunk)),
            Some(EncoderEvent::Error(message)) => {
                tracing::warn!(encoder = self.id, error = %message, "Encoder reported an error");
                None
            }
            Some(EncoderEvent::Stopped) => {
                self.finished = true;
                tracing::debug!(encoder = self.id, "Encoder signalled completion");
                Some(EncoderOutput::Finished)
            }
            None => {
                tracing::warn!(encoder = self.id, "Encoder channel closed without completion signal");
                self.finished = true;
                Some(EncoderOutput::Finished)
            }
        }
    }

    fn discard_late_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            tracing::warn!(encoder = self.id, ?event, "Dropping encoder event after completion");
        }
    }
}

impl Drop for EncodingSession {
    fn drop(&mut self) {
        if self.state != RecordingState::Inactive {
            tracing::debug!(encoder = self.id, "Stopping encoder on drop");
            let _ = self.encoder.stop();
        }
    }
}

impl std::fmt::Debug for EncodingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodingSession")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("format", &self.format)
            .field("state", &self.state)
            .field("finished", &self.finished)
            .finish()
    }
}

fn into_init_error(e: SegcapError) -> SegcapError {
    match e {
        SegcapError::EncoderInit { .. } => e,
        other => SegcapError::encoder_init(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SyntheticBackend;
    use segcap_platform_core::{AudioConstraints, MediaDevices, MediaConstraints, VideoConstraints};

    fn candidates(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn camera(backend: &SyntheticBackend) -> Arc<dyn MediaStream> {
        backend
            .get_user_media(&MediaConstraints {
                video: VideoConstraints {
                    ideal_width: 1280,
                    ideal_height: 720,
                    aspect_ratio: 1280.0 / 720.0,
                    facing_mode: None,
                },
                audio: AudioConstraints::default(),
            })
            .await
            .unwrap()
    }

    #[test]
    fn test_select_first_supported_candidate() {
        let backend = SyntheticBackend::new().with_supported_formats(["video/b"]);
        let format = select_format(&backend, &candidates(&["video/a", "video/b", "video/c"])).unwrap();
        assert_eq!(format.mime_type(), "video/b");
    }

    #[test]
    fn test_select_without_support_fails() {
        let backend = SyntheticBackend::new().with_supported_formats(Vec::<String>::new());
        let err = select_format(&backend, &candidates(&["video/a", "video/b"])).unwrap_err();
        assert!(matches!(err, SegcapError::NoSupportedFormat { candidates: 2 }));
    }

    #[tokio::test]
    async fn test_outputs_filter_empty_chunks_and_finish_once() {
        let backend = SyntheticBackend::new();
        let stream = camera(&backend).await;
        let mut session = EncodingSession::start(
            &backend,
            stream,
            EncodingFormat::parse("video/webm;codecs=vp9,opus"),
        )
        .unwrap();

        backend.emit(Bytes::new());
        backend.emit_chunk(4);
        assert_eq!(
            session.try_next_output(),
            Some(EncoderOutput::Chunk(Bytes::from(vec![0x1a; 4])))
        );
        assert_eq!(session.try_next_output(), None);

        assert!(session.stop());
        assert!(!session.stop());
        assert_eq!(session.next_output().await, Some(EncoderOutput::Finished));
        assert_eq!(session.next_output().await, None);
        assert!(session.is_finished());
    }

    #[tokio::test]
    async fn test_pause_resume_require_state() {
        let backend = SyntheticBackend::new();
        let stream = camera(&backend).await;
        let mut session =
            EncodingSession::start(&backend, stream, EncodingFormat::parse("video/webm")).unwrap();

        assert!(!session.resume());
        assert!(session.pause());
        assert!(!session.pause());
        assert!(!backend.emit_chunk(8));
        assert!(session.resume());
        assert_eq!(session.state(), RecordingState::Recording);
    }

    #[tokio::test]
    async fn test_drain_collects_flush_before_completion() {
        let backend = SyntheticBackend::new().with_flush_bytes(5);
        let stream = camera(&backend).await;
        let mut session =
            EncodingSession::start(&backend, stream, EncodingFormat::parse("video/webm")).unwrap();

        backend.emit_chunk(3);
        session.stop();
        let chunks = session.drain(Duration::from_secs(1)).await;
        assert_eq!(chunks.iter().map(Bytes::len).collect::<Vec<_>>(), vec![3, 5]);
        assert!(session.is_finished());
    }

    #[tokio::test]
    async fn test_init_failure_is_encoder_init() {
        let backend = SyntheticBackend::new();
        let stream = camera(&backend).await;
        stream.stop_tracks();
        let err = EncodingSession::start(&backend, stream, EncodingFormat::parse("video/webm"))
            .unwrap_err();
        assert!(matches!(err, SegcapError::EncoderInit { .. }));
    }
}
