//! Streaming encoder contracts.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use segcap_common::error::SegcapResult;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::media::MediaStream;

/// Recording state shared by encoders and sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    #[default]
    Inactive,
    Recording,
    Paused,
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordingState::Inactive => "inactive",
            RecordingState::Recording => "recording",
            RecordingState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// Events produced by a platform encoder.
///
/// Every `DataAvailable` for an encoder is sent before its `Stopped`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderEvent {
    /// A chunk of muxed container data. May be empty.
    DataAvailable(Bytes),
    /// A non-fatal platform error.
    Error(String),
    /// The encoder flushed everything and will emit nothing more.
    Stopped,
}

/// A platform streaming encoder bound to one stream.
pub trait MediaEncoder: Send {
    /// Start producing data. All events go to `events`, in order.
    fn start(&mut self, events: mpsc::UnboundedSender<EncoderEvent>) -> SegcapResult<()>;

    fn pause(&mut self) -> SegcapResult<()>;

    fn resume(&mut self) -> SegcapResult<()>;

    /// Request a flush. Completion is signalled by `EncoderEvent::Stopped`.
    fn stop(&mut self) -> SegcapResult<()>;
}

/// Capability query and encoder construction.
pub trait EncoderBackend: Send + Sync {
    /// Whether `mime_type` can be produced on this platform.
    fn is_type_supported(&self, mime_type: &str) -> bool;

    /// Construct an encoder for `stream`. Does not start it.
    fn create_encoder(
        &self,
        stream: Arc<dyn MediaStream>,
        mime_type: &str,
    ) -> SegcapResult<Box<dyn MediaEncoder>>;
}
