//! Media stream acquisition contracts.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use segcap_common::config::{AudioDefaults, ResolutionPreset};
use segcap_common::error::SegcapResult;
use serde::{Deserialize, Serialize};

/// Origin of a media stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Camera,
    Screen,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Camera => "camera",
            SourceType::Screen => "screen",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capture resolution chosen from the configured catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub label: String,
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(label: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            label: label.into(),
            width,
            height,
        }
    }

    /// Width divided by height.
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }
}

impl From<&ResolutionPreset> for Resolution {
    fn from(preset: &ResolutionPreset) -> Self {
        Self::new(preset.label.clone(), preset.width, preset.height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}x{})", self.label, self.width, self.height)
    }
}

/// Which way a camera should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    /// Towards the user (front camera, webcam).
    User,
    Environment,
}

/// Constraints handed to the platform when acquiring a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub video: VideoConstraints,
    pub audio: AudioConstraints,
}

/// Video constraints. Width and height are ideals, not hard limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub aspect_ratio: f64,
    /// Only set for camera requests.
    pub facing_mode: Option<FacingMode>,
}

/// Audio processing requested from the capture device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub sample_rate: u32,
}

impl From<&AudioDefaults> for AudioConstraints {
    fn from(defaults: &AudioDefaults) -> Self {
        Self {
            echo_cancellation: defaults.echo_cancellation,
            noise_suppression: defaults.noise_suppression,
            sample_rate: defaults.sample_rate,
        }
    }
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self::from(&AudioDefaults::default())
    }
}

/// Identifier of a stream, unique per platform instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Description of one track of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: String,
    pub kind: TrackKind,
    /// Human-readable device label (e.g. "Integrated Camera").
    pub label: String,
}

/// A live audio/video stream acquired from the platform.
///
/// Streams are shared between the session and the encoder bound to them,
/// but only the session releases them.
#[async_trait::async_trait]
pub trait MediaStream: Send + Sync + fmt::Debug {
    fn id(&self) -> StreamId;

    fn tracks(&self) -> Vec<TrackInfo>;

    fn video_tracks(&self) -> Vec<TrackInfo> {
        self.tracks()
            .into_iter()
            .filter(|t| t.kind == TrackKind::Video)
            .collect()
    }

    /// Stop every track. Idempotent.
    fn stop_tracks(&self);

    /// Whether tracks are still delivering media.
    fn is_live(&self) -> bool;

    /// Whether the video track ended on its own (e.g. the user stopped
    /// sharing). Stopping tracks through `stop_tracks` is not a natural end.
    fn has_ended(&self) -> bool;

    /// Resolves once the video track ends naturally. Never resolves for a
    /// stream released through `stop_tracks`.
    async fn ended(&self);

    /// Access to the concrete stream type for backends that need it.
    fn as_any(&self) -> &dyn Any;
}

/// Platform stream acquisition: the user-media and display-media APIs.
#[async_trait::async_trait]
pub trait MediaDevices: Send + Sync {
    /// Request a camera (plus microphone) stream.
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> SegcapResult<Arc<dyn MediaStream>>;

    /// Request a display-capture stream. May prompt the user.
    async fn get_display_media(
        &self,
        constraints: &MediaConstraints,
    ) -> SegcapResult<Arc<dyn MediaStream>>;
}

/// Local, muted rendering of the bound stream.
pub trait PreviewSink: Send + Sync {
    fn show(&self, stream: &Arc<dyn MediaStream>) -> SegcapResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspect_ratio() {
        let res = Resolution::new("720p", 1280, 720);
        assert!((res.aspect_ratio() - 16.0 / 9.0).abs() < 1e-9);
        assert_eq!(res.to_string(), "720p (1280x720)");
    }

    #[test]
    fn test_resolution_from_preset() {
        let preset = ResolutionPreset {
            label: "1080p".to_string(),
            width: 1920,
            height: 1080,
        };
        assert_eq!(Resolution::from(&preset), Resolution::new("1080p", 1920, 1080));
    }

    #[test]
    fn test_default_audio_constraints() {
        let audio = AudioConstraints::default();
        assert!(audio.echo_cancellation);
        assert!(audio.noise_suppression);
        assert_eq!(audio.sample_rate, 44_100);
    }
}
