//! Capture source provider: constraint building and stream acquisition.

use std::sync::Arc;

use segcap_common::error::{SegcapError, SegcapResult};
use segcap_platform_core::{
    AudioConstraints, FacingMode, MediaConstraints, MediaDevices, MediaStream, Resolution,
    SourceType, VideoConstraints,
};

/// Requests camera or screen streams from the platform.
///
/// Does not touch session state; the caller binds what it returns.
#[derive(Clone)]
pub struct CaptureSourceProvider {
    devices: Arc<dyn MediaDevices>,
    audio: AudioConstraints,
}

impl CaptureSourceProvider {
    pub fn new(devices: Arc<dyn MediaDevices>, audio: AudioConstraints) -> Self {
        Self { devices, audio }
    }

    /// Constraints for a request: ideal size and aspect ratio from the
    /// resolution, configured audio processing, and a user-facing camera
    /// for camera requests.
    pub fn constraints(&self, source: SourceType, resolution: &Resolution) -> MediaConstraints {
        MediaConstraints {
            video: VideoConstraints {
                ideal_width: resolution.width,
                ideal_height: resolution.height,
                aspect_ratio: resolution.aspect_ratio(),
                facing_mode: match source {
                    SourceType::Camera => Some(FacingMode::User),
                    SourceType::Screen => None,
                },
            },
            audio: self.audio.clone(),
        }
    }

    /// Acquire a stream. Every failure is a media access error.
    pub async fn acquire(
        &self,
        source: SourceType,
        resolution: &Resolution,
    ) -> SegcapResult<Arc<dyn MediaStream>> {
        let constraints = self.constraints(source, resolution);
        tracing::info!(source = %source, resolution = %resolution, "Requesting media stream");

        let result = match source {
            SourceType::Camera => self.devices.get_user_media(&constraints).await,
            SourceType::Screen => self.devices.get_display_media(&constraints).await,
        };

        match result {
            Ok(stream) => {
                tracing::info!(source = %source, stream = %stream.id(), "Media stream acquired");
                Ok(stream)
            }
            Err(e @ SegcapError::MediaAccess { .. }) => Err(e),
            Err(e) => Err(SegcapError::media_access(format!(
                "Error accessing {source}: {e}"
            ))),
        }
    }
}

impl std::fmt::Debug for CaptureSourceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSourceProvider")
            .field("audio", &self.audio)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SyntheticBackend;

    fn provider(backend: &SyntheticBackend) -> CaptureSourceProvider {
        CaptureSourceProvider::new(Arc::new(backend.clone()), AudioConstraints::default())
    }

    #[test]
    fn test_constraints_follow_resolution_and_source() {
        let backend = SyntheticBackend::new();
        let provider = provider(&backend);
        let resolution = Resolution::new("1080p", 1920, 1080);

        let camera = provider.constraints(SourceType::Camera, &resolution);
        assert_eq!(camera.video.ideal_width, 1920);
        assert_eq!(camera.video.ideal_height, 1080);
        assert!((camera.video.aspect_ratio - 16.0 / 9.0).abs() < 1e-9);
        assert_eq!(camera.video.facing_mode, Some(FacingMode::User));
        assert!(camera.audio.echo_cancellation);
        assert!(camera.audio.noise_suppression);
        assert_eq!(camera.audio.sample_rate, 44100);

        let screen = provider.constraints(SourceType::Screen, &resolution);
        assert_eq!(screen.video.facing_mode, None);
    }

    #[tokio::test]
    async fn test_acquire_routes_to_platform_api() {
        let backend = SyntheticBackend::new();
        let provider = provider(&backend);
        let resolution = Resolution::new("720p", 1280, 720);

        provider.acquire(SourceType::Screen, &resolution).await.unwrap();
        provider.acquire(SourceType::Camera, &resolution).await.unwrap();

        let requests = backend.requests();
        assert_eq!(requests[0].0, SourceType::Screen);
        assert_eq!(requests[1].0, SourceType::Camera);
        assert_eq!(requests[1].1.video.ideal_width, 1280);
    }

    #[tokio::test]
    async fn test_denial_becomes_media_access_error() {
        let backend = SyntheticBackend::new();
        backend.deny(SourceType::Screen, true);
        let err = provider(&backend)
            .acquire(SourceType::Screen, &Resolution::new("720p", 1280, 720))
            .await
            .unwrap_err();
        assert!(matches!(err, SegcapError::MediaAccess { .. }));
        assert!(err.to_string().contains("screen"));
    }
}
